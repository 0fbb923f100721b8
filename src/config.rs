use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "config.json";

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("scribble")
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".into()
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ScribbleConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    #[serde(skip_serializing)]
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    /// Quiet period before an auto-save fires.
    pub save_debounce_ms: u64,
    /// Quiet period before content is sent for analysis.
    pub analysis_debounce_ms: u64,
    /// How long "saved" is shown before the status falls back to idle.
    pub saved_display_ms: u64,
    /// Plain-text length below which analysis is skipped.
    pub min_analysis_chars: usize,
    pub feed_poll_secs: u64,
    pub debug_logging: bool,
}

impl Default for ScribbleConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            gemini_api_key: None,
            gemini_base_url: default_gemini_base_url(),
            gemini_model: default_gemini_model(),
            save_debounce_ms: 2000,
            analysis_debounce_ms: 3000,
            saved_display_ms: 2000,
            min_analysis_chars: 10,
            feed_poll_secs: 5,
            debug_logging: false,
        }
    }
}

impl ScribbleConfig {
    pub fn default_path() -> PathBuf {
        default_config_dir().join(CONFIG_FILE)
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&Self::default_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SUPABASE_URL") {
            self.supabase_url = v;
        }
        if let Some(v) = lookup("SUPABASE_ANON_KEY") {
            self.supabase_anon_key = v;
        }
        if let Some(v) = lookup("GEMINI_API_KEY").filter(|v| !v.is_empty()) {
            self.gemini_api_key = Some(v);
        }
        if let Some(v) = lookup("GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = lookup("SCRIBBLE_DEBUG") {
            self.debug_logging = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    /// Supabase URL and anon key, or an error naming the first one missing.
    pub fn supabase_credentials(&self) -> Result<(&str, &str), ConfigError> {
        let url = self.supabase_url.trim();
        let key = self.supabase_anon_key.trim();
        if url.is_empty() {
            return Err(ConfigError::Missing("SUPABASE_URL"));
        }
        if key.is_empty() {
            return Err(ConfigError::Missing("SUPABASE_ANON_KEY"));
        }
        Ok((url, key))
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn analysis_debounce(&self) -> Duration {
        Duration::from_millis(self.analysis_debounce_ms)
    }

    pub fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }

    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_secs(self.feed_poll_secs.max(1))
    }
}
