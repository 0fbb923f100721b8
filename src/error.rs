use thiserror::Error;
use uuid::Uuid;

/// Failures talking to the note store (PostgREST + auth).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No signed-in principal could be resolved.
    #[error("not signed in")]
    Unauthenticated,

    /// The store rejected a write because a column does not exist in its schema.
    #[error("column '{0}' does not exist in the remote schema")]
    MissingColumn(String),

    #[error("store returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to decode store response: {0}")]
    Decode(String),

    #[error("note not found: {0}")]
    NotFound(Uuid),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Request(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Failures from the analysis (LLM) endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("analysis API key not configured")]
    NotConfigured,

    #[error("analysis request failed: {0}")]
    Request(String),

    #[error("analysis API error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("no text in analysis response")]
    EmptyResponse,

    #[error("malformed analysis output: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for AnalysisError {
    fn from(e: reqwest::Error) -> Self {
        AnalysisError::Request(e.to_string())
    }
}

/// Failures surfaced by a capture session's save path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("not signed in")]
    Unauthenticated,

    #[error("nothing to save")]
    EmptyContent,

    #[error("capture session is closed")]
    Closed,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CaptureError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unauthenticated => CaptureError::Unauthenticated,
            other => CaptureError::Store(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing setting: {0}")]
    Missing(&'static str),
}

/// Failures of the smart-merge flow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("merge suggestion is not actionable")]
    NotActionable,

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures talking to the Secret Service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyringError {
    #[error("failed to connect to keyring: {0}")]
    Connect(String),

    #[error("keyring operation failed: {0}")]
    Operation(String),

    #[error("stored secret is not valid UTF-8")]
    InvalidUtf8,
}
