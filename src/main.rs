use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use scribble::ai::{Analyzer, GeminiClient, OfflineAnalyzer};
use scribble::capture::{CaptureOptions, CaptureSession, SaveOutcome, SaveStatus};
use scribble::config::ScribbleConfig;
use scribble::core::analysis::{AiAnalysis, MergeCandidate, MergeSuggestion};
use scribble::core::markup;
use scribble::core::note::{Note, NoteMetadata};
use scribble::error::AnalysisError;
use scribble::feed::{merge, FeedState, FeedWatcher};
use scribble::keyring::{self, Secret};
use scribble::store::{MemoryStore, NoteStore, SupabaseClient};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "scribble", version, about = "Quick note capture with AI tagging")]
struct Cli {
    /// Keep notes in memory and analyze locally; nothing leaves the process.
    #[arg(long, global = true)]
    offline: bool,

    /// Log at debug level for this run.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a note. Plain lines are text; `:help` lists editor commands.
    Capture,
    /// List notes, pinned first.
    Feed {
        #[arg(long)]
        tag: Option<String>,
    },
    /// Follow changes to the feed.
    Watch,
    Search { query: String },
    /// Pinned notes.
    Bookmarks,
    Show { id: Uuid },
    Pin { id: Uuid },
    Unpin { id: Uuid },
    Archive { id: Uuid },
    Delete { id: Uuid },
    /// Look for overlapping recent notes and offer a merge.
    Merge {
        /// Perform the suggested merge.
        #[arg(long)]
        apply: bool,
    },
    /// Verify and store the Gemini API key in the keyring.
    SetKey { key: String },
    /// Sign in anonymously and keep the session in the keyring.
    Login,
    /// Revoke the session and forget it.
    Logout,
}

/// The analyzer picked at startup: Gemini when a key is available.
enum Backend {
    Gemini(GeminiClient),
    Offline(OfflineAnalyzer),
}

impl Analyzer for Backend {
    async fn analyze(&self, plain_text: &str) -> Result<AiAnalysis, AnalysisError> {
        match self {
            Backend::Gemini(c) => c.analyze(plain_text).await,
            Backend::Offline(o) => o.analyze(plain_text).await,
        }
    }

    async fn suggest_merge(
        &self,
        notes: &[MergeCandidate],
    ) -> Result<MergeSuggestion, AnalysisError> {
        match self {
            Backend::Gemini(c) => c.suggest_merge(notes).await,
            Backend::Offline(o) => o.suggest_merge(notes).await,
        }
    }
}

fn init_logging(debug: bool) {
    // Journal logger (`journalctl --user -t scribble -f`): our targets at info or
    // debug, everything else at warn.
    struct FilteredJournal {
        inner: systemd_journal_logger::JournalLog,
    }

    impl log::Log for FilteredJournal {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            if metadata.target().starts_with("scribble") {
                let max = if scribble::debug_logging() {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                };
                metadata.level() <= max
            } else {
                metadata.level() <= log::LevelFilter::Warn
            }
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.inner.log(record);
            }
        }
        fn flush(&self) {
            self.inner.flush();
        }
    }

    scribble::set_debug_logging(debug);

    let journal = match systemd_journal_logger::JournalLog::new() {
        Ok(j) => j.with_syslog_identifier("scribble".to_string()),
        Err(e) => {
            eprintln!("journal unavailable, logging disabled: {e}");
            return;
        }
    };
    if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
        // Global max stays at Debug so the runtime toggle can open it up.
        log::set_max_level(log::LevelFilter::Debug);
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    let config = ScribbleConfig::load()?;
    init_logging(cli.debug || config.debug_logging);

    match &cli.command {
        Command::SetKey { key } => return set_key(&config, key).await,
        Command::Login => return login(&config).await,
        Command::Logout => return logout(&config).await,
        _ => {}
    }

    let analyzer = Arc::new(analyzer(&config, cli.offline).await);
    if cli.offline {
        let store = Arc::new(MemoryStore::with_user(Uuid::new_v4()));
        run(cli.command, store, analyzer, &config).await
    } else {
        let store = Arc::new(connect(&config).await?);
        run(cli.command, store, analyzer, &config).await
    }
}

async fn analyzer(config: &ScribbleConfig, offline: bool) -> Backend {
    if offline {
        return Backend::Offline(OfflineAnalyzer);
    }
    let key = match &config.gemini_api_key {
        Some(k) => Some(k.clone()),
        None => keyring::load(Secret::GeminiApiKey).await.unwrap_or_else(|e| {
            log::warn!("Could not read API key from keyring: {}", e);
            None
        }),
    };
    match key.map(|k| GeminiClient::new(&config.gemini_base_url, &config.gemini_model, &k)) {
        Some(Ok(client)) => {
            log::info!("Using Gemini model {}", client.model());
            Backend::Gemini(client)
        }
        Some(Err(e)) => {
            log::warn!("Gemini unavailable ({}), using offline analysis", e);
            Backend::Offline(OfflineAnalyzer)
        }
        None => {
            log::info!("No Gemini API key, using offline analysis");
            Backend::Offline(OfflineAnalyzer)
        }
    }
}

/// Resume the stored session, rotating its refresh token.
async fn connect(config: &ScribbleConfig) -> AppResult<SupabaseClient> {
    let (url, key) = config.supabase_credentials()?;
    let client = SupabaseClient::new(url, key)?;
    let Some(refresh) = keyring::load(Secret::SupabaseSession).await? else {
        return Err("not signed in; run `scribble login` first".into());
    };
    let session = client.refresh_session(&refresh).await?;
    if let Some(next) = session.refresh_token.as_deref() {
        keyring::store(Secret::SupabaseSession, next).await?;
    }
    log::debug!("Resumed session for {}", session.user.id);
    Ok(client)
}

async fn login(config: &ScribbleConfig) -> AppResult<()> {
    let (url, key) = config.supabase_credentials()?;
    let client = SupabaseClient::new(url, key)?;
    let session = client.sign_in_anonymously().await?;
    match session.refresh_token.as_deref() {
        Some(token) => keyring::store(Secret::SupabaseSession, token).await?,
        None => log::warn!("Sign-in returned no refresh token; the session will not persist"),
    }
    println!("Signed in as {}", session.user.id);
    Ok(())
}

/// Revoke the stored session server-side when possible, then drop it from
/// the keyring either way.
async fn logout(config: &ScribbleConfig) -> AppResult<()> {
    let Some(refresh) = keyring::load(Secret::SupabaseSession).await? else {
        println!("Not signed in.");
        return Ok(());
    };
    match config.supabase_credentials() {
        Ok((url, key)) => {
            let client = SupabaseClient::new(url, key)?;
            let revoked = match client.refresh_session(&refresh).await {
                Ok(_) => client.sign_out().await,
                Err(e) => Err(e),
            };
            if let Err(e) = revoked {
                log::warn!("Could not revoke session: {}", e);
            }
        }
        Err(e) => log::warn!("Skipping session revocation: {}", e),
    }
    keyring::delete(Secret::SupabaseSession).await?;
    println!("Signed out.");
    Ok(())
}

async fn set_key(config: &ScribbleConfig, key: &str) -> AppResult<()> {
    let client = GeminiClient::new(&config.gemini_base_url, &config.gemini_model, key)?;
    let status = client.check_api_key().await?;
    keyring::store(Secret::GeminiApiKey, key.trim()).await?;
    println!("{status}; key stored");
    Ok(())
}

async fn run<S: NoteStore, A: Analyzer>(
    command: Command,
    store: Arc<S>,
    analyzer: Arc<A>,
    config: &ScribbleConfig,
) -> AppResult<()> {
    let now = Utc::now();
    match command {
        Command::Capture => capture(store, analyzer, config).await?,
        Command::Feed { tag } => {
            let mut feed = FeedState::new();
            feed.load(store.list_feed().await?);
            print_notes(&feed.visible(now, tag.as_deref()));
        }
        Command::Watch => watch(store, config).await?,
        Command::Search { query } => {
            let hits = store.search(&query).await?;
            print_notes(&hits.iter().filter(|n| !n.is_expired(now)).collect::<Vec<_>>());
        }
        Command::Bookmarks => {
            let mut feed = FeedState::new();
            feed.load(store.list_pinned().await?);
            print_notes(&feed.bookmarks(now));
        }
        Command::Show { id } => print_note(&store.get_note(id).await?),
        Command::Pin { id } => {
            let mut feed = load_one(store.as_ref(), id).await?;
            feed.set_pinned(store.as_ref(), id, true).await?;
        }
        Command::Unpin { id } => {
            let mut feed = load_one(store.as_ref(), id).await?;
            feed.set_pinned(store.as_ref(), id, false).await?;
        }
        Command::Archive { id } => {
            let mut feed = load_one(store.as_ref(), id).await?;
            feed.archive_note(store.as_ref(), id).await?;
        }
        Command::Delete { id } => {
            let mut feed = load_one(store.as_ref(), id).await?;
            feed.delete_note(store.as_ref(), id).await?;
        }
        Command::Merge { apply } => {
            let notes = store.list_feed().await?;
            let Some(suggestion) = merge::suggest(analyzer.as_ref(), &notes).await? else {
                println!("Nothing to merge.");
                return Ok(());
            };
            println!(
                "Merge {} notes into \"{}\":",
                suggestion.note_ids.len(),
                suggestion.merged_title.as_deref().unwrap_or("Untitled")
            );
            for id in &suggestion.note_ids {
                println!("  {id}");
            }
            if apply {
                let merged = merge::execute(store.as_ref(), &suggestion).await?;
                println!("Created {}", merged.id);
            } else {
                println!("Run with --apply to merge.");
            }
        }
        Command::SetKey { .. } | Command::Login | Command::Logout => {}
    }
    Ok(())
}

async fn load_one<S: NoteStore>(store: &S, id: Uuid) -> AppResult<FeedState> {
    let mut feed = FeedState::new();
    feed.load(vec![store.get_note(id).await?]);
    Ok(feed)
}

const CAPTURE_HELP: &str = "\
:title <text>    set the title
:mood <emoji>    set the mood (empty clears)
:expires <hours> delete after N hours (0 clears)
:lock <days>     hide content for N days (0 clears)
:clear           empty the buffer
:save            save now
:done            save and quit";

async fn capture<S: NoteStore, A: Analyzer>(
    store: Arc<S>,
    analyzer: Arc<A>,
    config: &ScribbleConfig,
) -> AppResult<()> {
    let session = CaptureSession::start(store, analyzer, CaptureOptions::from(config));

    let mut status_rx = session.subscribe_status();
    let status_task = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            match &status {
                SaveStatus::Idle => {}
                SaveStatus::Error(msg) => eprintln!("{} {}", status.label(), msg),
                _ => eprintln!("{}", status.label()),
            }
        }
    });

    let mut paragraphs: Vec<String> = Vec::new();
    let mut metadata = NoteMetadata::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("Type your note. :help for commands, :done to finish.");
    while let Some(line) = lines.next_line().await? {
        let Some(cmd) = line.strip_prefix(':') else {
            paragraphs.push(line);
            session.on_edit(buffer_html(&paragraphs));
            continue;
        };
        let (name, arg) = cmd.split_once(' ').unwrap_or((cmd, ""));
        let arg = arg.trim();
        match name {
            "help" => eprintln!("{CAPTURE_HELP}"),
            "title" => session.set_title(arg),
            "mood" => {
                metadata.mood = Some(arg.to_string()).filter(|m| !m.is_empty());
                session.set_metadata(metadata.clone());
            }
            "expires" | "lock" => {
                let Ok(n) = arg.parse::<i64>() else {
                    eprintln!("expected a number");
                    continue;
                };
                let set = if name == "expires" {
                    metadata.expire_in_hours(Utc::now(), n)
                } else {
                    metadata.lock_for_days(Utc::now(), n)
                };
                if !set {
                    eprintln!("{n} is out of range");
                    continue;
                }
                session.set_metadata(metadata.clone());
            }
            "clear" => {
                paragraphs.clear();
                session.on_edit(String::new());
            }
            "save" => match session.save_now().await {
                Ok(outcome) => report(&outcome, &session),
                Err(e) => eprintln!("{e}"),
            },
            "done" => break,
            other => eprintln!("unknown command :{other}"),
        }
    }

    let result = session.save_and_exit().await;
    status_task.abort();
    match result {
        Ok(outcome) => report(&outcome, &session),
        Err(e) => {
            eprintln!("{e}");
            return Err(e.into());
        }
    }
    Ok(())
}

fn buffer_html(paragraphs: &[String]) -> String {
    paragraphs
        .iter()
        .map(|p| markup::plain_to_html(p))
        .collect::<String>()
}

fn report<S: NoteStore, A: Analyzer>(outcome: &SaveOutcome, session: &CaptureSession<S, A>) {
    match outcome {
        SaveOutcome::Saved(note) => {
            println!("Saved {} ({} words)", note.id, session.word_count());
            if let Some(analysis) = session.analysis() {
                if !analysis.tags.is_empty() {
                    println!("Tags: {}", analysis.tags.join(", "));
                }
            }
        }
        SaveOutcome::Skipped => println!("Nothing new to save."),
    }
}

async fn watch<S: NoteStore>(store: Arc<S>, config: &ScribbleConfig) -> AppResult<()> {
    let snapshot = store.list_feed().await?;
    let mut feed = FeedState::new();
    feed.load(snapshot.clone());
    print_notes(&feed.visible(Utc::now(), None));

    let (_watcher, mut rx) = FeedWatcher::spawn(store, snapshot, config.feed_poll_interval());
    loop {
        tokio::select! {
            change = rx.recv() => {
                let Some(change) = change else { break };
                feed.apply_remote(change);
                println!("---");
                print_notes(&feed.visible(Utc::now(), None));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_notes(notes: &[&Note]) {
    if notes.is_empty() {
        println!("No notes.");
        return;
    }
    let now = Utc::now();
    for note in notes {
        let marker = if note.is_pinned { "★" } else { " " };
        let mood = note.mood.as_deref().unwrap_or("");
        let preview = if note.is_locked(now) {
            "(locked)".to_string()
        } else {
            note.summary
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| excerpt(&note.content))
        };
        println!("{} {} {} {} {}", marker, note.id, note.display_title(), mood, preview);
        if !note.tags.is_empty() {
            println!("    #{}", note.tags.join(" #"));
        }
    }
}

fn print_note(note: &Note) {
    let now = Utc::now();
    println!("{}", note.display_title());
    println!("created {}  updated {}", note.created_at, note.updated_at);
    if let Some(mood) = &note.mood {
        println!("mood {mood}");
    }
    if let Some(at) = note.expires_at {
        println!("expires {at}");
    }
    match note.visible_content(now) {
        Some(html) => println!("\n{}", markup::plain_text(&html)),
        None => println!("\nlocked until {}", note.locked_until.unwrap_or(now)),
    }
    if !note.tags.is_empty() {
        println!("\n#{}", note.tags.join(" #"));
    }
}

fn excerpt(html: &str) -> String {
    let text = markup::plain_text(html);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() > 60 {
        format!("{}…", text.chars().take(60).collect::<String>())
    } else {
        text
    }
}
