//! fieldcache - command line front end for the farmer learning app.
//!
//! Every command shows saved data immediately, then revalidates against the
//! service and prints what changed. Without a connection the saved data is
//! shown with an offline marker.

mod commands;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fieldcache_core::{ApiClient, CachedApi, Config, FileStore, QueryCache, Session};

/// Log file name inside the cache directory
const LOG_FILE: &str = "fieldcache.log";

#[derive(Parser, Debug)]
#[command(name = "fieldcache")]
#[command(about = "Lessons, progress and schemes for farmers - works offline")]
#[command(version)]
struct Args {
    /// Use saved data only, do not contact the service
    #[arg(long, global = true)]
    offline: bool,

    /// Language for lesson and scheme text (e.g. en, hi)
    #[arg(long, global = true)]
    lang: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        /// Email address (defaults to FIELDCACHE_EMAIL or the last one used)
        email: Option<String>,
    },
    /// Sign out and remove saved data
    Logout,
    /// Lesson and coin progress with the active quest
    Progress,
    /// Tip of the day
    Tip,
    /// Show one lesson
    Lesson {
        id: i64,
        /// Also show the lesson in this language afterwards
        #[arg(long)]
        then_lang: Option<String>,
    },
    /// Government schemes
    Schemes,
    /// Profile and sustainability score
    Profile,
    /// Age of every saved entry
    Ages,
}

/// Initialize the tracing subscriber, logging to a file in the cache directory
fn init_tracing(cache_dir: &Path) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if let Err(e) = std::fs::create_dir_all(cache_dir) {
        eprintln!("Logging disabled: {}", e);
        return None;
    }
    let appender = tracing_appender::rolling::never(cache_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    config.apply_env();
    if let Some(lang) = args.lang.clone() {
        config.language = Some(lang);
    }

    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    let _guard = init_tracing(&cache_dir);
    info!(?cache_dir, command = ?args.command, "fieldcache starting");

    let mut session = Session::new(cache_dir.clone());
    if let Err(e) = session.load() {
        warn!(error = %e, "Failed to load session");
    }

    let store = FileStore::new(Config::query_cache_dir(&cache_dir))?;
    let cache = QueryCache::with_options(Arc::new(store), config.cache_options());
    if args.offline {
        cache.set_offline_mode(true);
    }

    let result = match args.command {
        Command::Login { email } => commands::login(&mut config, &mut session, email).await,
        Command::Logout => commands::logout(&mut session, &cache).await,
        Command::Ages => commands::ages(&cache).await,
        command => {
            let api = connect(&config, &mut session, cache.is_offline_mode()).await?;
            let cached = CachedApi::new(api, cache, session.user_id().map(String::from));
            let lang = config.language().to_string();
            match command {
                Command::Progress => commands::progress(&cached).await,
                Command::Tip => commands::tip(&cached, &lang).await,
                Command::Lesson { id, then_lang } => {
                    commands::lesson(&cached, id, &lang, then_lang.as_deref()).await
                }
                Command::Schemes => commands::schemes(&cached, &lang).await,
                Command::Profile => commands::profile(&cached).await,
                Command::Login { .. } | Command::Logout | Command::Ages => Ok(()),
            }
        }
    };

    info!("fieldcache finished");
    result
}

/// API client for the configured service, signed in when a session exists.
/// A session close to expiry is renewed first unless running offline.
async fn connect(config: &Config, session: &mut Session, offline: bool) -> Result<ApiClient> {
    let (url, key) = config.api_settings()?;
    let mut api = ApiClient::new(url, key)?;

    let renewal = session
        .renewal()
        .map(|(token, email)| (token.to_string(), email.to_string()));
    if let Some((refresh_token, email)) = renewal.filter(|_| !offline) {
        match api.refresh_session(&refresh_token, &email).await {
            Ok(data) => {
                info!(user_id = %data.user_id, "Session renewed");
                session.update(data);
                if let Err(e) = session.save() {
                    warn!(error = %e, "Failed to save renewed session");
                }
            }
            Err(e) => warn!(error = %e, "Failed to renew session, using saved token"),
        }
    }

    if let Some(token) = session.token() {
        api.set_token(token.to_string());
    }
    Ok(api)
}
