use kb_miniapp::config::AppConfig;
use kb_miniapp::http_server::{AppState, HttpServer};
use kb_miniapp::logging;
use kb_miniapp::store::{AccountStore, MemoryAccountStore, SqliteAccountStore};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

const HELP: &str = "\
kb-miniapp - Telegram Mini App authentication server

USAGE:
    kb-miniapp [OPTIONS]

OPTIONS:
    -h, --help       Print this help and exit
    -v, --version    Print version and exit

ENVIRONMENT:
    APP_ENV                  development | production (default: production)
    TELEGRAM_BOT_TOKEN       Bot token used to verify launch payloads
    JWT_SECRET               Session signing secret (required)
    ADMIN_TELEGRAM_ID        Telegram id granted admin on first login
    INIT_DATA_MAX_AGE_SECS   Launch payload replay window (default: 86400)
    BIND_ADDR                Listen address (default: 0.0.0.0:3000)
    KB_LOCAL                 Bind 127.0.0.1:3000 when BIND_ADDR is unset
    DATABASE_PATH            SQLite file; in-memory store when unset
    KB_LOG_LEVEL             trace | debug | info | warn | error (default: info)";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if let Some(arg) = args.get(1) {
        match arg.as_str() {
            "--version" | "-v" => {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage");
                std::process::exit(1);
            }
        }
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            std::process::exit(1);
        }
    };

    logging::init(config.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        log_level = %config.log_level,
        "kb-miniapp starting"
    );
    if config.environment.is_relaxed() {
        warn!("relaxed environment: unsigned logins and anonymous gate passes are enabled");
    }
    if config.bot_token.is_none() {
        warn!("TELEGRAM_BOT_TOKEN is not set, every launch payload will be rejected");
    }

    let store: Arc<dyn AccountStore> = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "using SQLite account store");
            Arc::new(SqliteAccountStore::open(path)?)
        }
        None => {
            warn!("DATABASE_PATH not set, accounts are kept in memory only");
            Arc::new(MemoryAccountStore::new())
        }
    };

    let bind_addr = config.bind_addr;
    let state = Arc::new(AppState::new(config, store));
    let addr = HttpServer::new(state).start(bind_addr).await?;
    info!(addr = %addr, "ready for requests");

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => info!("received SIGINT, shutting down gracefully"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("received Ctrl+C, shutting down gracefully");
    }

    info!("kb-miniapp stopped");
    Ok(())
}
