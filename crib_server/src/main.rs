//! Cribbage match server.
//!
//! Hosts many concurrent matches behind a REST API, with live updates over
//! WebSocket. Match state is persisted to Postgres (or kept in memory with
//! `--memory`) after every move.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Error;
use crib_server::{
    api,
    auth::TokenVerifier,
    config::{ServerConfig, StorageConfig},
    logging, metrics,
};
use cribbage::{
    Hub, MatchManager,
    db::{Database, MatchStore, MemoryMatchStore},
};
use log::{error, info, warn};
use pico_args::Arguments;

const HELP: &str = "\
Run a cribbage match server

USAGE:
  crib_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8121]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --memory                 Keep matches in memory instead of Postgres
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8121)
  DATABASE_URL             PostgreSQL connection string
  JWT_SECRET               JWT verification secret (required, 32+ characters)
  MATCH_LOCK_TIMEOUT_MS    How long a request waits on a busy match [default: 5000]
  BROADCAST_BUFFER         Updates buffered per WebSocket client [default: 64]
  METRICS_BIND             Prometheus exporter address (disabled when unset)
  RUST_LOG                 Log filter [default: info,sqlx=warn,hyper=warn]
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        memory: pargs.contains("--memory"),
    };

    let config = ServerConfig::from_env(args.bind, args.database_url, args.memory)?;

    logging::init();
    info!("Starting cribbage server at {}", config.bind);

    if let Some(addr) = config.metrics_bind {
        match metrics::init_metrics(addr) {
            Ok(()) => info!("Prometheus metrics at http://{addr}/metrics"),
            Err(e) => warn!("{e}"),
        }
    }

    let (store, database): (Arc<dyn MatchStore>, Option<Database>) = match &config.storage {
        StorageConfig::Postgres(db_config) => {
            info!("Connecting to database");
            let db = Database::new(db_config)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
            db.migrate()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            info!("Database connected successfully");
            (Arc::new(db.match_store()), Some(db))
        }
        StorageConfig::Memory => {
            warn!("Using the in-memory store; matches will not survive a restart");
            (Arc::new(MemoryMatchStore::new()), None)
        }
    };

    let hub = Arc::new(Hub::new(config.manager.broadcast_buffer));
    let manager = Arc::new(MatchManager::new(store, hub.clone(), config.manager.clone()));

    let state = api::AppState {
        manager,
        hub,
        tokens: Arc::new(TokenVerifier::new(&config.jwt_secret)),
        database: database.clone(),
    };
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.bind, e))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Shutting down server...");
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
}
