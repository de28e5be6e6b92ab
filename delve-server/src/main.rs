//! delve-server - credit-metered research service
//!
//! Serves the research, history, credits, organization, subscription and
//! payment HTTP surface, and runs research generation in the background.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use delve_common::config::TomlConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use delve_server::services::ProcessAgent;
use delve_server::AppState;

/// Command-line arguments for delve-server
#[derive(Parser, Debug)]
#[command(name = "delve-server")]
#[command(about = "Credit-metered research session service")]
#[command(version)]
struct Args {
    /// Bootstrap config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "DELVE_PORT")]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long, env = "DELVE_HOST")]
    host: Option<String>,

    /// SQLite database file
    #[arg(short, long, env = "DELVE_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and print an access token for it
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.host = host;
    }
    if let Some(database) = args.database.clone() {
        config.database_path = Some(database);
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting delve-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let db_path = config.resolved_database_path();
    info!("Database: {}", db_path.display());
    let db = delve_common::db::init_database(&db_path, config.database.max_connections)
        .await
        .context("Failed to initialize database")?;

    if let Some(Command::CreateUser { email, name }) = args.command {
        return create_user(&db, &email, &name).await;
    }

    let agent = Arc::new(ProcessAgent::from_config(&config.research));
    if config.research.agent_command.is_none() {
        info!("No research agent configured; research submissions will fail");
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;

    let state = AppState::new(db, config, agent);

    // No background task can exist yet, so every processing row is stale
    state
        .orchestrator
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted sessions")?;

    let shutdown = state.shutdown.clone();
    let app = delve_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn create_user(db: &sqlx::SqlitePool, email: &str, name: &str) -> Result<()> {
    // An existing email gets a fresh token instead of a duplicate user
    let user = match delve_server::db::users::find_user_by_email(db, email)
        .await
        .context("Failed to look up user")?
    {
        Some(user) => {
            info!(user_id = %user.id, "User already exists, issuing a new token");
            user
        }
        None => {
            let user = delve_server::db::users::create_user(db, email, name)
                .await
                .context("Failed to create user")?;
            info!(user_id = %user.id, "User created");
            user
        }
    };
    let token = delve_server::db::users::create_token(db, user.id, None)
        .await
        .context("Failed to create token")?;

    println!("user_id: {}", user.id);
    println!("token:   {}", token);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, then cancels open streams
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    shutdown.cancel();
}
