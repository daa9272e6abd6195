use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tenantdb::{AppState, Engine, MemoryStorage, PostgresStorage, ServerConfig, Storage, build_router};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Multi-tenant dynamic schema server.
#[derive(Debug, Parser)]
#[command(name = "tenantdb", version, about)]
struct Cli {
    /// Interface to bind (overrides TENANTDB_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides TENANTDB_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// `postgres://...` or `memory` (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Connection pool size (overrides DB_MAX_CONNECTIONS)
    #[arg(long)]
    max_connections: Option<u32>,

    /// Disable self-service account registration
    #[arg(long)]
    no_registration: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env().context("failed to load configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(max) = cli.max_connections {
        config.db_max_connections = max;
    }
    if cli.no_registration {
        config.engine.allow_registration = false;
    }
    config.validate()?;

    let storage: Arc<dyn Storage> = if config.uses_postgres() {
        info!("database backend: postgres");
        let storage = PostgresStorage::connect(&config.database_url, config.db_max_connections)
            .await
            .context("failed to connect to PostgreSQL")?;
        storage
            .migrate()
            .await
            .context("failed to run migrations")?;
        Arc::new(storage)
    } else {
        info!("database backend: memory");
        Arc::new(MemoryStorage::new())
    };

    let engine = Engine::new(storage, config.engine.clone()).context("invalid engine settings")?;
    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        let admin = engine
            .bootstrap_admin(email, password)
            .await
            .context("failed to bootstrap admin account")?;
        info!(account_id = %admin.id, "admin account ready");
    }

    let app = build_router(AppState::new(Arc::new(engine)));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(address = %addr, "tenantdb started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tenantdb=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
