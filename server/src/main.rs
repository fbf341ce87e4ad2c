//! Jailmaker Server
//!
//! Web backend for managing systemd-nspawn jails on a remote host. Every
//! action becomes a `jlmkr.py` invocation run over SSH as root; output is
//! returned in one piece or relayed live over websockets.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod domain;
mod error;
mod infra;
mod service;

pub use config::Config;
pub use error::{Error, Result};

use infra::catalog::Catalog;
use infra::sqlite::UserRepository;
use infra::ssh::SshExecutor;
use service::jail::JailService;
use service::registry::StreamRegistry;
use service::shell::{ShellService, ShellSessions};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jail_service: Arc<JailService>,
    pub shell_service: Arc<ShellService>,
    pub user_repository: Arc<UserRepository>,
    pub registry: StreamRegistry,
    pub catalog: Arc<Catalog>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::load()?);

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let http_addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;

    info!("Starting Jailmaker Server");
    info!("HTTP listening on {}", http_addr);

    // Initialize infrastructure
    let pool = UserRepository::init(&config.database_url).await?;
    let user_repository = Arc::new(UserRepository::new(pool));
    let executor = Arc::new(SshExecutor::new(config.connect_timeout()));
    let registry = StreamRegistry::new(config.grace_period());
    let catalog = Arc::new(Catalog::new(&config.catalog_file));

    // Initialize services
    let jail_service = Arc::new(JailService::new(
        user_repository.clone(),
        executor.clone(),
        registry.clone(),
        &config,
    ));

    let shell_service = Arc::new(ShellService::new(
        user_repository.clone(),
        executor,
        ShellSessions::new(),
        &config,
    ));

    let state = AppState {
        config: config.clone(),
        jail_service,
        shell_service,
        user_repository,
        registry,
        catalog,
    };

    let app = api::http::create_router(state);

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("HTTP server error: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
