use std::sync::Arc;

use anyhow::{Context, Result};
use relay_domain::operation_catalog;
use relay_infra::{
    load_settings, ApiHttpClient, ProcessEnv, SqliteStore, StdioTransportFactory, TokenCacheStore,
};
use relay_services::{
    FastPath, LocalBackend, RemoteBackend, ResponseCache, Router, SystemClock,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod sender;
mod server;
#[cfg(test)]
mod test_support;

pub use sender::OutgoingMessageSender;

use server::RelayServer;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().any(|argument| argument == "--version" || argument == "-V") {
        println!("notion-relay {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Logging goes to stderr; stdout is reserved for the protocol.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("NOTION_RELAY_LOG").unwrap_or_else(|_| {
                "relay_main=info,relay_services=info,relay_infra=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting notion-relay");

    let settings = load_settings(&ProcessEnv).context("Invalid configuration")?;

    let clock = Arc::new(SystemClock);
    let cache = Arc::new(ResponseCache::new(&settings.cache, clock));
    if settings.cache.enabled {
        cache.load();
    }

    let store = Arc::new(SqliteStore::new(settings.local_app_cache.db_path.clone()));
    let fast_path = Arc::new(FastPath::new(&settings.local_app_cache, store));

    let http = Arc::new(ApiHttpClient::new(&settings.api).context("Failed to build the HTTP client")?);
    let local = Arc::new(LocalBackend::new(
        operation_catalog(),
        &settings.api,
        cache.clone(),
        settings.cache.enabled,
        fast_path,
        http,
    ));

    let remote = if settings.remote.command.is_some() {
        let factory = Arc::new(StdioTransportFactory::new(settings.remote.clone()));
        let token_cache = Arc::new(TokenCacheStore::new(settings.token_cache_dir.clone()));
        let backend = Arc::new(RemoteBackend::new(&settings.remote, factory, token_cache));
        if backend.has_usable_tokens() {
            tracing::info!(url = %backend.remote_url(), "Found a usable OAuth token on disk");
        } else {
            tracing::info!(
                url = %backend.remote_url(),
                "No usable OAuth token on disk; connecting may open a sign-in flow"
            );
        }
        Some(backend)
    } else {
        None
    };

    let router = Arc::new(Router::new(local, remote, cache));
    router.start().await.context("No backend could be started")?;

    spawn_signal_handler(router.clone());

    let server = RelayServer::new(router.clone());
    let outcome = server
        .run(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await;

    router.shutdown().await;
    outcome
}

/// Tears the backends down on SIGINT/SIGTERM before exiting.
fn spawn_signal_handler(router: Arc<Router>) {
    tokio::spawn(async move {
        let interrupted = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminated = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        tokio::select! {
            _ = interrupted => {}
            _ = terminated => {}
        }

        tracing::info!("Shutdown signal received");
        router.shutdown().await;
        std::process::exit(0);
    });
}
