//! Session node: runs the expiration listener, the terminal-session sweep
//! and the metrics exporter against a shared Redis.
//!
//! Login and request handling live in the authentication layer, which embeds
//! a [`SessionLifecycle`](district_sessions::SessionLifecycle) over the same
//! store and configuration.
//!
//! Configuration is read from the environment (see
//! [`SessionNodeConfig::from_env`]); `RUST_LOG` controls log filtering.

use anyhow::Context;
use district_core::environment::SystemClock;
use district_runtime::MetricsServer;
use district_sessions::stores::{RedisEventBus, RedisSessionStore};
use district_sessions::{
    ExpirationListener, ExpirationNotifier, SessionNodeConfig, SessionRegistry,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,district_sessions=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SessionNodeConfig::from_env().context("invalid session node configuration")?;
    tracing::info!(
        namespace = %config.registry.namespace,
        max_sessions = config.registry.max_sessions_per_principal,
        block_new_login = config.registry.block_new_login_if_exceeded,
        inactivity_timeout_secs = config.registry.inactivity_timeout_secs(),
        "Starting session node"
    );

    let store = RedisSessionStore::new(&config.redis_url, config.registry.namespace.clone())
        .await
        .context("failed to connect session store")?;
    if config.configure_keyspace_events {
        if let Err(e) = store.configure_keyspace_events().await {
            tracing::warn!(
                error = %e,
                "Could not enable keyspace notifications; configure notify-keyspace-events on the server"
            );
        }
    }

    let event_bus = RedisEventBus::new(&config.redis_url)
        .await
        .context("failed to connect audit event bus")?;

    let mut metrics = MetricsServer::new(config.metrics_addr);
    metrics.start().context("failed to start metrics exporter")?;

    let registry = SessionRegistry::new(store, config.registry.clone(), Arc::new(SystemClock))?;
    let notifier = ExpirationNotifier::new(registry.clone(), Arc::new(event_bus));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = ExpirationListener::new(notifier).spawn(shutdown_rx.clone());

    let sweep_interval = config.sweep_interval;
    let sweep_registry = registry.clone();
    let mut sweep_shutdown = shutdown_rx;
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = sweep_shutdown.changed() => break,
                _ = ticker.tick() => {
                    let purged = sweep_registry.purge_terminal_sessions();
                    if purged > 0 {
                        tracing::debug!(purged, remaining = sweep_registry.local_len(), "Purged terminal sessions");
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(listener, sweeper);

    tracing::info!(local_sessions = registry.local_len(), "Session node stopped");
    Ok(())
}
