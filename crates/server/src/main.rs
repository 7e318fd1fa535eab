//! SatoshiSend server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use satoshisend_core::config::AppConfig;
use satoshisend_payments::{AlbyWallet, MockWallet, PaymentCoordinator, WalletAdapter};
use satoshisend_server::{AppState, Janitor, create_router, ratelimit};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SatoshiSend - pay-per-hosting encrypted file relay
#[derive(Parser, Debug)]
#[command(name = "satoshisend")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SATOSHISEND_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("SatoshiSend v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration: optional TOML file, overridable by env vars.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}, using defaults and env", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("SATOSHISEND_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .wallet
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid wallet configuration")?;
    config
        .storage
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid storage configuration")?;

    // Blob storage backend.
    let storage = satoshisend_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Metadata store (runs migrations on open).
    let metadata = satoshisend_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!(path = %config.metadata.path.display(), "Metadata store initialized");

    // Wallet selection: real Alby adapter when fully configured, mock
    // otherwise. Token-without-secret was already rejected above.
    let (wallet, webhook_wallet): (Arc<dyn WalletAdapter>, Option<Arc<AlbyWallet>>) =
        if config.wallet.is_real() {
            let alby = Arc::new(
                AlbyWallet::new(
                    config.wallet.access_token.as_deref().unwrap_or_default(),
                    config.wallet.webhook_secret.as_deref().unwrap_or_default(),
                )
                .context("failed to create wallet client")?,
            );
            alby.health_check()
                .await
                .context("failed to connect to wallet")?;
            tracing::info!("Connected to Lightning wallet via Alby HTTP API");
            (alby.clone(), Some(alby))
        } else {
            tracing::info!(
                "Using mock wallet (set wallet.access_token and wallet.webhook_secret for real payments)"
            );
            (
                Arc::new(MockWallet::new(config.wallet.mock_settle_delay())),
                None,
            )
        };

    // Take the settlement stream before anything can produce into it.
    let settlements = wallet.settlement_stream()?;

    // Restart recovery must complete before the settlement consumer starts,
    // and before the webhook route is served.
    let payments = Arc::new(PaymentCoordinator::new(wallet, metadata.clone()));
    payments
        .load_on_startup()
        .await
        .context("failed to load pending invoices")?;

    let state = AppState::new(
        config.clone(),
        storage.clone(),
        metadata.clone(),
        payments.clone(),
        webhook_wallet,
    );

    let cancel = CancellationToken::new();

    // Settlement consumer.
    tokio::spawn(payments.clone().run(settlements, cancel.clone()));

    // Janitor.
    let janitor = Janitor::new(
        metadata.clone(),
        storage.clone(),
        state.limiter.clone(),
        config.janitor.interval(),
        config.limits.pending_timeout(),
    );
    janitor.spawn(cancel.clone());

    // Rate limiter cleanup.
    if state.rate_limit.is_enabled() {
        let interval = std::time::Duration::from_secs(config.rate_limit.cleanup_interval_secs);
        ratelimit::spawn_cleanup_task(state.rate_limit.clone(), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Rate limiter cleanup task spawned"
        );
    } else {
        tracing::info!("Rate limiting disabled");
    }

    // Force exit if in-flight requests exceed the grace window after shutdown.
    let grace = config.server.shutdown_grace();
    let watchdog_cancel = cancel.clone();
    tokio::spawn(async move {
        watchdog_cancel.cancelled().await;
        tokio::time::sleep(grace).await;
        tracing::warn!(
            grace_secs = grace.as_secs(),
            "grace window elapsed with requests still in flight, forcing exit"
        );
        std::process::exit(0);
    });

    let app = create_router(state);
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!("Listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel))
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on SIGINT, cancelling all background tasks first.
async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}
