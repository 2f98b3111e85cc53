//! QP Driver - Main Entry Point
//!
//! Wires the shared-data backend, the message bus, and the router together,
//! runs the consumer loop in the background, and shuts down cleanly on
//! SIGINT.

use qpdriver::{FakeSdl, LocalBus, Router, SharedData, XappContext};
use qpdriver_common::{MetricsRegistry, QpDriverConfig, QpDriverError, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Transport buffer pool size for the in-process bus
const TRANSPORT_POOL_SIZE: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qpdriver=info,qpdriver_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting QP Driver xApp");

    // Load configuration: file if QPDRIVER_CONFIG is set, env otherwise
    let config = match std::env::var("QPDRIVER_CONFIG") {
        Ok(path) => QpDriverConfig::from_file(path)?,
        Err(_) => QpDriverConfig::from_env()?,
    };

    info!(
        listen_port = config.listen_port,
        use_fake_sdl = config.use_fake_sdl,
        ue_batch_size = config.ue_batch.len(),
        "configuration loaded"
    );

    // Select the shared-data backend. The real backend is wired in by the
    // platform deployment; only the in-memory one is available here.
    let sdl: Arc<dyn SharedData> = if config.use_fake_sdl {
        Arc::new(FakeSdl::with_fallback_metrics(&config.sdl_namespace))
    } else {
        return Err(QpDriverError::config(
            "real shared-data backend is provided by the platform deployment; \
             set use_fake_sdl for standalone runs",
        ));
    };

    let (bus, inbound_rx) = LocalBus::new(TRANSPORT_POOL_SIZE);
    let metrics = MetricsRegistry::new();

    let router = Arc::new(Router::new(XappContext {
        sdl,
        sender: Arc::new(bus.clone()),
        config: Arc::new(config),
        metrics,
    }));

    let handle = router.clone().spawn(inbound_rx);

    info!("QP Driver running");

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Received shutdown signal");

    handle.stop();
    handle
        .join()
        .await
        .map_err(|e| QpDriverError::internal(format!("router task failed: {}", e)))?;

    let stats = router.stats();
    info!(
        def_handler_called = stats.def_handler_called,
        steering_requests = stats.steering_requests,
        "QP Driver shutdown complete"
    );

    Ok(())
}
