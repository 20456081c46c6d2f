pub mod utils;

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

use crate::http_server;
use crate::{ServiceConfig, ServiceState, StateError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("error creating server state: {0}")]
    State(#[from] StateError),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),
    #[error("failed to shut down within {} seconds", FINAL_SHUTDOWN_TIMEOUT.as_secs())]
    ShutdownTimeout,
}

/// Handle for gracefully shutting down the service.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the service shuts down (via signal or explicit shutdown).
    pub async fn wait(self) -> Result<(), ServiceError> {
        shutdown_and_join(self.graceful_waiter, self.handles).await
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns a guard that must be kept alive for the duration of the program.
fn init_logging(service_config: &ServiceConfig) -> tracing_appender::non_blocking::WorkerGuard {
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(service_config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    tracing_subscriber::registry().with(stdout_layer).init();

    utils::register_panic_logger();
    utils::report_build_info();

    stdout_guard
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) -> Result<(), ServiceError> {
    let _ = graceful_waiter.await;

    timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .map_err(|_| ServiceError::ShutdownTimeout)?;
    Ok(())
}

/// Create state and spawn the HTTP server, returning the state handle.
///
/// The returned `ShutdownHandle` must be kept alive; dropping it does not stop the service.
pub async fn start_service(
    service_config: &ServiceConfig,
) -> Result<(ServiceState, ShutdownHandle), ServiceError> {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let state = ServiceState::from_config(service_config).await?;

    let api_state = state.clone();
    let api_config = http_server::Config::new(service_config.listen_addr, service_config.log_level);
    let api_handle = tokio::spawn(async move {
        if let Err(e) = http_server::run_api(api_config, api_state, shutdown_rx).await {
            tracing::error!("API server error: {}", e);
        }
    });

    tracing::info!(
        "Running: upload API on port {}",
        service_config.listen_addr.port()
    );

    let handle = ShutdownHandle {
        graceful_waiter,
        handles: vec![api_handle],
        shutdown_tx,
    };

    Ok((state, handle))
}

/// Spawns the service and blocks until a shutdown signal is received.
pub async fn spawn_service(service_config: &ServiceConfig) -> Result<(), ServiceError> {
    let _guard = init_logging(service_config);
    for warning in service_config.proof_warnings() {
        tracing::warn!("{}", warning);
    }
    let (_, handle) = start_service(service_config).await?;
    handle.wait().await
}
