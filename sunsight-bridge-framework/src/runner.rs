//! Bridge runner for lifecycle management.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use sunsight_common::init_tracing;

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// How long [`BridgeRunner::run`] waits for workers after cancelling them.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome reported by a finished worker task.
struct WorkerExit {
    name: String,
    outcome: std::result::Result<(), String>,
}

/// Bridge runner that manages the lifecycle of a device bridge.
///
/// Handles:
/// - Logging initialization
/// - Task spawning with cooperative cancellation
/// - Worker supervision (a worker that stops on its own stops the bridge)
/// - Graceful shutdown on Ctrl+C or SIGTERM
///
/// # Example
///
/// ```ignore
/// use sunsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///
///     runner.spawn("poller", |shutdown| async move {
///         // Worker logic here, returning when `shutdown` is cancelled
///         Ok::<(), std::io::Error>(())
///     });
///
///     runner.run().await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Root cancellation token; workers get child tokens.
    shutdown: CancellationToken,
    /// Spawned workers.
    workers: JoinSet<WorkerExit>,
    /// Grace period for workers after cancellation.
    shutdown_timeout: Duration,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner without touching global logging state.
    pub fn new(name: impl Into<String>, config: C) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            shutdown: CancellationToken::new(),
            workers: JoinSet::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Create a new bridge runner and initialize logging.
    ///
    /// The log level comes from the configuration unless overridden by
    /// `--log-level` in `args`.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let level_override = args.and_then(|args| args.log_level.as_deref());
        let log_config = config.logging().with_level_override(level_override);

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        let runner = Self::new(name, config);
        tracing::info!(bridge = %runner.name, version = %runner.version, "Starting bridge");

        Ok(runner)
    }

    /// Override how long shutdown waits for workers before aborting them.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Spawn a named worker task.
    ///
    /// The worker receives a token that is cancelled on shutdown and is
    /// expected to return promptly once it fires. A worker returning before
    /// shutdown was requested stops the whole bridge.
    pub fn spawn<F, Fut, E>(&mut self, name: impl Into<String>, worker: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let future = worker(self.shutdown.child_token());

        tracing::debug!(worker = %name, "Spawning worker");

        self.workers.spawn(async move {
            let outcome = future.await.map_err(|e| e.to_string());
            WorkerExit { name, outcome }
        });
    }

    /// Run the bridge until Ctrl+C / SIGTERM is received or a worker stops.
    ///
    /// This will:
    /// 1. Wait for a shutdown signal or the first worker exit
    /// 2. Cancel all workers and wait for them (bounded by the shutdown timeout)
    /// 3. Return an error if a worker stopped on its own
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the bridge until `signal` completes or a worker stops.
    pub async fn run_until<S>(mut self, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tracing::info!(
            bridge = %self.name,
            workers = self.workers.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        let early_exit = tokio::select! {
            _ = signal => {
                tracing::info!(bridge = %self.name, "Received shutdown signal");
                None
            }
            Some(joined) = self.workers.join_next() => Some(joined),
        };

        let failure = early_exit.map(worker_failure);

        self.shutdown.cancel();
        self.drain_workers().await;

        tracing::info!(bridge = %self.name, "Goodbye!");

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait for cancelled workers, aborting stragglers after the timeout.
    async fn drain_workers(&mut self) {
        let workers = &mut self.workers;
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(WorkerExit {
                        name,
                        outcome: Err(e),
                    }) => {
                        tracing::warn!(worker = %name, error = %e, "Worker failed during shutdown");
                    }
                    Ok(WorkerExit { name, .. }) => {
                        tracing::debug!(worker = %name, "Worker stopped");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Worker panicked during shutdown");
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = self.workers.len(),
                "Timed out waiting for workers, aborting"
            );
            self.workers.abort_all();
        }
    }
}

/// Turn a worker that exited before shutdown into a bridge error.
fn worker_failure(joined: std::result::Result<WorkerExit, JoinError>) -> BridgeError {
    match joined {
        Ok(WorkerExit {
            name,
            outcome: Ok(()),
        }) => {
            tracing::error!(worker = %name, "Worker stopped unexpectedly");
            BridgeError::worker(format!("{} stopped unexpectedly", name))
        }
        Ok(WorkerExit {
            name,
            outcome: Err(e),
        }) => {
            tracing::error!(worker = %name, error = %e, "Worker failed");
            BridgeError::worker(format!("{}: {}", name, e))
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker panicked");
            BridgeError::worker(e.to_string())
        }
    }
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
