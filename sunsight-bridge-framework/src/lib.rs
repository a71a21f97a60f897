//! SunSight Bridge Framework
//!
//! Common abstractions for building bridges that poll field devices and
//! expose their readings.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, worker supervision, shutdown)
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use sunsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!
//!     // Spawn device workers
//!     runner.spawn("poller", |shutdown| my_worker(shutdown));
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use runner::BridgeRunner;

// Re-export commonly used types from sunsight-common
pub use sunsight_common::{LogFormat, LoggingConfig};
pub use tokio_util::sync::CancellationToken;
