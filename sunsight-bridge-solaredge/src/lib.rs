//! SunSight bridge for SolarEdge inverters.
//!
//! Polls an inverter over Modbus TCP, keeps the latest photovoltaic status in
//! memory, pushes every reading to subscribers and serves it over HTTP.
//!
//! # Registers
//!
//! ```text
//! 40083 x1  AC power
//! 40084 x1  AC power scale factor
//! 62852 x2  battery state of energy (float32)
//! 62854 x2  battery status
//! ```
//!
//! # HTTP
//!
//! ```text
//! GET /api/v1/photovoltaic   latest status, 503 while unavailable
//! GET /healthz               200 "Healthy" / 503 "Unhealthy"
//! ```

pub mod config;
pub mod http;
pub mod poller;
pub mod protocol;
pub mod status;
pub mod subscribers;
pub mod transport;
pub mod value;
