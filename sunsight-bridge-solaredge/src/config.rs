//! Configuration for the SolarEdge bridge.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sunsight_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, Result};

use crate::poller::PollTiming;
use crate::protocol::DEFAULT_UNIT_ID;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarEdgeBridgeConfig {
    /// Inverter connection and polling settings
    pub inverter: InverterConfig,

    /// HTTP server settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Inverter connection and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverterConfig {
    /// Modbus TCP endpoint as `host:port`
    pub endpoint: String,

    /// Modbus unit ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Bound on connect + request + response, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Pause after a successful read, in seconds
    #[serde(default = "default_pacing_delay")]
    pub pacing_delay_secs: u64,

    /// Pause between attempts while the inverter is unreachable, in seconds
    #[serde(default = "default_backoff_delay")]
    pub backoff_delay_secs: u64,
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    30
}

fn default_pacing_delay() -> u64 {
    10
}

fn default_backoff_delay() -> u64 {
    30
}

impl InverterConfig {
    /// Poll loop timing.
    pub fn timing(&self) -> PollTiming {
        PollTiming {
            interval: Duration::from_secs(self.poll_interval_secs),
            pacing_delay: Duration::from_secs(self.pacing_delay_secs),
            backoff_delay: Duration::from_secs(self.backoff_delay_secs),
        }
    }

    /// Round trip timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        let Some((host, port)) = self.endpoint.rsplit_once(':') else {
            return Err(BridgeError::validation(format!(
                "inverter.endpoint '{}' must be host:port",
                self.endpoint
            )));
        };
        if host.is_empty() {
            return Err(BridgeError::validation("inverter.endpoint host is empty"));
        }
        if port.parse::<u16>().is_err() {
            return Err(BridgeError::validation(format!(
                "inverter.endpoint port '{}' is not a valid port",
                port
            )));
        }

        if !(1..=247).contains(&self.unit_id) {
            return Err(BridgeError::validation(format!(
                "inverter.unit_id {} must be 1-247",
                self.unit_id
            )));
        }

        if self.poll_interval_secs == 0 {
            return Err(BridgeError::validation(
                "inverter.poll_interval_secs must be greater than zero",
            ));
        }

        if self.timeout_ms == 0 {
            return Err(BridgeError::validation(
                "inverter.timeout_ms must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address (default: "0.0.0.0:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl HttpConfig {
    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            BridgeError::validation(format!("http.listen '{}' is invalid: {}", self.listen, e))
        })
    }
}

impl BridgeConfig for SolarEdgeBridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        self.inverter.validate()?;
        self.http.listen_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use sunsight_bridge_framework::LogFormat;

    fn parse(content: &str) -> SolarEdgeBridgeConfig {
        json5::from_str(content).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(r#"{ inverter: { endpoint: "192.168.1.50:1502" } }"#);

        assert_eq!(config.inverter.unit_id, 1);
        assert_eq!(config.inverter.timeout(), Duration::from_secs(5));
        assert_eq!(config.inverter.timing(), PollTiming::default());
        assert_eq!(config.http.listen, "0.0.0.0:8080");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"{
                inverter: {
                    endpoint: "inverter.local:502",
                    unit_id: 2,
                    timeout_ms: 1500,
                    poll_interval_secs: 60,
                    pacing_delay_secs: 5,
                    backoff_delay_secs: 15,
                },
                http: { listen: "127.0.0.1:9000" },
                logging: { level: "debug", format: "json" },
            }"#,
        );

        assert_eq!(config.inverter.unit_id, 2);
        assert_eq!(config.inverter.timeout(), Duration::from_millis(1500));
        assert_eq!(
            config.inverter.timing(),
            PollTiming {
                interval: Duration::from_secs(60),
                pacing_delay: Duration::from_secs(5),
                backoff_delay: Duration::from_secs(15),
            }
        );
        assert_eq!(
            config.http.listen_addr().unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_endpoint() {
        let result: std::result::Result<SolarEdgeBridgeConfig, _> =
            json5::from_str("{ inverter: { unit_id: 1 } }");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            r#"{ inverter: { endpoint: "192.168.1.50" } }"#,
            r#"{ inverter: { endpoint: ":1502" } }"#,
            r#"{ inverter: { endpoint: "host:port" } }"#,
            r#"{ inverter: { endpoint: "host:1502", unit_id: 0 } }"#,
            r#"{ inverter: { endpoint: "host:1502", unit_id: 248 } }"#,
            r#"{ inverter: { endpoint: "host:1502", poll_interval_secs: 0 } }"#,
            r#"{ inverter: { endpoint: "host:1502", timeout_ms: 0 } }"#,
            r#"{ inverter: { endpoint: "host:1502" }, http: { listen: "localhost" } }"#,
        ];

        for case in cases {
            let err = parse(case).validate().unwrap_err();
            assert!(
                matches!(err, BridgeError::ConfigValidation(_)),
                "{} gave {:?}",
                case,
                err
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{ inverter: {{ endpoint: "10.0.0.5:1502" }}, logging: {{ level: "warn" }} }}"#
        )
        .unwrap();

        let config = SolarEdgeBridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.inverter.endpoint, "10.0.0.5:1502");
        assert_eq!(config.logging().level, "warn");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ inverter: {{ endpoint: "10.0.0.5" }} }}"#).unwrap();

        let err = SolarEdgeBridgeConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigValidation(_)));
    }
}
