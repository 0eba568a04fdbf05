//! Configuration for the Kea exporter.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::mapping::DEFAULT_PREFIX;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Kea Control Agent settings.
    #[serde(default)]
    pub kea: KeaConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Kea Control Agent connection and polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeaConfig {
    /// Control Agent URL, e.g. `http://kea.example.com:8000`.
    #[serde(default)]
    pub target: Option<String>,

    /// Seconds between update cycles (default: 10).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Per-request timeout in seconds (default: 10).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Upper bound for `interval_secs` and `timeout_secs` (one day).
pub const MAX_DURATION_SECS: u64 = 86_400;

fn default_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    10
}

impl Default for KeaConfig {
    fn default() -> Self {
        Self {
            target: None,
            interval_secs: default_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

impl KeaConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0").
    #[serde(default = "default_address")]
    pub address: String,

    /// Port to listen on (default: 9547).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "kea").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9547
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            path: default_path(),
            prefix: default_prefix(),
        }
    }
}

impl PrometheusConfig {
    /// Socket address to bind the HTTP server to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.address.parse().map_err(|_| {
            ConfigError::Validation(format!("Invalid listen address: {}", self.address))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// The file is not validated here; callers apply CLI overrides first and
    /// then call [`validate`](Self::validate).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(json5::from_str(&content)?)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The Control Agent URL, once validated.
    pub fn target(&self) -> Result<&str, ConfigError> {
        self.kea
            .target
            .as_deref()
            .ok_or_else(|| ConfigError::Validation("Kea target is not set".to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let target = self.target()?;
        if !(target.starts_with("http://") || target.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "Kea target must be an http(s) URL: {}",
                target
            )));
        }

        for (name, secs) in [
            ("interval_secs", self.kea.interval_secs),
            ("timeout_secs", self.kea.timeout_secs),
        ] {
            if secs == 0 || secs > MAX_DURATION_SECS {
                return Err(ConfigError::Validation(format!(
                    "{} must be between 1 and {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }

        self.prometheus.listen_addr()?;

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.prometheus.prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Metric prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{ kea: { target: "http://127.0.0.1:8000" } }"#;
        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.target().unwrap(), "http://127.0.0.1:8000");
        assert_eq!(config.kea.interval_secs, 10);
        assert_eq!(config.kea.timeout_secs, 10);
        assert_eq!(config.prometheus.port, 9547);
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.prefix, "kea");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            kea: {
                target: "https://kea.example.com:8000/",
                interval_secs: 30,
                timeout_secs: 5,
            },
            prometheus: {
                address: "::",
                port: 9100,
                path: "/kea/metrics",
                prefix: "isc",
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.kea.interval(), Duration::from_secs(30));
        assert_eq!(config.kea.timeout(), Duration::from_secs(5));
        assert_eq!(
            config.prometheus.listen_addr().unwrap(),
            "[::]:9100".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.prometheus.path, "/kea/metrics");
        assert_eq!(config.prometheus.prefix, "isc");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_missing_target() {
        let err = ExporterConfig::parse("{}").unwrap_err();
        assert!(err.to_string().contains("target is not set"));
    }

    #[test]
    fn test_validate_non_http_target() {
        let json = r#"{ kea: { target: "kea.example.com:8000" } }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("http(s) URL"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let json = r#"{ kea: { target: "http://kea", interval_secs: 0 } }"#;
        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let json = r#"{ kea: { target: "http://kea", timeout_secs: 0 } }"#;
        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_huge_timeout() {
        let mut config = ExporterConfig::default();
        config.kea.target = Some("http://kea".to_string());
        config.kea.timeout_secs = u64::MAX;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_secs must be between 1 and 86400"));

        config.kea.timeout_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_huge_interval() {
        let json = r#"{ kea: { target: "http://kea", interval_secs: 86401 } }"#;
        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_invalid_address() {
        let json = r#"{
            kea: { target: "http://kea" },
            prometheus: { address: "not-an-address" }
        }"#;

        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("Invalid listen address"));
    }

    #[test]
    fn test_validate_invalid_path() {
        let json = r#"{
            kea: { target: "http://kea" },
            prometheus: { path: "no-leading-slash" }
        }"#;

        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("must start with /"));
    }

    #[test]
    fn test_validate_empty_prefix() {
        let json = r#"{
            kea: { target: "http://kea" },
            prometheus: { prefix: " " }
        }"#;

        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{ kea: {{ target: "http://10.0.0.1:8000" }}, prometheus: {{ port: 9999 }} }}"#
        )
        .unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.kea.target.as_deref(), Some("http://10.0.0.1:8000"));
        assert_eq!(config.prometheus.port, 9999);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ExporterConfig::load_from_file("/nonexistent/kea-exporter.json5").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
