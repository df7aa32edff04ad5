//! Configuration management for the mock CSMS

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mock CSMS configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// OCPP protocol configuration
    pub ocpp: OcppConfig,
    /// Audit log configuration
    pub audit: AuditConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address both listeners bind to
    pub bind_address: String,
    /// Charge point WebSocket port
    pub websocket_port: u16,
    /// Admin HTTP API port
    pub http_port: u16,
    /// Maximum concurrent charge point connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            websocket_port: 9000,
            http_port: 9090,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn websocket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.websocket_port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }
}

/// OCPP protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcppConfig {
    /// Sub-protocols offered during the WebSocket handshake
    pub sub_protocols: Vec<String>,
    /// Seconds an outbound call waits for its reply
    pub call_timeout_secs: u64,
    /// Largest accepted text frame in bytes
    pub max_message_size: usize,
    /// Interval advertised in the default BootNotification response
    pub heartbeat_interval: u64,
}

impl Default for OcppConfig {
    fn default() -> Self {
        Self {
            sub_protocols: vec![ocpp_types::OCPP16_SUBPROTOCOL.to_string()],
            call_timeout_secs: 30,
            max_message_size: 65536,
            heartbeat_interval: 300,
        }
    }
}

impl OcppConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum retained entries
    pub capacity: usize,
    /// Entries returned by the admin API when no limit is given
    pub default_limit: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            default_limit: 200,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics
    pub enabled: bool,
    /// Metrics namespace
    pub namespace: String,
    /// Histogram buckets for latency metrics
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "ocpp_mock_csms".to_string(),
            latency_buckets: vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ],
        }
    }
}

/// Configuration builder for easier setup
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    pub fn ocpp(mut self, ocpp: OcppConfig) -> Self {
        self.config.ocpp = ocpp;
        self
    }

    pub fn audit(mut self, audit: AuditConfig) -> Self {
        self.config.audit = audit;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Shortcut for the outbound call timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.ocpp.call_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &str) -> Result<Config, Box<dyn std::error::Error + Send + Sync>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration from environment variables on top of the defaults
pub fn load_from_env() -> Config {
    apply_env(Config::default())
}

/// Overlay environment variables onto an existing configuration
pub fn apply_env(mut config: Config) -> Config {
    if let Ok(address) = std::env::var("OCPP_BIND_ADDRESS") {
        if !address.is_empty() {
            config.server.bind_address = address;
        }
    }
    if let Some(port) = env_parse("WS_PORT") {
        config.server.websocket_port = port;
    }
    if let Some(port) = env_parse("PORT") {
        config.server.http_port = port;
    }
    if let Some(timeout) = env_parse("OCPP_CALL_TIMEOUT_SECS") {
        config.ocpp.call_timeout_secs = timeout;
    }
    if let Some(capacity) = env_parse("OCPP_AUDIT_CAPACITY") {
        config.audit.capacity = capacity;
    }
    if let Ok(level) = std::env::var("OCPP_LOG_LEVEL") {
        config.logging.level = level;
    }

    config
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), String> {
    if config.server.websocket_port == 0 {
        return Err("WebSocket port cannot be 0".to_string());
    }
    if config.server.http_port == 0 {
        return Err("HTTP port cannot be 0".to_string());
    }
    if config.server.websocket_port == config.server.http_port {
        return Err("WebSocket and HTTP ports must differ".to_string());
    }
    if config.server.max_connections == 0 {
        return Err("Max connections cannot be 0".to_string());
    }

    if config.ocpp.sub_protocols.is_empty() {
        return Err("At least one OCPP sub-protocol must be offered".to_string());
    }
    if config.ocpp.call_timeout_secs == 0 {
        return Err("Call timeout cannot be 0".to_string());
    }
    if config.ocpp.max_message_size == 0 {
        return Err("Max message size cannot be 0".to_string());
    }

    if config.audit.capacity == 0 {
        return Err("Audit log capacity cannot be 0".to_string());
    }

    if !matches!(config.logging.format.as_str(), "pretty" | "compact" | "json") {
        return Err(format!("Unknown log format: {}", config.logging.format));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.websocket_port, 9000);
        assert_eq!(config.server.http_port, 9090);
        assert_eq!(config.ocpp.sub_protocols, vec!["ocpp1.6".to_string()]);
        assert_eq!(config.ocpp.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.audit.capacity, 1000);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .server(ServerConfig {
                websocket_port: 19000,
                ..Default::default()
            })
            .call_timeout(Duration::from_secs(5))
            .build();

        assert_eq!(config.server.websocket_port, 19000);
        assert_eq!(config.ocpp.call_timeout_secs, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.server.websocket_port = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.server.http_port = config.server.websocket_port;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.ocpp.call_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.ocpp.sub_protocols.clear();
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.audit.capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            websocket_port = 9100

            [audit]
            capacity = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.server.websocket_port, 9100);
        assert_eq!(config.server.http_port, 9090);
        assert_eq!(config.audit.capacity, 50);
        assert_eq!(config.audit.default_limit, 200);
        assert_eq!(config.ocpp.heartbeat_interval, 300);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ocpp-mock-csms-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[ocpp]\ncall_timeout_secs = 7\n").unwrap();

        let config = load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.ocpp.call_timeout_secs, 7);

        std::fs::remove_file(&path).unwrap();
        assert!(load_from_file(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_load_from_env() {
        std::env::set_var("OCPP_AUDIT_CAPACITY", "42");
        let config = load_from_env();
        assert_eq!(config.audit.capacity, 42);
        std::env::remove_var("OCPP_AUDIT_CAPACITY");
    }

    #[test]
    fn test_bind_address_ignores_container_hostname() {
        std::env::set_var("HOSTNAME", "a1b2c3d4e5f6");
        assert_eq!(load_from_env().server.bind_address, "0.0.0.0");

        std::env::set_var("OCPP_BIND_ADDRESS", "127.0.0.1");
        assert_eq!(load_from_env().server.bind_address, "127.0.0.1");

        std::env::set_var("OCPP_BIND_ADDRESS", "");
        assert_eq!(load_from_env().server.bind_address, "0.0.0.0");
        std::env::remove_var("OCPP_BIND_ADDRESS");
    }
}
