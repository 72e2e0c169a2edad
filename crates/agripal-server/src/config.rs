//! Server configuration loading from file and environment variables.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use agripal_broker::BrokerSettings;
use serde::Deserialize;
use thiserror::Error;

use crate::hub::{HubSettings, SlowConsumerPolicy};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// MQTT broker connection.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Telemetry retention.
    #[serde(default)]
    pub store: StoreConfig,

    /// Live fanout.
    #[serde(default)]
    pub hub: HubConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "agripal_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// MQTT broker settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Connect over TLS (`mqtts`).
    #[serde(default = "default_true")]
    pub tls: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Wildcard topic subscribed after every connect.
    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Decoded samples buffered between the broker link and the store.
    #[serde(default = "default_ingest_queue")]
    pub ingest_queue: usize,
}

/// Retention settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Readings kept per sensor.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

/// Live fanout settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Events buffered per live subscriber.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    /// `"disconnect"` or `"drop"`.
    #[serde(default)]
    pub slow_consumer: SlowConsumerPolicy,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    8883
}

fn default_true() -> bool {
    true
}

fn default_client_id_prefix() -> String {
    "agripal_backend_".to_string()
}

fn default_topic() -> String {
    "agripal/#".to_string()
}

fn default_reconnect_interval_secs() -> u64 {
    5
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_ingest_queue() -> usize {
    1024
}

fn default_history_capacity() -> usize {
    agripal_store::DEFAULT_HISTORY_CAPACITY
}

fn default_subscriber_queue() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            tls: true,
            username: None,
            password: None,
            client_id_prefix: default_client_id_prefix(),
            topic: default_topic(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            keep_alive_secs: default_keep_alive_secs(),
            ingest_queue: default_ingest_queue(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_queue: default_subscriber_queue(),
            slow_consumer: SlowConsumerPolicy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            host: self.host.clone(),
            port: self.port,
            tls: self.tls,
            username: self.username.clone(),
            password: self.password.clone(),
            client_id_prefix: self.client_id_prefix.clone(),
            topic: self.topic.clone(),
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
        }
    }
}

impl HubConfig {
    pub fn settings(&self) -> HubSettings {
        HubSettings {
            queue_capacity: self.subscriber_queue,
            slow_consumer: self.slow_consumer,
        }
    }
}

impl Config {
    /// Rejects values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "store.history_capacity must be at least 1".to_string(),
            ));
        }
        if self.hub.subscriber_queue == 0 {
            return Err(ConfigError::Invalid(
                "hub.subscriber_queue must be at least 1".to_string(),
            ));
        }
        if self.broker.ingest_queue == 0 {
            return Err(ConfigError::Invalid(
                "broker.ingest_queue must be at least 1".to_string(),
            ));
        }
        self.broker
            .settings()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("broker: {e}")))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `AGRIPAL_HOST` overrides `server.host`
/// - `AGRIPAL_PORT` overrides `server.port`
/// - `AGRIPAL_LOG_LEVEL` overrides `logging.level`
/// - `AGRIPAL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `AGRIPAL_MQTT_HOST`, `AGRIPAL_MQTT_PORT`, `AGRIPAL_MQTT_TLS`,
///   `AGRIPAL_MQTT_USERNAME`, `AGRIPAL_MQTT_PASSWORD`, `AGRIPAL_MQTT_TOPIC`
///   override the matching `broker` keys
///
/// The result is validated before it is returned.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the merged configuration is invalid.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

/// Applies `AGRIPAL_*` overrides obtained through `var`.
///
/// Unparseable numeric or address values are ignored.
pub fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = var("AGRIPAL_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("AGRIPAL_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(level) = var("AGRIPAL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("AGRIPAL_LOG_JSON") {
        config.logging.json = is_truthy(&json);
    }

    if let Some(host) = var("AGRIPAL_MQTT_HOST") {
        config.broker.host = host;
    }
    if let Some(parsed) = var("AGRIPAL_MQTT_PORT").and_then(|v| v.parse().ok()) {
        config.broker.port = parsed;
    }
    if let Some(tls) = var("AGRIPAL_MQTT_TLS") {
        config.broker.tls = is_truthy(&tls);
    }
    if let Some(username) = var("AGRIPAL_MQTT_USERNAME") {
        config.broker.username = Some(username);
    }
    if let Some(password) = var("AGRIPAL_MQTT_PASSWORD") {
        config.broker.password = Some(password);
    }
    if let Some(topic) = var("AGRIPAL_MQTT_TOPIC") {
        config.broker.topic = topic;
    }
}

fn is_truthy(value: &str) -> bool {
    value == "true" || value == "1"
}
