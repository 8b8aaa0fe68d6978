// Configuration module for kafka_ctl
//
// Settings come from environment variables (Config::from_env) or a TOML file
// (Config::from_file). Both start from the same defaults, and both go through
// Config::validate before anything is built from them.
//
// The control flags here are only the process-start defaults. At runtime
// they live in the manager's ControlFlags and are never written back.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::kafka::constants::{
    DEFAULT_AUTO_OFFSET_RESET, DEFAULT_BROKERS, DEFAULT_CONSUMER_ENABLED, DEFAULT_FETCH_MAX_BYTES,
    DEFAULT_FETCH_MIN_BYTES, DEFAULT_GROUP_ID, DEFAULT_LOG_LEVEL, DEFAULT_MESSAGE_TIMEOUT_MS,
    DEFAULT_PRODUCER_ENABLED, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SESSION_TIMEOUT_MS,
    DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_TRANSLATION_EVENTS_TOPIC, DEFAULT_USER_EVENTS_TOPIC,
    MAX_MESSAGE_TIMEOUT_MS, MAX_REQUEST_TIMEOUT_MS, MAX_SESSION_TIMEOUT_MS,
    MAX_SHUTDOWN_TIMEOUT_MS, MIN_MESSAGE_TIMEOUT_MS, MIN_REQUEST_TIMEOUT_MS,
    MIN_SESSION_TIMEOUT_MS, MIN_SHUTDOWN_TIMEOUT_MS,
};
use crate::kafka::error::{KafkaError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracing filter used when RUST_LOG is not set
    pub log_level: String,
    pub kafka: KafkaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            kafka: KafkaConfig::default(),
        }
    }
}

/// Which transport the manager talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// A real Kafka-compatible cluster via librdkafka
    #[default]
    Kafka,
    /// The in-process broker (no cluster needed)
    Memory,
}

impl TransportKind {
    /// Parse from config string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kafka" => Some(TransportKind::Kafka),
            "memory" => Some(TransportKind::Memory),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Kafka => "kafka",
            TransportKind::Memory => "memory",
        }
    }
}

/// Broker connection and control plane settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap brokers ("host:port")
    pub brokers: Vec<String>,
    /// Default consumer group id
    pub group_id: String,
    pub topics: TopicsConfig,
    pub control: ControlConfig,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
    pub security: SecurityConfig,
    /// How long close() waits for running loops (milliseconds)
    pub shutdown_timeout_ms: u64,
    pub transport: TransportKind,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec![DEFAULT_BROKERS.to_string()],
            group_id: DEFAULT_GROUP_ID.to_string(),
            topics: TopicsConfig::default(),
            control: ControlConfig::default(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            security: SecurityConfig::default(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            transport: TransportKind::default(),
        }
    }
}

impl KafkaConfig {
    /// Brokers joined the way librdkafka expects them
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Topic names used by the event use cases
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub user_events: String,
    pub translation_events: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            user_events: DEFAULT_USER_EVENTS_TOPIC.to_string(),
            translation_events: DEFAULT_TRANSLATION_EVENTS_TOPIC.to_string(),
        }
    }
}

/// Process-start values of the runtime control flags
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub producer_enabled: bool,
    pub consumer_enabled: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            producer_enabled: DEFAULT_PRODUCER_ENABLED,
            consumer_enabled: DEFAULT_CONSUMER_ENABLED,
        }
    }
}

/// Producer tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Upper bound on one send, from enqueue to acknowledgment
    pub message_timeout_ms: u64,
    /// Broker request timeout
    pub request_timeout_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Consumer tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub session_timeout_ms: u64,
    /// "earliest" or "latest"
    pub auto_offset_reset: String,
    pub fetch_min_bytes: u32,
    pub fetch_max_bytes: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            auto_offset_reset: DEFAULT_AUTO_OFFSET_RESET.to_string(),
            fetch_min_bytes: DEFAULT_FETCH_MIN_BYTES,
            fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
        }
    }
}

/// Broker authentication
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// PLAINTEXT, SSL, SASL_PLAINTEXT or SASL_SSL
    pub protocol: String,
    /// PLAIN, SCRAM-SHA-256 or SCRAM-SHA-512
    pub sasl_mechanism: String,
    pub sasl_username: String,
    pub sasl_password: String,
    /// CA certificate for *_SSL protocols
    pub ssl_ca_location: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            protocol: "PLAINTEXT".to_string(),
            sasl_mechanism: "PLAIN".to_string(),
            sasl_username: String::new(),
            sasl_password: String::new(),
            ssl_ca_location: String::new(),
        }
    }
}

/// Custom Debug implementation that redacts sensitive credentials
impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("protocol", &self.protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            // REDACT sensitive credentials to prevent log exposure
            .field("sasl_username", &"[REDACTED]")
            .field("sasl_password", &"[REDACTED]")
            .field("ssl_ca_location", &self.ssl_ca_location)
            .finish()
    }
}

const VALID_SECURITY_PROTOCOLS: [&str; 4] = ["PLAINTEXT", "SSL", "SASL_PLAINTEXT", "SASL_SSL"];
const VALID_OFFSET_RESETS: [&str; 2] = ["earliest", "latest"];

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, test map)
    ///
    /// Unset keys keep their defaults. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let kafka = &mut config.kafka;

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(brokers) = lookup("KAFKA_BROKERS") {
            kafka.brokers = split_brokers(&brokers);
        }
        if let Some(group_id) = lookup("KAFKA_GROUP_ID") {
            kafka.group_id = group_id;
        }
        if let Some(topic) = lookup("KAFKA_TOPICS_USER_EVENTS") {
            kafka.topics.user_events = topic;
        }
        if let Some(topic) = lookup("KAFKA_TOPICS_TRANSLATION_EVENTS") {
            kafka.topics.translation_events = topic;
        }
        if let Some(v) = lookup("KAFKA_CONTROL_PRODUCER_ENABLED") {
            kafka.control.producer_enabled = parse_bool("KAFKA_CONTROL_PRODUCER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("KAFKA_CONTROL_CONSUMER_ENABLED") {
            kafka.control.consumer_enabled = parse_bool("KAFKA_CONTROL_CONSUMER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("KAFKA_PRODUCER_MESSAGE_TIMEOUT_MS") {
            kafka.producer.message_timeout_ms = parse_num("KAFKA_PRODUCER_MESSAGE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KAFKA_PRODUCER_REQUEST_TIMEOUT_MS") {
            kafka.producer.request_timeout_ms = parse_num("KAFKA_PRODUCER_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KAFKA_CONSUMER_SESSION_TIMEOUT_MS") {
            kafka.consumer.session_timeout_ms = parse_num("KAFKA_CONSUMER_SESSION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KAFKA_CONSUMER_AUTO_OFFSET_RESET") {
            kafka.consumer.auto_offset_reset = v.to_lowercase();
        }
        if let Some(v) = lookup("KAFKA_SECURITY_PROTOCOL") {
            kafka.security.protocol = v.to_uppercase();
        }
        if let Some(v) = lookup("KAFKA_SASL_MECHANISM") {
            kafka.security.sasl_mechanism = v;
        }
        if let Some(v) = lookup("KAFKA_SASL_USERNAME") {
            kafka.security.sasl_username = v;
        }
        if let Some(v) = lookup("KAFKA_SASL_PASSWORD") {
            kafka.security.sasl_password = v;
        }
        if let Some(v) = lookup("KAFKA_SSL_CA_LOCATION") {
            kafka.security.ssl_ca_location = v;
        }
        if let Some(v) = lookup("KAFKA_SHUTDOWN_TIMEOUT_MS") {
            kafka.shutdown_timeout_ms = parse_num("KAFKA_SHUTDOWN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KAFKA_TRANSPORT") {
            kafka.transport = TransportKind::parse(&v).ok_or_else(|| {
                KafkaError::InvalidConfig(format!("KAFKA_TRANSPORT: unknown transport '{}'", v))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)
            .map_err(|e| KafkaError::InvalidConfig(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            KafkaError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Check every setting against its allowed range
    pub fn validate(&self) -> Result<()> {
        let kafka = &self.kafka;

        if kafka.brokers.is_empty() {
            return Err(KafkaError::InvalidConfig(
                "kafka brokers are required".to_string(),
            ));
        }
        if kafka.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(KafkaError::InvalidConfig(
                "kafka broker address must not be blank".to_string(),
            ));
        }
        if kafka.group_id.trim().is_empty() {
            return Err(KafkaError::InvalidConfig(
                "kafka group ID is required".to_string(),
            ));
        }

        check_range(
            "producer.message_timeout_ms",
            kafka.producer.message_timeout_ms,
            MIN_MESSAGE_TIMEOUT_MS,
            MAX_MESSAGE_TIMEOUT_MS,
        )?;
        check_range(
            "producer.request_timeout_ms",
            kafka.producer.request_timeout_ms,
            MIN_REQUEST_TIMEOUT_MS,
            MAX_REQUEST_TIMEOUT_MS,
        )?;
        check_range(
            "consumer.session_timeout_ms",
            kafka.consumer.session_timeout_ms,
            MIN_SESSION_TIMEOUT_MS,
            MAX_SESSION_TIMEOUT_MS,
        )?;
        check_range(
            "shutdown_timeout_ms",
            kafka.shutdown_timeout_ms,
            MIN_SHUTDOWN_TIMEOUT_MS,
            MAX_SHUTDOWN_TIMEOUT_MS,
        )?;

        if !VALID_OFFSET_RESETS.contains(&kafka.consumer.auto_offset_reset.as_str()) {
            return Err(KafkaError::InvalidConfig(format!(
                "consumer.auto_offset_reset must be one of {:?}, got '{}'",
                VALID_OFFSET_RESETS, kafka.consumer.auto_offset_reset
            )));
        }
        if kafka.consumer.fetch_min_bytes == 0
            || kafka.consumer.fetch_min_bytes > kafka.consumer.fetch_max_bytes
        {
            return Err(KafkaError::InvalidConfig(format!(
                "consumer fetch bytes must satisfy 0 < min ({}) <= max ({})",
                kafka.consumer.fetch_min_bytes, kafka.consumer.fetch_max_bytes
            )));
        }
        if !VALID_SECURITY_PROTOCOLS.contains(&kafka.security.protocol.as_str()) {
            return Err(KafkaError::InvalidConfig(format!(
                "security.protocol must be one of {:?}, got '{}'",
                VALID_SECURITY_PROTOCOLS, kafka.security.protocol
            )));
        }

        Ok(())
    }
}

fn split_brokers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(KafkaError::InvalidConfig(format!(
            "{}: expected a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        KafkaError::InvalidConfig(format!("{}: expected a number, got '{}'", key, value))
    })
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(KafkaError::InvalidConfig(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}
