//! Control plane constants
//!
//! This module centralizes the defaults and bounds used across the crate.
//! Configuration values are validated against the MIN/MAX pairs below.

// ===== Broker Defaults =====

/// Default bootstrap broker list
pub const DEFAULT_BROKERS: &str = "localhost:9092";

/// Default consumer group id
pub const DEFAULT_GROUP_ID: &str = "godev-kit-group";

/// Default topic for user lifecycle events
pub const DEFAULT_USER_EVENTS_TOPIC: &str = "user-events";

/// Default topic for translation events
pub const DEFAULT_TRANSLATION_EVENTS_TOPIC: &str = "translation-events";

/// Group used by the user event consumer
pub const USER_EVENTS_GROUP_ID: &str = "user-events-consumer";

/// Group used by the translation event consumer
pub const TRANSLATION_EVENTS_GROUP_ID: &str = "translation-events-consumer";

// ===== Control Flag Defaults =====

/// Producer is enabled at process start unless configured otherwise
pub const DEFAULT_PRODUCER_ENABLED: bool = true;

/// Consumer is enabled at process start unless configured otherwise
pub const DEFAULT_CONSUMER_ENABLED: bool = true;

// ===== Producer Settings =====

/// Default time librdkafka may spend delivering one message (milliseconds)
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;
pub const MIN_MESSAGE_TIMEOUT_MS: u64 = 100;
pub const MAX_MESSAGE_TIMEOUT_MS: u64 = 300_000;

/// Default broker request timeout (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

/// Acknowledgments required per send: one replica
pub const PRODUCER_ACKS: &str = "1";

/// Partitioner used by the rdkafka producer (Java-client compatible murmur2)
pub const PRODUCER_PARTITIONER: &str = "murmur2_random";

// ===== Consumer Settings =====

/// Default consumer group session timeout (milliseconds)
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 10_000;
pub const MIN_SESSION_TIMEOUT_MS: u64 = 1_000;
pub const MAX_SESSION_TIMEOUT_MS: u64 = 300_000;

/// Where a new consumer group starts reading
pub const DEFAULT_AUTO_OFFSET_RESET: &str = "earliest";

/// Minimum bytes a fetch waits for (10KB)
pub const DEFAULT_FETCH_MIN_BYTES: u32 = 10_000;

/// Maximum bytes per fetch (10MB)
pub const DEFAULT_FETCH_MAX_BYTES: u32 = 10_000_000;

/// Pause after a transient read error before the loop reads again (milliseconds)
pub const READ_ERROR_BACKOFF_MS: u64 = 100;

// ===== Lifecycle =====

/// How long close() waits for spawned consumption loops to finish (milliseconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
pub const MIN_SHUTDOWN_TIMEOUT_MS: u64 = 100;
pub const MAX_SHUTDOWN_TIMEOUT_MS: u64 = 60_000;

// ===== In-memory Broker =====

/// Partitions created per topic by the in-memory broker
pub const DEFAULT_MEMORY_PARTITIONS: i32 = 3;

// ===== Logging =====

/// Default tracing filter when RUST_LOG is not set
pub const DEFAULT_LOG_LEVEL: &str = "info";
