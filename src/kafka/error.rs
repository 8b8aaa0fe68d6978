//! Control plane error types
//!
//! This module defines a single error type for every operation the control
//! plane exposes. Variants follow the taxonomy the callers care about:
//! registration mistakes, gate rejections, transport failures and the
//! expected timeout of an ephemeral consume.

use thiserror::Error;

/// Errors that can occur while producing, consuming or managing consumers
#[derive(Error, Debug)]
pub enum KafkaError {
    /// The value could not be serialized by the message codec
    #[error("Failed to encode message value: {0}")]
    Encode(#[from] serde_json::Error),

    /// The broker could not be reached or rejected the request
    #[error("Broker unavailable for topic {topic}: {cause}")]
    BrokerUnavailable { topic: String, cause: String },

    /// The broker did not acknowledge a write in time
    #[error("Timed out writing to topic {topic}: {cause}")]
    WriteTimeout { topic: String, cause: String },

    /// A consumer is already registered for this topic
    #[error("Consumer for topic {0} already exists")]
    DuplicateConsumer(String),

    /// No consumer is registered for this topic
    #[error("Consumer for topic {0} not found")]
    NotRegistered(String),

    /// The consumer gate is closed
    #[error("Kafka consumer is disabled")]
    ConsumptionDisabled,

    /// The producer gate is closed
    #[error("Kafka producer is disabled")]
    ProductionDisabled,

    /// No message arrived before the caller's deadline
    #[error("No message received from topic {0} before the deadline")]
    ConsumeTimeout(String),

    /// The consumer connection is gone; the loop cannot continue
    #[error("Connection lost while reading topic {topic}: {cause}")]
    ConnectionLost { topic: String, cause: String },

    /// A single read failed; the loop may retry
    #[error("Failed to read message from topic {topic}: {cause}")]
    ReadFailed { topic: String, cause: String },

    /// start() was called on a loop that is already running
    #[error("Consumer for topic {0} is already running")]
    AlreadyRunning(String),

    /// Consumption loops did not stop within the shutdown timeout
    #[error("Shutdown timed out after {0}ms")]
    ShutdownTimeout(u64),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Broker client could not be created or configured
    #[error("Kafka client error: {0}")]
    Client(String),
}

/// Who can fix an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFault {
    /// The caller can correct this (toggle a flag, retry later, wait longer)
    Client,
    /// Something is wrong on the server side
    Server,
}

impl KafkaError {
    /// Classify this error for the HTTP layer
    ///
    /// Gate and timeout errors are expected outcomes the caller can act on;
    /// everything else is a server fault.
    pub fn fault(&self) -> ErrorFault {
        match self {
            KafkaError::ProductionDisabled
            | KafkaError::ConsumptionDisabled
            | KafkaError::ConsumeTimeout(_) => ErrorFault::Client,
            KafkaError::Encode(_)
            | KafkaError::BrokerUnavailable { .. }
            | KafkaError::WriteTimeout { .. }
            | KafkaError::DuplicateConsumer(_)
            | KafkaError::NotRegistered(_)
            | KafkaError::ConnectionLost { .. }
            | KafkaError::ReadFailed { .. }
            | KafkaError::AlreadyRunning(_)
            | KafkaError::ShutdownTimeout(_)
            | KafkaError::InvalidConfig(_)
            | KafkaError::Client(_) => ErrorFault::Server,
        }
    }

    /// Convert this error to an HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            // "try again" once the gate is reopened
            KafkaError::ProductionDisabled | KafkaError::ConsumptionDisabled => 409,
            KafkaError::ConsumeTimeout(_) => 408,
            KafkaError::BrokerUnavailable { .. } | KafkaError::ConnectionLost { .. } => 503,
            KafkaError::WriteTimeout { .. } => 504,
            KafkaError::Encode(_)
            | KafkaError::DuplicateConsumer(_)
            | KafkaError::NotRegistered(_)
            | KafkaError::ReadFailed { .. }
            | KafkaError::AlreadyRunning(_)
            | KafkaError::ShutdownTimeout(_)
            | KafkaError::InvalidConfig(_)
            | KafkaError::Client(_) => 500,
        }
    }

    /// Whether retrying the same call later can succeed without other changes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KafkaError::ProductionDisabled
                | KafkaError::ConsumptionDisabled
                | KafkaError::ConsumeTimeout(_)
                | KafkaError::BrokerUnavailable { .. }
                | KafkaError::WriteTimeout { .. }
                | KafkaError::ReadFailed { .. }
        )
    }

    /// Whether a consumption loop must stop after this read error
    pub fn is_fatal_read(&self) -> bool {
        matches!(self, KafkaError::ConnectionLost { .. })
    }
}

/// Result type alias for control plane operations
pub type Result<T> = std::result::Result<T, KafkaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KafkaError::DuplicateConsumer("orders".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("orders"));
        assert!(msg.contains("already exists"));
    }

    #[test]
    fn test_transport_error_keeps_cause() {
        let err = KafkaError::BrokerUnavailable {
            topic: "orders".to_string(),
            cause: "all brokers down".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("orders"));
        assert!(msg.contains("all brokers down"));
    }

    #[test]
    fn test_encode_error_conversion() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: KafkaError = json_err.into();
        assert!(matches!(err, KafkaError::Encode(_)));
        assert!(format!("{}", err).contains("encode"));
    }

    #[test]
    fn test_gate_and_timeout_errors_are_client_faults() {
        assert_eq!(KafkaError::ProductionDisabled.fault(), ErrorFault::Client);
        assert_eq!(KafkaError::ConsumptionDisabled.fault(), ErrorFault::Client);
        assert_eq!(
            KafkaError::ConsumeTimeout("t".to_string()).fault(),
            ErrorFault::Client
        );
    }

    #[test]
    fn test_registration_and_transport_errors_are_server_faults() {
        let errors = vec![
            KafkaError::DuplicateConsumer("t".to_string()),
            KafkaError::NotRegistered("t".to_string()),
            KafkaError::BrokerUnavailable {
                topic: "t".to_string(),
                cause: "down".to_string(),
            },
            KafkaError::WriteTimeout {
                topic: "t".to_string(),
                cause: "slow".to_string(),
            },
        ];

        for err in errors {
            assert_eq!(err.fault(), ErrorFault::Server, "{}", err);
            assert!(err.status_code() >= 500, "{}", err);
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(KafkaError::ProductionDisabled.status_code(), 409);
        assert_eq!(KafkaError::ConsumptionDisabled.status_code(), 409);
        assert_eq!(KafkaError::ConsumeTimeout("t".to_string()).status_code(), 408);
        assert_eq!(KafkaError::NotRegistered("t".to_string()).status_code(), 500);
    }

    #[test]
    fn test_only_connection_lost_is_fatal() {
        let lost = KafkaError::ConnectionLost {
            topic: "t".to_string(),
            cause: "closed".to_string(),
        };
        let transient = KafkaError::ReadFailed {
            topic: "t".to_string(),
            cause: "rebalance".to_string(),
        };
        assert!(lost.is_fatal_read());
        assert!(!transient.is_fatal_read());
        assert!(transient.is_retryable());
        assert!(!lost.is_retryable());
    }
}
