use std::time::Duration;

use common_kafka::producer::KafkaProduceError;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Everything that can escape the innermost stage of a delivery chain.
///
/// These are raw causes, not dispositions - the classification stage maps
/// them onto a [`crate::context::FailureKind`], and everything above that
/// stage only ever sees the classification.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("kafka produce error: {0}")]
    Produce(#[from] KafkaProduceError),
    #[error("unrecognized event type: {0}")]
    UnrecognizedEvent(String),
    #[error("bad payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("circuit open, dependency calls suspended")]
    CircuitOpen,
    #[error("fatal: {0}")]
    Fatal(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Short type tag, used in dead letter records and metric labels.
    pub fn kind_name(&self) -> &'static str {
        match self {
            HandlerError::Timeout(_) => "Timeout",
            HandlerError::Kafka(_) => "Kafka",
            HandlerError::Produce(_) => "Produce",
            HandlerError::UnrecognizedEvent(_) => "UnrecognizedEvent",
            HandlerError::Payload(_) => "Payload",
            HandlerError::CircuitOpen => "CircuitOpen",
            HandlerError::Fatal(_) => "Fatal",
            HandlerError::Other(_) => "Other",
        }
    }
}

/// Errors raised while wiring the service up, before the consume loop starts.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("config error: {0}")]
    Config(#[from] envconfig::Error),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}
