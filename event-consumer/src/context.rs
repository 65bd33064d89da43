use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;

/// The outcome classification of one delivery attempt. `None` means success.
///
/// Stages communicate purely through this field - the raw error behind a
/// classification is carried alongside for dead letter capture, but no
/// stage above the classification boundary inspects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    None,
    Transient,
    Permanent,
    DependencyDown,
    Fatal,
}

impl FailureKind {
    /// Terminal failures are dead-lettered and committed, never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureKind::Permanent | FailureKind::Fatal)
    }

    /// Retryable failures are re-attempted, then redelivered if the
    /// attempt budget runs out without a terminal disposition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::DependencyDown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::None => "None",
            FailureKind::Transient => "Transient",
            FailureKind::Permanent => "Permanent",
            FailureKind::DependencyDown => "DependencyDown",
            FailureKind::Fatal => "Fatal",
        }
    }
}

/// One broker record, deserialized and detached from the consumer's buffers.
#[derive(Debug, Clone)]
pub struct OwnedRecord<K, V> {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<K>,
    pub value: V,
    pub headers: Vec<(String, Vec<u8>)>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One in-flight delivery.
///
/// Contexts are cheap to clone (the record is behind an `Arc`) and are
/// recreated on every hop through the chain - stages return a new context
/// via the `with_*`/`classified` constructors rather than mutating in
/// place. The record's identity (topic/partition/offset) never changes;
/// only the attempt count and the outcome evolve.
pub struct DeliveryContext<K, V> {
    record: Arc<OwnedRecord<K, V>>,
    attempt: u32,
    failure: FailureKind,
    error: Option<Arc<HandlerError>>,
    cancel: CancellationToken,
}

// Not derived: the record is shared through an `Arc`, so a clone never
// needs `K: Clone` or `V: Clone`.
impl<K, V> Clone for DeliveryContext<K, V> {
    fn clone(&self) -> Self {
        Self {
            record: self.record.clone(),
            attempt: self.attempt,
            failure: self.failure,
            error: self.error.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<K, V> DeliveryContext<K, V> {
    pub fn new(record: OwnedRecord<K, V>, cancel: CancellationToken) -> Self {
        Self {
            record: Arc::new(record),
            attempt: 1,
            failure: FailureKind::None,
            error: None,
            cancel,
        }
    }

    pub fn record(&self) -> &OwnedRecord<K, V> {
        &self.record
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn failure(&self) -> FailureKind {
        self.failure
    }

    pub fn error(&self) -> Option<&Arc<HandlerError>> {
        self.error.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The innermost stage succeeded - clear any previous outcome.
    pub fn succeeded(self) -> Self {
        Self {
            failure: FailureKind::None,
            error: None,
            ..self
        }
    }

    /// Record a classified failure along with its cause.
    pub fn classified(self, failure: FailureKind, error: Arc<HandlerError>) -> Self {
        Self {
            failure,
            error: Some(error),
            ..self
        }
    }

    /// A fresh context for the next retry of the same record.
    pub fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            failure: FailureKind::None,
            error: None,
            ..self
        }
    }
}

impl<K, V> std::fmt::Debug for DeliveryContext<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("topic", &self.record.topic)
            .field("partition", &self.record.partition)
            .field("offset", &self.record.offset)
            .field("attempt", &self.attempt)
            .field("failure", &self.failure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> OwnedRecord<String, String> {
        OwnedRecord {
            topic: "events".to_string(),
            partition: 3,
            offset: 42,
            key: None,
            value: "payload".to_string(),
            headers: vec![],
            timestamp: None,
        }
    }

    #[test]
    fn hops_preserve_record_identity() {
        let ctx = DeliveryContext::new(record(), CancellationToken::new());
        let hopped = ctx
            .classified(
                FailureKind::Transient,
                Arc::new(HandlerError::Fatal("boom".to_string())),
            )
            .next_attempt()
            .succeeded();

        assert_eq!(hopped.record().topic, "events");
        assert_eq!(hopped.record().partition, 3);
        assert_eq!(hopped.record().offset, 42);
        assert_eq!(hopped.attempt(), 2);
        assert_eq!(hopped.failure(), FailureKind::None);
        assert!(hopped.error().is_none());
    }

    #[test]
    fn classified_carries_the_cause() {
        let ctx = DeliveryContext::new(record(), CancellationToken::new());
        let failed = ctx.classified(
            FailureKind::DependencyDown,
            Arc::new(HandlerError::CircuitOpen),
        );
        assert_eq!(failed.failure(), FailureKind::DependencyDown);
        assert!(failed.error().is_some());
    }

    #[test]
    fn clones_without_clonable_payload_types() {
        struct Opaque;

        let ctx = DeliveryContext::new(
            OwnedRecord::<Opaque, Opaque> {
                topic: "events".to_string(),
                partition: 0,
                offset: 9,
                key: None,
                value: Opaque,
                headers: vec![],
                timestamp: None,
            },
            CancellationToken::new(),
        );

        let cloned = ctx.clone();
        assert_eq!(cloned.record().offset, 9);
        assert_eq!(cloned.attempt(), ctx.attempt());
    }

    #[test]
    fn failure_kind_partitions() {
        assert!(FailureKind::Permanent.is_terminal());
        assert!(FailureKind::Fatal.is_terminal());
        assert!(FailureKind::Transient.is_retryable());
        assert!(FailureKind::DependencyDown.is_retryable());
        assert!(!FailureKind::None.is_terminal());
        assert!(!FailureKind::None.is_retryable());
    }
}
