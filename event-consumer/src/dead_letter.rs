use std::collections::HashMap;
use std::error::Error as _;
use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::{DateTime, Utc};
use common_kafka::consumer::ConsumedRecord;
use common_kafka::producer::{send_json_to_kafka, KafkaContext, KafkaProduceError};
use rdkafka::producer::FutureProducer;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::context::{DeliveryContext, FailureKind};
use crate::error::HandlerError;
use crate::metric_consts::{DEAD_LETTERS_PRODUCED, DEAD_LETTER_PUBLISH_FAILURES};

/// Debug representations longer than this get truncated before capture,
/// so a pathological error chain can't produce an unpublishable record.
const MAX_STACK_LEN: usize = 4096;

const UNSERIALIZABLE_PLACEHOLDER: &str = "<unserializable>";

/// Identity of the failed record, used as the dead letter key so replay
/// tooling can find the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventKey {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.topic, self.partition, self.offset)
    }
}

/// Everything replay tooling needs to understand a terminally failed
/// delivery: the cause, the coordinates, and a best-effort copy of the
/// original payload. Construction never fails - any piece that can't be
/// captured faithfully is replaced with a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub error_type: String,
    pub error_message: String,
    pub error_stack: String,
    pub inner_error_type: Option<String>,
    pub inner_error_message: Option<String>,
    pub inner_error_stack: Option<String>,
    pub source_topic: String,
    pub event_key: EventKey,
    pub captured_at: DateTime<Utc>,
    pub original_key: Option<String>,
    pub original_value: Option<String>,
    pub headers: HashMap<String, String>,
    pub attempt_count: u32,
    pub failure: FailureKind,
}

impl DeadLetterRecord {
    /// Capture a terminally failed delivery.
    pub fn capture<K, V>(ctx: &DeliveryContext<K, V>) -> Self
    where
        K: Serialize,
        V: Serialize,
    {
        let record = ctx.record();
        let (error_type, error_message, error_stack, inner) = match ctx.error() {
            Some(err) => describe_error(err),
            None => ("Unknown".to_string(), String::new(), String::new(), None),
        };

        Self {
            error_type,
            error_message,
            error_stack,
            inner_error_type: inner.as_ref().map(|i| i.0.clone()),
            inner_error_message: inner.as_ref().map(|i| i.1.clone()),
            inner_error_stack: inner.map(|i| i.2),
            source_topic: record.topic.clone(),
            event_key: EventKey {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
            },
            captured_at: Utc::now(),
            original_key: record.key.as_ref().map(json_or_placeholder),
            original_value: Some(json_or_placeholder(&record.value)),
            headers: decode_headers(&record.headers),
            attempt_count: ctx.attempt(),
            failure: ctx.failure(),
        }
    }

    /// Capture a poison pill - a record whose payload never deserialized,
    /// so it failed before reaching the chain at all.
    pub fn capture_poison(record: &ConsumedRecord, reason: &str) -> Self {
        Self {
            error_type: "Payload".to_string(),
            error_message: reason.to_string(),
            error_stack: String::new(),
            inner_error_type: None,
            inner_error_message: None,
            inner_error_stack: None,
            source_topic: record.topic.clone(),
            event_key: EventKey {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
            },
            captured_at: Utc::now(),
            original_key: record
                .key
                .as_ref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            original_value: record
                .payload
                .as_ref()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            headers: decode_headers(&record.headers),
            attempt_count: 1,
            failure: FailureKind::Permanent,
        }
    }

    pub fn key(&self) -> String {
        self.event_key.to_string()
    }
}

fn describe_error(err: &HandlerError) -> (String, String, String, Option<(String, String, String)>) {
    let stack = truncate(format!("{err:?}"), MAX_STACK_LEN);
    let inner = err.source().map(|cause| {
        (
            // The concrete cause type isn't recoverable through dyn Error,
            // so the inner type tag is its rendered form, bounded
            truncate(format!("{cause}"), 128),
            cause.to_string(),
            truncate(format!("{cause:?}"), MAX_STACK_LEN),
        )
    });
    (err.kind_name().to_string(), err.to_string(), stack, inner)
}

fn json_or_placeholder<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| UNSERIALIZABLE_PLACEHOLDER.to_string())
}

/// Header values are opaque bytes; UTF-8 text comes through as-is and
/// anything else is base64 encoded.
fn decode_headers(headers: &[(String, Vec<u8>)]) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let decoded = match std::str::from_utf8(value) {
                Ok(s) => s.to_string(),
                Err(_) => BASE64_STANDARD.encode(value),
            };
            (name.clone(), decoded)
        })
        .collect()
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// Where dead letters go. The rdkafka implementation publishes to the
/// configured dead letter topic; tests swap in an in-memory sink.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    async fn publish(&self, key: &str, record: &DeadLetterRecord) -> Result<(), KafkaProduceError>;
}

pub struct KafkaDeadLetterPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaDeadLetterPublisher {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl DeadLetterPublisher for KafkaDeadLetterPublisher {
    async fn publish(&self, key: &str, record: &DeadLetterRecord) -> Result<(), KafkaProduceError> {
        send_json_to_kafka(&self.producer, &self.topic, Some(key), record).await
    }
}

/// Failure-isolated dead letter routing.
///
/// Routing is awaited (so publish failures show up deterministically) but
/// never propagates an error: a broken dead letter path must not block
/// the consume loop or leave an otherwise-disposed record uncommitted.
#[derive(Clone)]
pub struct DeadLetterRouter {
    publisher: Arc<dyn DeadLetterPublisher>,
}

impl DeadLetterRouter {
    pub fn new(publisher: Arc<dyn DeadLetterPublisher>) -> Self {
        Self { publisher }
    }

    pub async fn route<K, V>(&self, ctx: &DeliveryContext<K, V>)
    where
        K: Serialize,
        V: Serialize,
    {
        self.route_record(DeadLetterRecord::capture(ctx)).await
    }

    pub async fn route_record(&self, record: DeadLetterRecord) {
        let key = record.key();
        metrics::counter!(DEAD_LETTERS_PRODUCED, "classification" => record.failure.as_str())
            .increment(1);

        if let Err(err) = self.publisher.publish(&key, &record).await {
            error!(
                key = %key,
                error = %err,
                "failed to publish dead letter record"
            );
            metrics::counter!(DEAD_LETTER_PUBLISH_FAILURES).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OwnedRecord;
    use serde::ser::Error as SerError;
    use tokio_util::sync::CancellationToken;

    /// A value whose serializer always raises.
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("nope"))
        }
    }

    fn failed_ctx<V>(value: V) -> DeliveryContext<String, V> {
        let ctx = DeliveryContext::new(
            OwnedRecord {
                topic: "events".to_string(),
                partition: 2,
                offset: 99,
                key: Some("user-1".to_string()),
                value,
                headers: vec![
                    ("trace-id".to_string(), b"abc123".to_vec()),
                    ("blob".to_string(), vec![0xff, 0xfe, 0x00]),
                ],
                timestamp: None,
            },
            CancellationToken::new(),
        );
        ctx.next_attempt().next_attempt().classified(
            FailureKind::Transient,
            Arc::new(HandlerError::Fatal("downstream exploded".to_string())),
        )
    }

    #[test]
    fn captures_record_coordinates_and_attempts() {
        let record = DeadLetterRecord::capture(&failed_ctx("payload".to_string()));

        assert_eq!(record.source_topic, "events");
        assert_eq!(record.event_key.partition, 2);
        assert_eq!(record.event_key.offset, 99);
        assert_eq!(record.attempt_count, 3);
        assert_eq!(record.failure, FailureKind::Transient);
        assert_eq!(record.error_type, "Fatal");
        assert_eq!(record.original_key.as_deref(), Some("\"user-1\""));
        assert_eq!(record.original_value.as_deref(), Some("\"payload\""));
        assert_eq!(record.key(), "events:2:99");
    }

    #[test]
    fn serializer_failure_yields_a_placeholder_not_a_panic() {
        let record = DeadLetterRecord::capture(&failed_ctx(Unserializable));
        assert_eq!(record.original_value.as_deref(), Some("<unserializable>"));
    }

    #[test]
    fn headers_decode_as_utf8_with_base64_fallback() {
        let record = DeadLetterRecord::capture(&failed_ctx("p".to_string()));

        assert_eq!(record.headers.get("trace-id").map(String::as_str), Some("abc123"));
        assert_eq!(
            record.headers.get("blob").map(String::as_str),
            Some(BASE64_STANDARD.encode([0xffu8, 0xfe, 0x00]).as_str())
        );
    }

    #[test]
    fn wire_shape_round_trips() {
        let record = DeadLetterRecord::capture(&failed_ctx("payload".to_string()));
        let json = serde_json::to_string(&record).unwrap();
        let back: DeadLetterRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);

        // Classification serializes by enum name, timestamp as ISO-8601
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["failure"], "Transient");
        assert!(value["captured_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn poison_capture_keeps_the_raw_payload() {
        let record = DeadLetterRecord::capture_poison(
            &ConsumedRecord {
                topic: "events".to_string(),
                partition: 0,
                offset: 5,
                key: None,
                payload: Some(b"not json at all".to_vec()),
                headers: vec![],
                timestamp: None,
            },
            "expected value at line 1 column 1",
        );

        assert_eq!(record.failure, FailureKind::Permanent);
        assert_eq!(record.original_value.as_deref(), Some("not json at all"));
        assert_eq!(record.attempt_count, 1);
    }

    #[test]
    fn long_error_chains_are_truncated() {
        let ctx = failed_ctx("p".to_string()).classified(
            FailureKind::Fatal,
            Arc::new(HandlerError::Fatal("x".repeat(100_000))),
        );
        let record = DeadLetterRecord::capture(&ctx);
        assert!(record.error_stack.len() <= MAX_STACK_LEN);
    }
}
