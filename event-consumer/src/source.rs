use std::marker::PhantomData;

use async_trait::async_trait;
use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::consumer::{ConsumedRecord, RecordConsumer};
use rdkafka::error::KafkaError;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::context::OwnedRecord;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("poison record at {}:{}:{}: {reason}", record.topic, record.partition, record.offset)]
    Poison {
        record: ConsumedRecord,
        reason: String,
    },
}

/// The broker consumer contract the processor drives: an async record
/// stream plus per-record commit. The Kafka implementation lives here;
/// tests script their own.
#[async_trait]
pub trait RecordSource<K, V>: Send {
    async fn recv(&mut self) -> Result<OwnedRecord<K, V>, SourceError>;

    fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError>;
}

/// A `RecordSource` over a single Kafka topic with JSON-encoded payloads.
///
/// Records that can't be deserialized surface as `SourceError::Poison`
/// rather than being dropped, so the processor can dead-letter them with
/// the raw payload attached. Keys are best-effort: a key that fails to
/// parse becomes `None` instead of poisoning the record.
pub struct KafkaRecordSource<K, V> {
    consumer: RecordConsumer,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> KafkaRecordSource<K, V> {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        Ok(Self {
            consumer: RecordConsumer::new(common_config, consumer_config)?,
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<K, V> RecordSource<K, V> for KafkaRecordSource<K, V>
where
    K: DeserializeOwned + Send,
    V: DeserializeOwned + Send,
{
    async fn recv(&mut self) -> Result<OwnedRecord<K, V>, SourceError> {
        let record = self.consumer.recv().await?;

        let Some(payload) = record.payload.as_deref() else {
            return Err(SourceError::Poison {
                reason: "empty payload".to_string(),
                record,
            });
        };

        let value: V = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                return Err(SourceError::Poison {
                    reason: e.to_string(),
                    record,
                })
            }
        };

        let key = record.key.as_deref().and_then(|k| {
            serde_json::from_slice(k)
                .map_err(|e| debug!("dropping unparseable record key: {e}"))
                .ok()
        });

        Ok(OwnedRecord {
            topic: record.topic,
            partition: record.partition,
            offset: record.offset,
            key,
            value,
            headers: record.headers,
            timestamp: record.timestamp,
        })
    }

    fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        self.consumer.store_offset(partition, offset)?;
        Ok(())
    }
}
