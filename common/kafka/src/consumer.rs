use chrono::{DateTime, Utc};
use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    message::Headers,
    ClientConfig, Message,
};

use crate::config::{ConsumerConfig, KafkaConfig};

/// An owned copy of one broker record, detached from librdkafka's buffers
/// so it can be carried through an async pipeline.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Thin wrapper over a `StreamConsumer` subscribed to a single topic.
///
/// Offset storing is explicit: callers store a record's offset only once
/// they are done with it, and the stored offsets are committed to the
/// broker on rdkafka's auto-commit timer. Anything not stored before a
/// restart is redelivered.
pub struct RecordConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl RecordConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set(
                "allow.auto.create.topics",
                consumer_config.kafka_consumer_auto_create_topics.to_string(),
            )
            .set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        Ok(Self {
            consumer,
            topic: consumer_config.kafka_consumer_topic.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Await the next record on the subscribed topic.
    pub async fn recv(&self) -> Result<ConsumedRecord, KafkaError> {
        let message = self.consumer.recv().await?;

        let headers = message
            .headers()
            .map(|hs| {
                hs.iter()
                    .map(|h| (h.key.to_string(), h.value.unwrap_or_default().to_vec()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(ConsumedRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| k.to_vec()),
            payload: message.payload().map(|p| p.to_vec()),
            headers,
            timestamp: message
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis),
        })
    }

    /// Store a record's offset for the auto-commit timer to pick up.
    pub fn store_offset(&self, partition: i32, offset: i64) -> Result<(), KafkaError> {
        self.consumer.store_offset(&self.topic, partition, offset)
    }
}
