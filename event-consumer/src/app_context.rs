use std::sync::Arc;
use std::time::Duration;

use common_kafka::producer::create_kafka_producer;
use health::{HealthHandle, HealthRegistry};

use crate::config::Config;
use crate::dead_letter::{DeadLetterRouter, KafkaDeadLetterPublisher};
use crate::error::SetupError;

pub struct AppContext {
    pub health_registry: HealthRegistry,
    pub worker_liveness: HealthHandle,
    pub dead_letters: DeadLetterRouter,
    pub config: Config,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, SetupError> {
        let health_registry = HealthRegistry::new("liveness");
        let worker_liveness = health_registry
            .register("consume_loop".to_string(), Duration::from_secs(60))
            .await;
        let kafka_liveness = health_registry
            .register("rdkafka".to_string(), Duration::from_secs(30))
            .await;

        let producer =
            create_kafka_producer(&config.kafka, kafka_liveness).await?;
        let publisher = KafkaDeadLetterPublisher::new(producer, config.dead_letter_topic.clone());
        let dead_letters = DeadLetterRouter::new(Arc::new(publisher));

        Ok(Self {
            health_registry,
            worker_liveness,
            dead_letters,
            config: config.clone(),
        })
    }
}
