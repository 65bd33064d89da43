use std::time::Duration;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

use crate::backoff::BackoffPolicy;
use crate::circuit::BreakerConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    // Total deliveries of one record before it's treated as permanent,
    // including the first
    #[envconfig(default = "5")]
    pub max_delivery_attempts: u32,

    #[envconfig(default = "100")]
    pub retry_initial_backoff_ms: u64,

    #[envconfig(default = "30000")]
    pub retry_max_backoff_ms: u64,

    #[envconfig(default = "5")]
    pub circuit_breaker_threshold: usize,

    #[envconfig(default = "30")]
    pub circuit_breaker_cooldown_seconds: u64,

    #[envconfig(default = "10")]
    pub circuit_breaker_window_seconds: u64,

    #[envconfig(default = "events_dead_letter")]
    pub dead_letter_topic: String,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        ConsumerConfig::set_defaults("event-consumer", "events");
        Self::init_from_env()
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.retry_initial_backoff_ms),
            2.0,
            Duration::from_millis(self.retry_max_backoff_ms),
        )
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            open_interval: Duration::from_secs(self.circuit_breaker_cooldown_seconds),
            rolling_window: Duration::from_secs(self.circuit_breaker_window_seconds),
        }
    }
}
