use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::circuit::{BreakerConfig, CircuitBreaker};
use crate::context::{DeliveryContext, FailureKind};
use crate::error::HandlerError;
use crate::metric_consts::BREAKER_SHORT_CIRCUITS;
use crate::stage::{Next, Stage};

/// Guards the downstream chain with a [`CircuitBreaker`].
///
/// While the breaker is open, requests are classified `DependencyDown`
/// without invoking `next` at all - no load reaches the failing
/// dependency. Short-circuited results are not fed back into the breaker.
///
/// The mutex exists only because `Stage::invoke` takes `&self`; the
/// owning consume loop is single threaded, so it is never contended, and
/// it is never held across an await.
pub struct CircuitBreakerStage {
    breaker: Mutex<CircuitBreaker>,
}

impl CircuitBreakerStage {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breaker: Mutex::new(CircuitBreaker::new(config)),
        }
    }
}

#[async_trait]
impl<K, V> Stage<K, V> for CircuitBreakerStage
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn invoke(
        &self,
        ctx: DeliveryContext<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<DeliveryContext<K, V>, HandlerError> {
        let allowed = self.breaker.lock().expect("poisoned breaker lock").check();
        if !allowed {
            metrics::counter!(BREAKER_SHORT_CIRCUITS).increment(1);
            return Ok(ctx.classified(
                FailureKind::DependencyDown,
                Arc::new(HandlerError::CircuitOpen),
            ));
        }

        let out = next.run(ctx).await?;
        self.breaker
            .lock()
            .expect("poisoned breaker lock")
            .on_result(out.failure());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OwnedRecord;
    use crate::stage::{Handler, PipelineChain};
    use crate::stages::ClassifyStage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> DeliveryContext<String, String> {
        DeliveryContext::new(
            OwnedRecord {
                topic: "events".to_string(),
                partition: 1,
                offset: 0,
                key: None,
                value: "v".to_string(),
                headers: vec![],
                timestamp: None,
            },
            CancellationToken::new(),
        )
    }

    struct DependencyFailure {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Handler<String, String> for DependencyFailure {
        async fn handle(&self, _ctx: &DeliveryContext<String, String>) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::Kafka(
                rdkafka::error::KafkaError::MessageProduction(
                    rdkafka::types::RDKafkaErrorCode::BrokerTransportFailure,
                ),
            ))
        }
    }

    #[tokio::test]
    async fn short_circuits_after_the_threshold() {
        let handler = Arc::new(DependencyFailure {
            calls: AtomicU32::new(0),
        });
        let chain = PipelineChain::new(
            vec![
                Arc::new(CircuitBreakerStage::new(BreakerConfig {
                    failure_threshold: 5,
                    open_interval: Duration::from_secs(30),
                    rolling_window: Duration::from_secs(10),
                })),
                Arc::new(ClassifyStage::new()),
            ],
            handler.clone(),
        );

        // Five dependency failures inside the window trip the breaker
        for _ in 0..5 {
            let out = chain.dispatch(ctx()).await.unwrap();
            assert_eq!(out.failure(), FailureKind::DependencyDown);
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);

        // The sixth call never reaches the handler
        let out = chain.dispatch(ctx()).await.unwrap();
        assert_eq!(out.failure(), FailureKind::DependencyDown);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    }
}
