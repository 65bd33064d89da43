use async_trait::async_trait;

use crate::backoff::BackoffPolicy;
use crate::context::{DeliveryContext, FailureKind};
use crate::error::HandlerError;
use crate::metric_consts::RETRIES;
use crate::stage::{Next, Stage};

/// Bounds how many times the downstream chain runs for one record.
///
/// Each iteration is a complete fresh pass through everything registered
/// after this stage - including the circuit breaker, so an outage that
/// trips the breaker mid-record short-circuits the remaining retries.
/// `Permanent` and `Fatal` classifications return immediately; exhausted
/// retryable classifications are returned as-is for the driver to dispose
/// of.
pub struct RetryStage {
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl RetryStage {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

#[async_trait]
impl<K, V> Stage<K, V> for RetryStage
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn invoke(
        &self,
        ctx: DeliveryContext<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<DeliveryContext<K, V>, HandlerError> {
        let mut ctx = ctx;
        loop {
            let out = next.run(ctx).await?;

            match out.failure() {
                FailureKind::None | FailureKind::Permanent | FailureKind::Fatal => return Ok(out),
                FailureKind::Transient | FailureKind::DependencyDown => {
                    if out.attempt() >= self.max_attempts {
                        return Ok(out);
                    }

                    let delay = self.backoff.next_delay(out.attempt());
                    metrics::counter!(RETRIES, "classification" => out.failure().as_str())
                        .increment(1);

                    tokio::select! {
                        _ = out.cancellation().cancelled() => return Ok(out),
                        _ = tokio::time::sleep(delay) => {}
                    }

                    ctx = out.next_attempt();
                }
            }
        }
    }
}
