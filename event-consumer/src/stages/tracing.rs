use async_trait::async_trait;
use tracing::{info_span, Instrument};

use crate::context::DeliveryContext;
use crate::error::HandlerError;
use crate::metric_consts::{CHAIN_TIME, DELIVERY_OUTCOMES};
use crate::stage::{Next, Stage};

/// Observability wrapper, registered outermost: spans and times the rest
/// of the chain and counts final outcomes. Never alters the context.
pub struct TracingStage;

#[async_trait]
impl<K, V> Stage<K, V> for TracingStage
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn invoke(
        &self,
        ctx: DeliveryContext<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<DeliveryContext<K, V>, HandlerError> {
        let span = info_span!(
            "delivery",
            topic = %ctx.record().topic,
            partition = ctx.record().partition,
            offset = ctx.record().offset,
        );

        let timing = common_metrics::timing_guard(CHAIN_TIME, &[]);
        let out = next.run(ctx).instrument(span).await?;
        timing
            .label("classification", out.failure().as_str())
            .fin();

        metrics::counter!(DELIVERY_OUTCOMES, "classification" => out.failure().as_str())
            .increment(1);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FailureKind, OwnedRecord};
    use crate::stage::{Handler, PipelineChain};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct AlwaysOk;

    #[async_trait]
    impl Handler<String, String> for AlwaysOk {
        async fn handle(&self, _ctx: &DeliveryContext<String, String>) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn passes_the_outcome_through_untouched() {
        let chain = PipelineChain::new(vec![Arc::new(TracingStage)], Arc::new(AlwaysOk));
        let ctx = DeliveryContext::new(
            OwnedRecord {
                topic: "events".to_string(),
                partition: 0,
                offset: 0,
                key: None,
                value: "v".to_string(),
                headers: vec![],
                timestamp: None,
            },
            CancellationToken::new(),
        );

        let out = chain.dispatch(ctx).await.unwrap();
        assert_eq!(out.failure(), FailureKind::None);
        assert_eq!(out.attempt(), 1);
    }
}
