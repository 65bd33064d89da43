use std::sync::Arc;

use health::HealthHandle;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{DeliveryContext, FailureKind, OwnedRecord};
use crate::dead_letter::{DeadLetterRecord, DeadLetterRouter};
use crate::metric_consts::{
    MAIN_LOOP_TIME, POISON_PILLS, RECORDS_COMMITTED, RECORDS_RECEIVED, RECORDS_REDELIVERED,
    UNCLASSIFIED_ERRORS,
};
use crate::source::{RecordSource, SourceError};
use crate::stage::PipelineChain;

/// Drives the consume -> process -> dispose loop for one topic.
///
/// Disposition of the chain's final classification:
/// - `None` commits the offset.
/// - `Permanent`/`Fatal` dead-letters (when a router is configured) and
///   then commits, so the poison record is not redelivered.
/// - `Transient`/`DependencyDown` leaves the offset unstored for
///   redelivery, unless the attempt budget is spent, in which case the
///   record is treated like `Permanent`.
///
/// Commits only happen after full disposition - a crash in between means
/// redelivery, never loss (at-least-once).
pub struct Processor<K, V, S> {
    source: S,
    chain: PipelineChain<K, V>,
    dead_letters: Option<DeadLetterRouter>,
    max_delivery_attempts: u32,
    cancel: CancellationToken,
    liveness: Option<HealthHandle>,
}

impl<K, V, S> Processor<K, V, S>
where
    K: Serialize + Send + Sync + 'static,
    V: Serialize + Send + Sync + 'static,
    S: RecordSource<K, V>,
{
    pub(crate) fn new(
        source: S,
        chain: PipelineChain<K, V>,
        dead_letters: Option<DeadLetterRouter>,
        max_delivery_attempts: u32,
        cancel: CancellationToken,
        liveness: Option<HealthHandle>,
    ) -> Self {
        Self {
            source,
            chain,
            dead_letters,
            max_delivery_attempts,
            cancel,
            liveness,
        }
    }

    /// Consume until the cancellation token fires. The in-flight record is
    /// always fully disposed of before the loop exits.
    pub async fn run(mut self) -> Result<(), SourceError> {
        loop {
            if self.cancel.is_cancelled() {
                info!("consume loop shutting down");
                return Ok(());
            }

            if let Some(liveness) = &self.liveness {
                liveness.report_healthy().await;
            }

            let whole_loop = common_metrics::timing_guard(MAIN_LOOP_TIME, &[]);

            let received = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("consume loop shutting down");
                    return Ok(());
                }
                received = self.source.recv() => received,
            };

            match received {
                Ok(record) => self.dispose(record).await?,
                Err(SourceError::Poison { record, reason }) => {
                    metrics::counter!(POISON_PILLS).increment(1);
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        %reason,
                        "dead-lettering poison record"
                    );
                    if let Some(router) = &self.dead_letters {
                        router
                            .route_record(DeadLetterRecord::capture_poison(&record, &reason))
                            .await;
                    }
                    self.source.commit(record.partition, record.offset)?;
                }
                Err(err) => return Err(err),
            }

            whole_loop.fin();
        }
    }

    async fn dispose(&mut self, record: OwnedRecord<K, V>) -> Result<(), SourceError> {
        metrics::counter!(RECORDS_RECEIVED).increment(1);
        let (partition, offset) = (record.partition, record.offset);

        let ctx = DeliveryContext::new(record, self.cancel.child_token());
        let out = match self.chain.dispatch(ctx.clone()).await {
            Ok(out) => out,
            Err(error) => {
                // Raw errors are supposed to stop at the classification
                // stage. Classify conservatively and keep going.
                warn!(%error, "unclassified error escaped the chain, treating as transient");
                metrics::counter!(UNCLASSIFIED_ERRORS).increment(1);
                ctx.classified(FailureKind::Transient, Arc::new(error))
            }
        };

        let failure = out.failure();
        let budget_spent = out.attempt() >= self.max_delivery_attempts;

        if failure == FailureKind::None {
            self.source.commit(partition, offset)?;
            metrics::counter!(RECORDS_COMMITTED).increment(1);
            return Ok(());
        }

        if failure.is_retryable() && !budget_spent {
            // Redelivered on the next rebalance or restart
            info!(
                partition,
                offset,
                attempt = out.attempt(),
                classification = failure.as_str(),
                "leaving record uncommitted for redelivery"
            );
            metrics::counter!(RECORDS_REDELIVERED).increment(1);
            return Ok(());
        }

        if failure.is_retryable() {
            warn!(
                partition,
                offset,
                attempt = out.attempt(),
                "attempt budget spent, treating as permanent"
            );
        }

        match &self.dead_letters {
            Some(router) => router.route(&out).await,
            None => warn!(
                partition,
                offset,
                classification = failure.as_str(),
                "no dead letter topic configured, dropping record"
            ),
        }

        self.source.commit(partition, offset)?;
        metrics::counter!(RECORDS_COMMITTED).increment(1);
        Ok(())
    }
}
