use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::context::{DeliveryContext, FailureKind};
use crate::error::HandlerError;
use crate::metric_consts::CLASSIFIED_FAILURES;
use crate::stage::{Next, Stage};

pub type Classifier = dyn Fn(&HandlerError) -> FailureKind + Send + Sync;

/// The default mapping from raw cause to classification.
///
/// Unknown errors classify as `Transient`: retrying an unknown failure a
/// bounded number of times beats silently dropping it. Unrecognized event
/// types and bad payloads classify as `Permanent` - that's a policy
/// decision made here at the composition layer, and callers with
/// different policies supply their own classifier.
pub fn default_classifier(error: &HandlerError) -> FailureKind {
    match error {
        HandlerError::Timeout(_) => FailureKind::Transient,
        HandlerError::Kafka(_) | HandlerError::Produce(_) => FailureKind::DependencyDown,
        HandlerError::CircuitOpen => FailureKind::DependencyDown,
        HandlerError::UnrecognizedEvent(_) | HandlerError::Payload(_) => FailureKind::Permanent,
        HandlerError::Fatal(_) => FailureKind::Fatal,
        HandlerError::Other(_) => FailureKind::Transient,
    }
}

/// The classification boundary: the only stage that turns an `Err` from
/// the inner chain into an `Ok` context. Everything registered outside
/// this stage sees classifications, never raw errors.
pub struct ClassifyStage {
    classify: Box<Classifier>,
}

impl ClassifyStage {
    pub fn new() -> Self {
        Self::with_classifier(default_classifier)
    }

    pub fn with_classifier(
        classify: impl Fn(&HandlerError) -> FailureKind + Send + Sync + 'static,
    ) -> Self {
        Self {
            classify: Box::new(classify),
        }
    }
}

impl Default for ClassifyStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Stage<K, V> for ClassifyStage
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn invoke(
        &self,
        ctx: DeliveryContext<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<DeliveryContext<K, V>, HandlerError> {
        match next.run(ctx.clone()).await {
            Ok(out) => Ok(out),
            Err(error) => {
                let kind = (self.classify)(&error);
                warn!(
                    topic = %ctx.record().topic,
                    partition = ctx.record().partition,
                    offset = ctx.record().offset,
                    attempt = ctx.attempt(),
                    classification = kind.as_str(),
                    %error,
                    "record processing failed"
                );
                metrics::counter!(
                    CLASSIFIED_FAILURES,
                    "classification" => kind.as_str(),
                    "cause" => error.kind_name()
                )
                .increment(1);
                Ok(ctx.classified(kind, Arc::new(error)))
            }
        }
    }
}
