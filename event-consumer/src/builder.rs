use std::sync::Arc;

use anyhow::{Context, Result};
use health::HealthHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::circuit::BreakerConfig;
use crate::context::FailureKind;
use crate::dead_letter::DeadLetterRouter;
use crate::error::HandlerError;
use crate::processor::Processor;
use crate::source::RecordSource;
use crate::stage::{Handler, PipelineChain, Stage};
use crate::stages::{CircuitBreakerStage, ClassifyStage, RetryStage, TracingStage};

/// Assembles a stage chain and its driving [`Processor`].
///
/// Stages run in registration order, outermost first: the first stage
/// registered sees the record first and the final outcome last. The
/// builder is consumed by every call, so nothing can be added after
/// `build()`.
pub struct PipelineBuilder<K, V, S> {
    source: S,
    stages: Vec<Arc<dyn Stage<K, V>>>,
    handler: Option<Arc<dyn Handler<K, V>>>,
    dead_letters: Option<DeadLetterRouter>,
    max_delivery_attempts: u32,
    cancel: CancellationToken,
    liveness: Option<HealthHandle>,
}

impl<K, V, S> PipelineBuilder<K, V, S>
where
    K: serde::Serialize + Send + Sync + 'static,
    V: serde::Serialize + Send + Sync + 'static,
    S: RecordSource<K, V>,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            stages: Vec::new(),
            handler: None,
            dead_letters: None,
            max_delivery_attempts: 5,
            cancel: CancellationToken::new(),
            liveness: None,
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage<K, V>>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_tracing(self) -> Self {
        self.with_stage(Arc::new(TracingStage))
    }

    pub fn with_retry(self, max_attempts: u32, backoff: BackoffPolicy) -> Self {
        self.with_stage(Arc::new(RetryStage::new(max_attempts, backoff)))
    }

    pub fn with_circuit_breaker(self, config: BreakerConfig) -> Self {
        self.with_stage(Arc::new(CircuitBreakerStage::new(config)))
    }

    pub fn with_classification(self) -> Self {
        self.with_stage(Arc::new(ClassifyStage::new()))
    }

    pub fn with_classifier(
        self,
        classify: impl Fn(&HandlerError) -> FailureKind + Send + Sync + 'static,
    ) -> Self {
        self.with_stage(Arc::new(ClassifyStage::with_classifier(classify)))
    }

    pub fn dead_letters_to(mut self, router: DeadLetterRouter) -> Self {
        self.dead_letters = Some(router);
        self
    }

    pub fn max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    pub fn cancelled_by(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn liveness(mut self, handle: HealthHandle) -> Self {
        self.liveness = Some(handle);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler<K, V>>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<Processor<K, V, S>> {
        let handler = self.handler.context("pipeline requires a handler")?;
        let chain = PipelineChain::new(self.stages, handler);
        Ok(Processor::new(
            self.source,
            chain,
            self.dead_letters,
            self.max_delivery_attempts,
            self.cancel,
            self.liveness,
        ))
    }
}
