use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};

use crate::context::DeliveryContext;
use crate::error::HandlerError;

/// The innermost stage of a chain: the business handler for one record.
///
/// Handlers signal failure by returning `Err` - the classification stage
/// turns that into a [`crate::context::FailureKind`] on the way back out.
#[async_trait]
pub trait Handler<K, V>: Send + Sync {
    async fn handle(&self, ctx: &DeliveryContext<K, V>) -> Result<(), HandlerError>;
}

/// A cross-cutting stage wrapping the rest of the chain.
///
/// Stages receive the context and a [`Next`] continuation and must return
/// a (possibly re-created) context. The only stage that is allowed to turn
/// an `Err` from `next` into an `Ok` classification is the classification
/// stage; everything above it operates on classifications alone.
#[async_trait]
pub trait Stage<K, V>: Send + Sync {
    async fn invoke(
        &self,
        ctx: DeliveryContext<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<DeliveryContext<K, V>, HandlerError>;
}

/// The remainder of a chain, from some stage's point of view.
///
/// `Next` is `Copy`, so a stage holding one can re-run everything
/// downstream of itself - the retry stage relies on this to make each
/// retry a fresh pass through the breaker and classification stages.
pub struct Next<'a, K, V> {
    stages: &'a [Arc<dyn Stage<K, V>>],
    handler: &'a dyn Handler<K, V>,
}

impl<K, V> Clone for Next<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for Next<'_, K, V> {}

impl<'a, K, V> Next<'a, K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn run(
        self,
        ctx: DeliveryContext<K, V>,
    ) -> BoxFuture<'a, Result<DeliveryContext<K, V>, HandlerError>> {
        async move {
            match self.stages.split_first() {
                Some((stage, rest)) => {
                    stage
                        .invoke(
                            ctx,
                            Next {
                                stages: rest,
                                handler: self.handler,
                            },
                        )
                        .await
                }
                None => {
                    self.handler.handle(&ctx).await?;
                    Ok(ctx.succeeded())
                }
            }
        }
        .boxed()
    }
}

/// An assembled chain: the registered stages, outermost first, plus the
/// terminal handler.
pub struct PipelineChain<K, V> {
    stages: Vec<Arc<dyn Stage<K, V>>>,
    handler: Arc<dyn Handler<K, V>>,
}

impl<K, V> PipelineChain<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(stages: Vec<Arc<dyn Stage<K, V>>>, handler: Arc<dyn Handler<K, V>>) -> Self {
        Self { stages, handler }
    }

    /// Push one context through the whole chain.
    pub async fn dispatch(
        &self,
        ctx: DeliveryContext<K, V>,
    ) -> Result<DeliveryContext<K, V>, HandlerError> {
        Next {
            stages: &self.stages,
            handler: self.handler.as_ref(),
        }
        .run(ctx)
        .await
    }
}
