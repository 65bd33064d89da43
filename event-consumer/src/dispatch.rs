use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::DeliveryContext;
use crate::error::HandlerError;
use crate::stage::Handler;

/// Routes JSON event envelopes to per-type handlers.
///
/// Envelopes carry their type in an `event_type` field. A missing or
/// unregistered type raises `UnrecognizedEvent`, which the default
/// classification policy treats as `Permanent` - those records go
/// straight to the dead letter topic for inspection.
pub struct EventDispatcher<K> {
    routes: HashMap<String, Arc<dyn Handler<K, serde_json::Value>>>,
}

impl<K> EventDispatcher<K> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn register(
        mut self,
        event_type: &str,
        handler: Arc<dyn Handler<K, serde_json::Value>>,
    ) -> Self {
        self.routes.insert(event_type.to_string(), handler);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<K> Default for EventDispatcher<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K> Handler<K, serde_json::Value> for EventDispatcher<K>
where
    K: Send + Sync + 'static,
{
    async fn handle(
        &self,
        ctx: &DeliveryContext<K, serde_json::Value>,
    ) -> Result<(), HandlerError> {
        let event_type = ctx
            .record()
            .value
            .get("event_type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| HandlerError::UnrecognizedEvent("<missing event_type>".to_string()))?;

        match self.routes.get(event_type) {
            Some(handler) => handler.handle(ctx).await,
            None => Err(HandlerError::UnrecognizedEvent(event_type.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OwnedRecord;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Handler<String, serde_json::Value> for Counting {
        async fn handle(
            &self,
            _ctx: &DeliveryContext<String, serde_json::Value>,
        ) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ctx(value: serde_json::Value) -> DeliveryContext<String, serde_json::Value> {
        DeliveryContext::new(
            OwnedRecord {
                topic: "events".to_string(),
                partition: 0,
                offset: 0,
                key: None,
                value,
                headers: vec![],
                timestamp: None,
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn routes_to_the_registered_handler() {
        let handler = Arc::new(Counting {
            calls: AtomicU32::new(0),
        });
        let dispatcher =
            EventDispatcher::<String>::new().register("user.created", handler.clone());

        dispatcher
            .handle(&ctx(json!({"event_type": "user.created", "id": 1})))
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_type_is_unrecognized() {
        let dispatcher = EventDispatcher::<String>::new();
        let err = dispatcher
            .handle(&ctx(json!({"event_type": "order.v9"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::UnrecognizedEvent(t) if t == "order.v9"));
    }

    #[tokio::test]
    async fn missing_type_is_unrecognized() {
        let dispatcher = EventDispatcher::<String>::new();
        let err = dispatcher
            .handle(&ctx(json!({"id": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::UnrecognizedEvent(_)));
    }
}
