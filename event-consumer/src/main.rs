use std::{future::ready, sync::Arc};

use async_trait::async_trait;
use axum::{routing::get, Router};
use common_metrics::{serve, setup_metrics_routes};
use event_consumer::{
    app_context::AppContext,
    config::Config,
    context::DeliveryContext,
    dispatch::EventDispatcher,
    error::HandlerError,
    source::KafkaRecordSource,
    stage::Handler,
    PipelineBuilder,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "event consumer service"
}

fn start_health_liveness_server(config: &Config, context: Arc<AppContext>) -> JoinHandle<()> {
    let config = config.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(context.health_registry.get_status())),
        );
    let router = setup_metrics_routes(router);
    let bind = format!("{}:{}", config.host, config.port);
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

/// Smoke-test events emitted by ops tooling; real event handlers get
/// registered alongside this one.
struct HeartbeatHandler;

#[async_trait]
impl Handler<String, serde_json::Value> for HeartbeatHandler {
    async fn handle(
        &self,
        ctx: &DeliveryContext<String, serde_json::Value>,
    ) -> Result<(), HandlerError> {
        info!(
            offset = ctx.record().offset,
            partition = ctx.record().partition,
            "heartbeat received"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_with_defaults().unwrap();
    let context = Arc::new(AppContext::new(&config).await.unwrap());

    start_health_liveness_server(&config, context.clone());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for shutdown signal");
            info!("shutdown signal received");
            cancel.cancel();
        });
    }

    let source: KafkaRecordSource<String, serde_json::Value> =
        KafkaRecordSource::new(&config.kafka, &config.consumer).unwrap();

    let dispatcher =
        EventDispatcher::<String>::new().register("heartbeat", Arc::new(HeartbeatHandler));

    let processor = PipelineBuilder::new(source)
        .with_tracing()
        .with_retry(config.max_delivery_attempts, config.backoff())
        .with_circuit_breaker(config.breaker())
        .with_classification()
        .dead_letters_to(context.dead_letters.clone())
        .max_delivery_attempts(config.max_delivery_attempts)
        .cancelled_by(cancel)
        .liveness(context.worker_liveness.clone())
        .handler(Arc::new(dispatcher))
        .build()
        .unwrap();

    if let Err(e) = processor.run().await {
        panic!("consume loop failed: {e:?}");
    }
    info!("shut down cleanly");
}
