pub mod breaker;
pub mod classify;
pub mod retry;
pub mod tracing;

pub use breaker::CircuitBreakerStage;
pub use classify::ClassifyStage;
pub use retry::RetryStage;
pub use tracing::TracingStage;
