pub mod app_context;
pub mod backoff;
pub mod builder;
pub mod circuit;
pub mod config;
pub mod context;
pub mod dead_letter;
pub mod dispatch;
pub mod error;
pub mod metric_consts;
pub mod processor;
pub mod saga;
pub mod source;
pub mod stage;
pub mod stages;

pub use backoff::BackoffPolicy;
pub use builder::PipelineBuilder;
pub use circuit::{BreakerConfig, BreakerState, CircuitBreaker};
pub use context::{DeliveryContext, FailureKind, OwnedRecord};
pub use dead_letter::{DeadLetterPublisher, DeadLetterRecord, DeadLetterRouter};
pub use error::HandlerError;
pub use processor::Processor;
pub use source::{RecordSource, SourceError};
pub use stage::{Handler, Next, PipelineChain, Stage};
