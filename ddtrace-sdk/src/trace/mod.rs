//! # Datadog Trace SDK
//!
//! The tracing SDK consist of a few main structs:
//!
//! * The [`Tracer`] struct which starts spans and tracks the active one.
//! * The [`Span`] struct which is a mutable handle storing information about
//!   the current operation execution.
//! * The [`TracerProvider`] struct which configures and produces [`Tracer`]s.
//! * The [`DatadogSampler`] which decides the sampling priority of new traces.
//!
//! Finished spans flow to [`SpanProcessor`]s. The [`TraceAggregatingProcessor`]
//! groups them per trace and hands complete trace chunks to a
//! [`SpanExporter`].
mod config;
mod export;
mod id_generator;
#[cfg(any(feature = "testing", test))]
mod in_memory_exporter;
mod provider;
pub mod sampler;
mod scope;
mod span;
mod span_processor;
mod tracer;

pub use config::{Config, DEFAULT_SERVICE};
pub use export::SpanExporter;
#[cfg(any(feature = "testing", test))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
#[cfg(any(feature = "testing", test))]
pub use in_memory_exporter::InMemorySpanExporter;
pub use provider::{TracerProvider, TracerProviderBuilder};
pub use sampler::{
    parse_rules, DatadogSampler, RuleError, RuleFormat, SamplingCandidate, SamplingResult,
    SamplingRule, ShouldSample,
};
pub use scope::{Scope, ScopeManager};
pub use span::{Span, SpanData, ERROR_MESSAGE_TAG, ERROR_STACK_TAG, ERROR_TYPE_TAG};
pub use span_processor::{
    SpanProcessor, TraceAggregatingProcessor, ORIGIN_TAG, PROPAGATION_ERROR_TAG,
    SAMPLING_PRIORITY_METRIC,
};
pub use tracer::{Parent, SpanOptions, Tracer, PROCESS_ID_METRIC};
