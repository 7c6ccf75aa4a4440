//! Trace context primitives for Datadog distributed tracing.
//!
//! This crate holds the data model shared by tracers, propagators and
//! instrumentation: trace and span identifiers, the [`SpanContext`] that links
//! spans together, the trace-wide sampling decision, baggage, and the carrier
//! traits used to move context across process boundaries.
//!
//! It has no notion of time, export or sampling rules; those live in
//! `ddtrace-sdk`.
//!
//! # Getting started
//!
//! ```
//! use ddtrace::baggage::Baggage;
//! use ddtrace::trace::{SamplingMechanism, SamplingPriority, SpanContext};
//! use ddtrace::{SpanId, TraceId};
//!
//! let root = SpanContext::new_root(TraceId::from(1337u128), SpanId::from(1), Baggage::new());
//! let child = root.create_child(SpanId::from(2));
//!
//! // the sampling decision is one cell shared by the whole trace
//! root.decision()
//!     .set_priority(SamplingPriority::UserKeep, SamplingMechanism::Manual);
//! assert_eq!(child.sampling_priority(), Some(SamplingPriority::UserKeep));
//! ```
//!
//! [`SpanContext`]: crate::trace::SpanContext
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![allow(clippy::needless_doctest_main)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod baggage;

mod internal_logging;

pub mod propagation;

pub mod trace;

mod trace_context;
pub use trace_context::{SpanId, TraceId};

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn}; // re-export
}
