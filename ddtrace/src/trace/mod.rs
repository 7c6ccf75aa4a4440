//! Trace context data model.
//!
//! A trace is a tree of spans sharing one [`TraceId`]. Every span is
//! identified by a [`SpanContext`], and every context of a trace references
//! the same [`TraceDecision`] cell, which holds the sampling priority, the
//! origin and the propagated `_dd.p.*` tags.
//!
//! The types in this module are plain values: creating spans, sampling and
//! exporting them is the job of an SDK built on top of this crate.
//!
//! [`TraceId`]: crate::TraceId
mod error_info;
mod sampling;
mod span_context;

pub use error_info::ErrorInfo;
pub use sampling::{
    SamplingDecision, SamplingMechanism, SamplingPriority, TraceDecision, DECISION_MAKER_TAG,
    PROPAGATED_TAG_PREFIX,
};
pub use span_context::SpanContext;
