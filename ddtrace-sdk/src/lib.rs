//! Tracer, sampling engine and propagators for Datadog distributed tracing.
//!
//! This crate builds on the data model of the [`ddtrace`] crate. It creates
//! and finishes spans, tracks the active span of an execution context,
//! decides which traces are kept, and encodes span contexts in Datadog and
//! W3C trace context headers.
//!
//! # Getting started
//!
//! ```no_run
//! use ddtrace_sdk::trace::{SpanOptions, TracerProvider};
//! use std::collections::HashMap;
//!
//! // configuration is read from `DD_*` environment variables
//! let provider = TracerProvider::builder().build();
//! let tracer = provider.tracer();
//!
//! // continue a trace started by an upstream service
//! let mut headers = HashMap::new();
//! headers.insert("x-datadog-trace-id".to_string(), "1234".to_string());
//! headers.insert("x-datadog-parent-id".to_string(), "5678".to_string());
//! let mut options = SpanOptions::new().with_resource("GET /users");
//! if let Some(remote) = tracer.extract(&headers) {
//!     options = options.child_of(remote);
//! }
//!
//! let request = tracer.start_active_span("http.request", options);
//! {
//!     // implicitly a child of the active span
//!     let query = tracer.start_span("db.query", SpanOptions::new().with_span_type("sql"));
//!     query.set_tag("db.name", "users");
//!     query.finish();
//! }
//! request.close();
//!
//! provider.shutdown().unwrap();
//! ```
//!
//! # Crate Feature Flags
//!
//! * `internal-logs`: emits the tracer's own diagnostics through `tracing`.
//!   Enabled by default.
//! * `testing`: exposes [`trace::InMemorySpanExporter`] and
//!   [`trace::IncrementIdGenerator`] for tests.
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

pub mod error;
pub mod propagation;
pub mod trace;
