//! # Span Processor Interface
//!
//! Span processors are hooks for span start and finish. They are invoked
//! only for recording spans, in the order they were registered on the
//! [`TracerProvider`].
//!
//! ```ascii
//!   +-----+---------------+   +---------------------------+   +--------------+
//!   |     |               |   |                           |   |              |
//!   | SDK | Tracer.span() +---> TraceAggregatingProcessor +---> SpanExporter |
//!   |     | Span.finish() |   |                           |   |              |
//!   +-----+---------------+   +---------------------------+   +--------------+
//! ```
//!
//! [`TracerProvider`]: crate::trace::TracerProvider
use crate::error::{DdSdkError, DdSdkResult};
use crate::trace::{Span, SpanData, SpanExporter};
use ddtrace::trace::PROPAGATED_TAG_PREFIX;
use ddtrace::{dd_debug, TraceId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Metric holding the final sampling priority, set on the local root span.
pub const SAMPLING_PRIORITY_METRIC: &str = "_sampling_priority_v1";
/// Tag holding the trace origin, set on every span of a chunk.
pub const ORIGIN_TAG: &str = "_dd.origin";
/// Tag recording why propagated tags were dropped, set on the local root.
pub const PROPAGATION_ERROR_TAG: &str = "_dd.propagation_error";

/// `SpanProcessor` is an interface which allows hooks for span start and
/// finish invocations.
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// `on_start` is called when a recording `Span` is started, synchronously
    /// on the thread that started it. It must not block.
    fn on_start(&self, span: &Span);
    /// `on_end` is called once a `Span` is finished, synchronously within
    /// `Span::finish`.
    fn on_end(&self, span: SpanData);
    /// Hands every buffered span to the exporter.
    fn force_flush(&self) -> DdSdkResult;
    /// Shuts down the processor. Must tolerate being called more than once.
    fn shutdown(&self) -> DdSdkResult;
}

#[derive(Debug, Default)]
struct PendingTrace {
    open: usize,
    finished: Vec<SpanData>,
}

/// A [`SpanProcessor`] that buffers finished spans per trace and exports a
/// trace chunk when the last open span of that trace in this process
/// finishes.
///
/// Before export the chunk is completed with trace level state read from the
/// trace decision cell: the final sampling priority, the `_dd.p.*`
/// propagated tags and propagation errors go on the local root span, the
/// origin on every span.
#[derive(Debug)]
pub struct TraceAggregatingProcessor {
    exporter: Mutex<Box<dyn SpanExporter>>,
    traces: Mutex<HashMap<TraceId, PendingTrace>>,
}

impl TraceAggregatingProcessor {
    /// Create a new [`TraceAggregatingProcessor`] using the provided exporter.
    pub fn new(exporter: Box<dyn SpanExporter>) -> Self {
        TraceAggregatingProcessor {
            exporter: Mutex::new(exporter),
            traces: Mutex::new(HashMap::new()),
        }
    }

    /// Number of traces with spans still open or buffered.
    pub fn pending_traces(&self) -> usize {
        self.traces.lock().map(|traces| traces.len()).unwrap_or(0)
    }

    fn export(&self, chunk: Vec<SpanData>) -> DdSdkResult {
        if chunk.is_empty() {
            return Ok(());
        }
        let chunk = complete_chunk(chunk);
        let result = self
            .exporter
            .lock()
            .map_err(DdSdkError::from)
            .and_then(|mut exporter| exporter.export(chunk));
        if let Err(err) = &result {
            dd_debug!(
                name: "TraceAggregatingProcessor.ExportError",
                reason = format!("{}", err)
            );
        }
        result
    }
}

fn complete_chunk(mut chunk: Vec<SpanData>) -> Vec<SpanData> {
    let Some(context) = chunk.first().map(|span| span.span_context.clone()) else {
        return chunk;
    };
    let decision = context.decision();
    let origin = decision.origin();
    let priority = decision.priority();
    let propagated = decision.propagated_tags();
    let propagation_error = decision.propagation_error();

    for span in chunk.iter_mut() {
        if let Some(origin) = &origin {
            let _ = span.tags.insert(ORIGIN_TAG.to_string(), origin.clone());
        }
        if !span.is_local_root {
            continue;
        }
        if let Some(priority) = priority {
            let _ = span
                .metrics
                .insert(SAMPLING_PRIORITY_METRIC.to_string(), f64::from(priority.as_i8()));
        }
        for (key, value) in &propagated {
            debug_assert!(key.starts_with(PROPAGATED_TAG_PREFIX));
            let _ = span.tags.insert(key.clone(), value.clone());
        }
        if let Some(error) = &propagation_error {
            let _ = span
                .tags
                .insert(PROPAGATION_ERROR_TAG.to_string(), error.clone());
        }
    }
    chunk
}

impl SpanProcessor for TraceAggregatingProcessor {
    fn on_start(&self, span: &Span) {
        let trace_id = span.span_context().trace_id();
        if let Ok(mut traces) = self.traces.lock() {
            traces.entry(trace_id).or_default().open += 1;
        }
    }

    fn on_end(&self, span: SpanData) {
        let trace_id = span.span_context.trace_id();
        let complete = match self.traces.lock() {
            Ok(mut traces) => {
                let pending = traces.entry(trace_id).or_default();
                pending.open = pending.open.saturating_sub(1);
                pending.finished.push(span);
                if pending.open == 0 {
                    traces.remove(&trace_id).map(|pending| pending.finished)
                } else {
                    None
                }
            }
            Err(_) => None,
        };
        if let Some(chunk) = complete {
            let _ = self.export(chunk);
        }
    }

    fn force_flush(&self) -> DdSdkResult {
        let chunks: Vec<Vec<SpanData>> = {
            let mut traces = self.traces.lock()?;
            let chunks = traces
                .values_mut()
                .map(|pending| std::mem::take(&mut pending.finished))
                .filter(|chunk| !chunk.is_empty())
                .collect();
            traces.retain(|_, pending| pending.open > 0);
            chunks
        };

        let mut result = Ok(());
        for chunk in chunks {
            if let Err(err) = self.export(chunk) {
                result = Err(err);
            }
        }
        let flushed = self
            .exporter
            .lock()
            .map_err(DdSdkError::from)
            .and_then(|mut exporter| exporter.force_flush());
        result.and(flushed)
    }

    fn shutdown(&self) -> DdSdkResult {
        let flushed = self.force_flush();
        let shutdown = self
            .exporter
            .lock()
            .map_err(DdSdkError::from)
            .and_then(|mut exporter| exporter.shutdown());
        flushed.and(shutdown)
    }
}
