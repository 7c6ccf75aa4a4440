//! # Span
//!
//! A `Span` represents a single operation within a trace. Spans nest to form
//! a trace tree; the span without a local parent is the local root of the
//! trace in this process.
//!
//! A span is open until it is finished, and finished forever after. Finishing
//! twice is a no-op, and every mutation of a finished span is silently
//! ignored, so instrumentation racing with a flush can never corrupt a span
//! that was already handed to the exporter.
use crate::trace::sampler::{MANUAL_DROP, MANUAL_KEEP};
use ddtrace::dd_debug;
use ddtrace::trace::{ErrorInfo, SamplingMechanism, SamplingPriority, SpanContext};
use ddtrace::SpanId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Tag holding the error type.
pub const ERROR_TYPE_TAG: &str = "error.type";
/// Tag holding the error message.
pub const ERROR_MESSAGE_TAG: &str = "error.message";
/// Tag holding the error stack.
pub const ERROR_STACK_TAG: &str = "error.stack";

/// Receives spans once they are finished.
///
/// This is the only capability a span holds on the tracer that created it.
pub(crate) trait FinishObserver: Send + Sync + fmt::Debug {
    fn on_finish(&self, data: SpanData);
}

/// `SpanData` contains all the information collected by a finished `Span`
/// and is what exporters receive.
#[derive(Clone, Debug)]
pub struct SpanData {
    /// Context of the span, sharing the trace decision cell.
    pub span_context: SpanContext,
    /// Span parent id, `None` for a trace root.
    pub parent_id: Option<SpanId>,
    /// `true` when the parent lives in another process or there is none.
    pub is_local_root: bool,
    /// Operation name
    pub name: String,
    /// Service name
    pub service: String,
    /// Resource name
    pub resource: String,
    /// Span type such as `web` or `sql`
    pub span_type: Option<String>,
    /// Span start time
    pub start_time: SystemTime,
    /// Span duration, microsecond resolution
    pub duration: Duration,
    /// String tags
    pub tags: BTreeMap<String, String>,
    /// Numeric tags
    pub metrics: BTreeMap<String, f64>,
    /// Error recorded on the span
    pub error: Option<ErrorInfo>,
}

impl SpanData {
    /// Returns `true` if an error was recorded.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug)]
pub(crate) struct SpanRecord {
    pub(crate) name: String,
    pub(crate) service: String,
    pub(crate) resource: String,
    pub(crate) span_type: Option<String>,
    pub(crate) start_time: SystemTime,
    // set only when the start time was taken from the clock
    pub(crate) started_at: Option<Instant>,
    pub(crate) duration: Option<Duration>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) metrics: BTreeMap<String, f64>,
    pub(crate) error: Option<ErrorInfo>,
    pub(crate) is_local_root: bool,
}

impl SpanRecord {
    fn is_finished(&self) -> bool {
        self.duration.is_some()
    }
}

/// Single operation within a trace.
///
/// `Span` is a cheap handle: clones refer to the same operation, which is how
/// a span is shared between the caller, the scope stack and its children.
/// Spans produced by a disabled tracer, or above the per trace span limit,
/// are non-recording and accept every call without effect.
#[derive(Clone)]
pub struct Span {
    span_context: SpanContext,
    data: Option<Arc<Mutex<SpanRecord>>>,
    observer: Option<Arc<dyn FinishObserver>>,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("span_context", &self.span_context)
            .field("data", &self.data)
            .finish()
    }
}

impl Span {
    pub(crate) fn new(
        span_context: SpanContext,
        record: SpanRecord,
        observer: Arc<dyn FinishObserver>,
    ) -> Self {
        Span {
            span_context,
            data: Some(Arc::new(Mutex::new(record))),
            observer: Some(observer),
        }
    }

    /// A span that records nothing.
    pub(crate) fn non_recording(span_context: SpanContext) -> Self {
        Span {
            span_context,
            data: None,
            observer: None,
        }
    }

    /// Operate on a mutable reference to an open span's record.
    fn with_data<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut SpanRecord) -> T,
    {
        let data = self.data.as_ref()?;
        let mut guard = data.lock().ok()?;
        if guard.is_finished() {
            dd_debug!(
                name: "Span.MutatedAfterFinish",
                span_id = self.span_context.span_id().as_u64()
            );
            return None;
        }
        Some(f(&mut guard))
    }

    /// Operate on a shared reference to the span's record, open or finished.
    fn with_data_ref<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&SpanRecord) -> T,
    {
        self.data
            .as_ref()
            .and_then(|data| data.lock().ok().map(|guard| f(&guard)))
    }

    /// Returns the `SpanContext` of this span.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Returns `true` while the span is open and recording.
    pub fn is_recording(&self) -> bool {
        self.with_data_ref(|data| !data.is_finished()).unwrap_or(false)
    }

    /// Returns `true` once the span has been finished.
    pub fn is_finished(&self) -> bool {
        self.with_data_ref(SpanRecord::is_finished).unwrap_or(false)
    }

    /// Returns `true` if `other` is a handle to the same span.
    pub fn same_span(&self, other: &Span) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => self.span_context.span_id() == other.span_context.span_id(),
            _ => false,
        }
    }

    /// Sets a string tag.
    ///
    /// `manual.keep` and `manual.drop` force the priority of the whole trace
    /// to `USER_KEEP` / `USER_REJECT`.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let applied = self.with_data(|data| {
            let _ = data.tags.insert(key.clone(), value);
        });
        if applied.is_some() {
            apply_manual_tag(&self.span_context, &key);
        }
    }

    /// Alias of [`Span::set_tag`].
    pub fn set_meta(&self, key: impl Into<String>, value: impl Into<String>) {
        self.set_tag(key, value)
    }

    /// Sets a numeric tag.
    pub fn set_metric(&self, key: impl Into<String>, value: f64) {
        let key = key.into();
        self.with_data(|data| {
            let _ = data.metrics.insert(key, value);
        });
    }

    /// Records an error: the `error.*` tags and the error flag.
    pub fn set_error(&self, error: ErrorInfo) {
        self.with_data(|data| {
            let _ = data
                .tags
                .insert(ERROR_TYPE_TAG.to_string(), error.kind.clone());
            let _ = data
                .tags
                .insert(ERROR_MESSAGE_TAG.to_string(), error.message.clone());
            if let Some(stack) = &error.stack {
                let _ = data.tags.insert(ERROR_STACK_TAG.to_string(), stack.clone());
            }
            data.error = Some(error);
        });
    }

    /// Updates the operation name.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.with_data(|data| data.name = name);
    }

    /// Updates the service name.
    pub fn set_service(&self, service: impl Into<String>) {
        let service = service.into();
        self.with_data(|data| data.service = service);
    }

    /// Updates the resource name.
    pub fn set_resource(&self, resource: impl Into<String>) {
        let resource = resource.into();
        self.with_data(|data| data.resource = resource);
    }

    /// Updates the span type.
    pub fn set_span_type(&self, span_type: impl Into<String>) {
        let span_type = span_type.into();
        self.with_data(|data| data.span_type = Some(span_type));
    }

    /// Returns a string tag.
    pub fn tag(&self, key: &str) -> Option<String> {
        self.with_data_ref(|data| data.tags.get(key).cloned()).flatten()
    }

    /// Returns a numeric tag.
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.with_data_ref(|data| data.metrics.get(key).copied()).flatten()
    }

    /// The operation name.
    pub fn name(&self) -> Option<String> {
        self.with_data_ref(|data| data.name.clone())
    }

    /// The service name.
    pub fn service(&self) -> Option<String> {
        self.with_data_ref(|data| data.service.clone())
    }

    /// The resource name.
    pub fn resource(&self) -> Option<String> {
        self.with_data_ref(|data| data.resource.clone())
    }

    /// The recorded error, if any.
    pub fn error(&self) -> Option<ErrorInfo> {
        self.with_data_ref(|data| data.error.clone()).flatten()
    }

    /// When the span started.
    pub fn start_time(&self) -> Option<SystemTime> {
        self.with_data_ref(|data| data.start_time)
    }

    /// How long the span lasted, once finished.
    pub fn duration(&self) -> Option<Duration> {
        self.with_data_ref(|data| data.duration).flatten()
    }

    /// Finishes the span now.
    pub fn finish(&self) {
        self.finish_inner(None)
    }

    /// Finishes the span at the given time. A time before the start yields a
    /// zero duration.
    pub fn finish_with_timestamp(&self, timestamp: SystemTime) {
        self.finish_inner(Some(timestamp))
    }

    fn finish_inner(&self, timestamp: Option<SystemTime>) {
        let Some(data) = &self.data else {
            return;
        };
        let exported = match data.lock() {
            Ok(mut record) => {
                if record.is_finished() {
                    dd_debug!(
                        name: "Span.AlreadyFinished",
                        span_id = self.span_context.span_id().as_u64()
                    );
                    return;
                }
                let elapsed = match (timestamp, record.started_at) {
                    (Some(end), _) => end.duration_since(record.start_time).unwrap_or_default(),
                    (None, Some(started_at)) => started_at.elapsed(),
                    (None, None) => SystemTime::now()
                        .duration_since(record.start_time)
                        .unwrap_or_default(),
                };
                record.duration = Some(truncate_to_micros(elapsed));
                build_export_data(&record, &self.span_context)
            }
            Err(_) => return,
        };
        if let Some(observer) = &self.observer {
            observer.on_finish(exported);
        }
    }

    /// Convert information in this span into `SpanData`, open or finished.
    pub fn exported_data(&self) -> Option<SpanData> {
        self.with_data_ref(|data| build_export_data(data, &self.span_context))
    }
}

/// Forces the trace priority when `key` is `manual.keep` or `manual.drop`.
pub(crate) fn apply_manual_tag(span_context: &SpanContext, key: &str) {
    let priority = match key {
        MANUAL_KEEP => SamplingPriority::UserKeep,
        MANUAL_DROP => SamplingPriority::UserReject,
        _ => return,
    };
    let _ = span_context
        .decision()
        .set_priority(priority, SamplingMechanism::Manual);
}

fn truncate_to_micros(duration: Duration) -> Duration {
    Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

fn build_export_data(record: &SpanRecord, span_context: &SpanContext) -> SpanData {
    SpanData {
        span_context: span_context.clone(),
        parent_id: span_context.parent_id(),
        is_local_root: record.is_local_root,
        name: record.name.clone(),
        service: record.service.clone(),
        resource: record.resource.clone(),
        span_type: record.span_type.clone(),
        start_time: record.start_time,
        duration: record.duration.unwrap_or_default(),
        tags: record.tags.clone(),
        metrics: record.metrics.clone(),
        error: record.error.clone(),
    }
}
