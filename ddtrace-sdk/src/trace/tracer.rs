//! # Tracer
//!
//! The tracer creates spans, keeps track of the active one and moves span
//! contexts across process boundaries.
//!
//! A span started without an explicit parent becomes a child of the active
//! span of the tracer's scope stack, or the root of a new trace when the stack
//! is empty. The first span of a trace in this process, the local root, is
//! where the sampler is consulted.
use crate::error::DdSdkResult;
use crate::trace::sampler::SamplingCandidate;
use crate::trace::span::{apply_manual_tag, FinishObserver, SpanRecord};
use crate::trace::{Scope, ScopeManager, Span, TracerProvider};
use ddtrace::baggage::Baggage;
use ddtrace::propagation::{Extractor, Injector, TextMapPropagator};
use ddtrace::trace::SpanContext;
use ddtrace::{dd_debug, SpanId, TraceId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Metric holding the id of the process, set on local root spans.
pub const PROCESS_ID_METRIC: &str = "process_id";

/// What a new span descends from.
#[derive(Clone, Debug)]
pub enum Parent {
    /// A span of this process. The child inherits its service and cannot
    /// start before it.
    Span(Span),
    /// A bare context, usually extracted from a carrier.
    Context(SpanContext),
}

impl Parent {
    /// Context the child is derived from.
    pub fn span_context(&self) -> &SpanContext {
        match self {
            Parent::Span(span) => span.span_context(),
            Parent::Context(context) => context,
        }
    }
}

impl From<Span> for Parent {
    fn from(span: Span) -> Self {
        Parent::Span(span)
    }
}

impl From<&Span> for Parent {
    fn from(span: &Span) -> Self {
        Parent::Span(span.clone())
    }
}

impl From<SpanContext> for Parent {
    fn from(context: SpanContext) -> Self {
        Parent::Context(context)
    }
}

impl From<&SpanContext> for Parent {
    fn from(context: &SpanContext) -> Self {
        Parent::Context(context.clone())
    }
}

/// Options of a span about to be started.
///
/// ```
/// use ddtrace_sdk::trace::SpanOptions;
///
/// let options = SpanOptions::new()
///     .with_service("db")
///     .with_resource("SELECT * FROM users")
///     .with_span_type("sql")
///     .with_tag("db.name", "users");
/// ```
#[derive(Clone, Debug, Default)]
pub struct SpanOptions {
    parent: Option<Parent>,
    service: Option<String>,
    resource: Option<String>,
    span_type: Option<String>,
    tags: Vec<(String, String)>,
    metrics: Vec<(String, f64)>,
    start_time: Option<SystemTime>,
    ignore_active: bool,
}

impl SpanOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        SpanOptions::default()
    }

    /// Explicit parent, taking precedence over the active span.
    pub fn child_of(mut self, parent: impl Into<Parent>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Service of the span. Defaults to the parent's, then to the configured
    /// service.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Resource of the span. Defaults to the operation name.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Span type such as `web`.
    pub fn with_span_type(mut self, span_type: impl Into<String>) -> Self {
        self.span_type = Some(span_type.into());
        self
    }

    /// Initial string tag, visible to the sampler.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Initial numeric tag, visible to the sampler.
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.push((key.into(), value));
        self
    }

    /// Explicit start time.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Start a new trace even when a span is active.
    pub fn ignore_active_span(mut self) -> Self {
        self.ignore_active = true;
        self
    }
}

/// Creates spans and owns a stack of active scopes.
///
/// Clones share the provider and the scope stack. Use
/// [`TracerProvider::tracer`] to get a tracer with a stack of its own.
#[derive(Clone)]
pub struct Tracer {
    provider: TracerProvider,
    scopes: ScopeManager,
}

impl fmt::Debug for Tracer {
    /// Omitting `provider` here is necessary to avoid cycles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Tracer {
    pub(crate) fn new(provider: TracerProvider, scopes: ScopeManager) -> Self {
        Tracer { provider, scopes }
    }

    /// TracerProvider associated with this tracer.
    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// The scope stack of this tracer.
    pub fn scope_manager(&self) -> &ScopeManager {
        &self.scopes
    }

    /// The span of the innermost open scope.
    pub fn active_span(&self) -> Option<Span> {
        self.scopes.active()
    }

    /// Makes `span` active until the returned scope is closed.
    pub fn activate(&self, span: Span, finish_on_close: bool) -> Scope {
        self.scopes.activate(span, finish_on_close)
    }

    /// Starts a span and activates it. The span is finished when the scope
    /// closes.
    pub fn start_active_span(&self, name: impl Into<String>, options: SpanOptions) -> Scope {
        let span = self.start_span(name, options);
        self.scopes.activate(span, true)
    }

    /// Starts a span.
    ///
    /// A disabled or shut down tracer returns a non-recording span with an
    /// invalid context. Spans above the per trace limit are non-recording but
    /// still carry a valid context, so their descendants stay in the trace.
    pub fn start_span(&self, name: impl Into<String>, options: SpanOptions) -> Span {
        let provider = &self.provider;
        let config = provider.config();
        if !config.enabled || provider.is_shutdown() {
            return Span::non_recording(SpanContext::new_root(
                TraceId::INVALID,
                SpanId::INVALID,
                Baggage::new(),
            ));
        }

        let SpanOptions {
            parent,
            service,
            resource,
            span_type,
            tags,
            metrics,
            start_time,
            ignore_active,
        } = options;
        let name = name.into();
        let parent = parent
            .or_else(|| {
                if ignore_active {
                    None
                } else {
                    self.scopes.active().map(Parent::Span)
                }
            })
            .filter(|parent| parent.span_context().is_valid());

        let id_generator = provider.id_generator();
        let span_id = id_generator.new_span_id();
        let (span_context, parent_span, is_local_root) = match &parent {
            Some(Parent::Span(span)) => (span.span_context().create_child(span_id), Some(span), false),
            Some(Parent::Context(context)) => {
                (context.create_child(span_id), None, context.is_remote())
            }
            None => (
                SpanContext::new_root(id_generator.new_trace_id(), span_id, Baggage::new()),
                None,
                true,
            ),
        };

        if !provider.inner().admit_span(span_context.trace_id()) {
            return Span::non_recording(span_context);
        }

        let service = service
            .or_else(|| parent_span.and_then(Span::service))
            .unwrap_or_else(|| config.service.clone());
        let service = config.map_service(&service).to_string();
        let resource = resource.unwrap_or_else(|| name.clone());

        let mut span_tags = config.global_tags.clone();
        if let Some(env) = &config.env {
            let _ = span_tags.insert("env".to_string(), env.clone());
        }
        if let Some(version) = &config.version {
            let _ = span_tags.insert("version".to_string(), version.clone());
        }
        for (key, value) in tags {
            apply_manual_tag(&span_context, &key);
            let _ = span_tags.insert(key, value);
        }
        let mut span_metrics: BTreeMap<String, f64> = metrics.into_iter().collect();
        if is_local_root {
            let _ = span_metrics.insert(PROCESS_ID_METRIC.to_string(), f64::from(std::process::id()));
        }

        if span_context.sampling_priority().is_none() {
            let candidate = SamplingCandidate {
                trace_id: span_context.trace_id(),
                service: &service,
                name: &name,
                resource: &resource,
                tags: &span_tags,
                metrics: &span_metrics,
            };
            let result = provider.sampler().should_sample(&candidate);
            if span_context
                .decision()
                .set_priority_if_unset(result.priority, result.mechanism)
            {
                for (key, value) in result.metrics() {
                    let _ = span_metrics.insert(key.to_string(), value);
                }
            }
        }

        let (mut start_time, mut started_at) = match start_time {
            Some(start_time) => (start_time, None),
            None => (SystemTime::now(), Some(Instant::now())),
        };
        if let Some(parent_start) = parent_span.and_then(Span::start_time) {
            if start_time < parent_start {
                dd_debug!(
                    name: "Tracer.StartTimeClamped",
                    span_id = span_id.as_u64()
                );
                start_time = parent_start;
                started_at = None;
            }
        }

        let record = SpanRecord {
            name,
            service,
            resource,
            span_type,
            start_time,
            started_at,
            duration: None,
            tags: span_tags,
            metrics: span_metrics,
            error: None,
            is_local_root,
        };
        let observer: Arc<dyn FinishObserver> = provider.inner().clone();
        let span = Span::new(span_context, record, observer);
        for processor in provider.span_processors() {
            processor.on_start(&span);
        }
        span
    }

    /// Decodes a remote context with the configured extraction styles.
    pub fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        self.provider.extract_propagator().extract(extractor)
    }

    /// Encodes `context` with the configured injection styles.
    pub fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        self.provider.inject_propagator().inject(context, injector)
    }

    /// Exports everything finished so far. With `autofinish_spans` enabled,
    /// spans still active on this tracer's stack are finished first.
    pub fn flush(&self) -> DdSdkResult {
        if self.provider.config().autofinish_spans {
            for span in self.scopes.drain() {
                span.finish();
            }
        }
        self.provider.force_flush()
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::*;
    use crate::trace::sampler::{AGENT_RATE_METRIC, MANUAL_KEEP, RULE_RATE_METRIC};
    use crate::trace::{
        Config, IncrementIdGenerator, InMemorySpanExporter, SamplingRule, SpanData,
        SAMPLING_PRIORITY_METRIC,
    };
    use ddtrace::trace::{SamplingMechanism, SamplingPriority, TraceDecision};
    use rstest::rstest;
    use std::collections::HashMap;
    use std::time::Duration;

    fn setup_with(config: Config) -> (Tracer, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_config(config)
            .with_id_generator(IncrementIdGenerator::new())
            .with_exporter(exporter.clone())
            .build();
        (provider.tracer(), exporter)
    }

    fn setup() -> (Tracer, InMemorySpanExporter) {
        setup_with(Config::builtin())
    }

    fn finished(exporter: &InMemorySpanExporter, name: &str) -> SpanData {
        exporter
            .get_finished_spans()
            .unwrap()
            .into_iter()
            .find(|span| span.name == name)
            .unwrap()
    }

    #[test]
    fn root_span_defaults() {
        let (tracer, exporter) = setup();
        let span = tracer.start_span("web.request", SpanOptions::default());
        span.finish();

        let data = finished(&exporter, "web.request");
        assert!(data.is_local_root);
        assert_eq!(data.parent_id, None);
        assert_eq!(data.service, "unnamed-service");
        assert_eq!(data.resource, "web.request");
        assert_eq!(
            data.metrics.get(PROCESS_ID_METRIC),
            Some(&f64::from(std::process::id()))
        );
        assert_eq!(data.metrics.get(AGENT_RATE_METRIC), Some(&1.0));
        assert_eq!(
            data.metrics.get(SAMPLING_PRIORITY_METRIC),
            Some(&f64::from(SamplingPriority::AutoKeep.as_i8()))
        );
    }

    #[test]
    fn children_inherit_from_parent_span() {
        let (tracer, exporter) = setup();
        let root = tracer.start_span("root", SpanOptions::new().with_service("billing"));
        let child = tracer.start_span("child", SpanOptions::new().child_of(&root));

        assert_eq!(child.span_context().trace_id(), root.span_context().trace_id());
        assert_eq!(child.span_context().parent_id(), Some(root.span_context().span_id()));
        assert!(child.span_context().shares_decision_with(root.span_context()));
        child.finish();
        root.finish();

        let data = finished(&exporter, "child");
        assert!(!data.is_local_root);
        assert_eq!(data.service, "billing");
        assert_eq!(data.metrics.get(PROCESS_ID_METRIC), None);
        assert_eq!(data.metrics.get(AGENT_RATE_METRIC), None);
    }

    #[test]
    fn active_span_is_implicit_parent() {
        let (tracer, _exporter) = setup();
        let scope = tracer.start_active_span("outer", SpanOptions::default());
        let inner = tracer.start_span("inner", SpanOptions::default());
        let detached = tracer.start_span("detached", SpanOptions::new().ignore_active_span());

        assert_eq!(inner.span_context().parent_id(), Some(scope.span().span_context().span_id()));
        assert_ne!(detached.span_context().trace_id(), scope.span().span_context().trace_id());
        assert_eq!(detached.span_context().parent_id(), None);

        let outer = scope.span().clone();
        scope.close();
        assert!(outer.is_finished());
        assert!(tracer.active_span().is_none());
    }

    #[test]
    fn remote_parent_makes_a_local_root() {
        let (tracer, exporter) = setup();
        let remote = SpanContext::new_remote(
            TraceId::from(42u128),
            SpanId::from(7),
            TraceDecision::remote(Some(SamplingPriority::UserReject), None, BTreeMap::new()),
            Baggage::new(),
        );
        let span = tracer.start_span("server", SpanOptions::new().child_of(&remote));
        span.finish();

        let data = finished(&exporter, "server");
        assert!(data.is_local_root);
        assert_eq!(data.span_context.trace_id(), TraceId::from(42u128));
        assert_eq!(data.parent_id, Some(SpanId::from(7)));
        assert_eq!(data.metrics.get(AGENT_RATE_METRIC), None);
        assert_eq!(
            data.metrics.get(SAMPLING_PRIORITY_METRIC),
            Some(&f64::from(SamplingPriority::UserReject.as_i8()))
        );
    }

    #[test]
    fn undecided_remote_trace_is_sampled_locally() {
        let rule = SamplingRule::new(None, None, 0.0);
        let config = Config {
            sampling_rules: vec![rule],
            ..Config::builtin()
        };
        let (tracer, _exporter) = setup_with(config);
        let remote = SpanContext::new_remote(
            TraceId::from(42u128),
            SpanId::from(7),
            TraceDecision::remote(None, None, BTreeMap::new()),
            Baggage::new(),
        );
        let span = tracer.start_span("server", SpanOptions::new().child_of(remote));

        assert_eq!(span.span_context().sampling_priority(), Some(SamplingPriority::UserReject));
        assert_eq!(span.metric(RULE_RATE_METRIC), Some(0.0));
    }

    #[test]
    fn manual_keep_option_wins_over_rules() {
        let rule = SamplingRule::new(None, None, 0.0);
        let config = Config {
            sampling_rules: vec![rule],
            ..Config::builtin()
        };
        let (tracer, _exporter) = setup_with(config);
        let span = tracer.start_span("op", SpanOptions::new().with_tag(MANUAL_KEEP, ""));

        let decision = span.span_context().decision().decision().unwrap();
        assert_eq!(decision.priority, SamplingPriority::UserKeep);
        assert_eq!(decision.mechanism, Some(SamplingMechanism::Manual));
    }

    #[rstest]
    #[case::earlier_than_parent(-5, 0)]
    #[case::later_than_parent(5, 5)]
    fn start_time_is_clamped_to_parent(#[case] offset_secs: i64, #[case] expected_secs: u64) {
        let (tracer, _exporter) = setup();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let root = tracer.start_span("root", SpanOptions::new().with_start_time(base));

        let requested = if offset_secs < 0 {
            base - Duration::from_secs(offset_secs.unsigned_abs())
        } else {
            base + Duration::from_secs(offset_secs.unsigned_abs())
        };
        let child = tracer.start_span(
            "child",
            SpanOptions::new().child_of(&root).with_start_time(requested),
        );
        assert_eq!(child.start_time(), Some(base + Duration::from_secs(expected_secs)));
    }

    #[test]
    fn service_mapping_and_configured_tags() {
        let config = Config {
            env: Some("prod".to_string()),
            version: Some("1.2.3".to_string()),
            global_tags: BTreeMap::from([("team".to_string(), "core".to_string())]),
            service_mapping: HashMap::from([("mysql".to_string(), "mysql-orders".to_string())]),
            ..Config::builtin()
        };
        let (tracer, _exporter) = setup_with(config);
        let span = tracer.start_span("query", SpanOptions::new().with_service("mysql"));

        assert_eq!(span.service().as_deref(), Some("mysql-orders"));
        assert_eq!(span.tag("env").as_deref(), Some("prod"));
        assert_eq!(span.tag("version").as_deref(), Some("1.2.3"));
        assert_eq!(span.tag("team").as_deref(), Some("core"));
    }

    #[test]
    fn disabled_tracer_records_nothing() {
        let config = Config {
            enabled: false,
            ..Config::builtin()
        };
        let (tracer, exporter) = setup_with(config);
        let span = tracer.start_span("op", SpanOptions::default());
        span.set_tag("a", "b");
        span.finish();

        assert!(!span.span_context().is_valid());
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn spans_above_the_limit_do_not_record() {
        let config = Config {
            spans_limit: 2,
            ..Config::builtin()
        };
        let (tracer, exporter) = setup_with(config);
        let root = tracer.start_span("root", SpanOptions::default());
        let first = tracer.start_span("first", SpanOptions::new().child_of(&root));
        let second = tracer.start_span("second", SpanOptions::new().child_of(&first));

        assert!(first.is_recording());
        assert!(!second.is_recording());
        assert_eq!(second.span_context().trace_id(), root.span_context().trace_id());

        second.finish();
        first.finish();
        root.finish();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 2);
    }

    #[test]
    fn span_limit_applies_per_chunk() {
        let config = Config {
            spans_limit: 2,
            ..Config::builtin()
        };
        let (tracer, exporter) = setup_with(config);
        let root = tracer.start_span("root", SpanOptions::default());
        let child = tracer.start_span("child", SpanOptions::new().child_of(&root));
        child.finish();
        root.finish();
        assert_eq!(exporter.get_finished_chunks().unwrap().len(), 1);

        let late = tracer.start_span(
            "late",
            SpanOptions::new().child_of(root.span_context().clone()),
        );
        assert!(late.is_recording());
        assert_eq!(late.span_context().trace_id(), root.span_context().trace_id());
        late.finish();

        let chunks = exporter.get_finished_chunks().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 1);
        assert_eq!(chunks[1][0].name, "late");
    }

    #[test]
    fn flush_finishes_active_spans_when_configured() {
        let config = Config {
            autofinish_spans: true,
            ..Config::builtin()
        };
        let (tracer, exporter) = setup_with(config);
        let outer = tracer.start_active_span("outer", SpanOptions::default());
        let inner = tracer.start_active_span("inner", SpanOptions::default());

        tracer.flush().unwrap();
        assert!(tracer.active_span().is_none());
        assert!(outer.span().is_finished());
        assert!(inner.span().is_finished());
        assert_eq!(exporter.get_finished_chunks().unwrap().len(), 1);
    }

    #[test]
    fn flush_leaves_active_spans_open_by_default() {
        let (tracer, exporter) = setup();
        let scope = tracer.start_active_span("outer", SpanOptions::default());

        tracer.flush().unwrap();
        assert!(scope.span().is_recording());
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn inject_then_extract() {
        let (tracer, _exporter) = setup();
        let span = tracer.start_span("client", SpanOptions::default());
        let mut headers: HashMap<String, String> = HashMap::new();
        tracer.inject(span.span_context(), &mut headers);

        let extracted = tracer.extract(&headers).unwrap();
        assert!(extracted.is_remote());
        assert_eq!(extracted.trace_id(), span.span_context().trace_id());
        assert_eq!(extracted.span_id(), span.span_context().span_id());
        assert_eq!(extracted.sampling_priority(), Some(SamplingPriority::AutoKeep));
    }
}
