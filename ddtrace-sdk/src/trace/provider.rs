//! # Tracer Provider
//!
//! The `TracerProvider` owns everything the tracers of a process share: the
//! configuration, the sampler, the id generator, the propagators and the span
//! processors. Tracers are created through it; each tracer has its own scope
//! stack, so one tracer is meant to serve one logical execution context such
//! as a request.
//!
//! ## Cloning and Shutdown
//!
//! Cloning a `TracerProvider` creates a new reference to the same provider.
//! Dropping the last reference shuts it down, which flushes the span
//! processors. Once shut down, tracers only produce non-recording spans.
//!
//! # Examples
//!
//! ```
//! use ddtrace_sdk::trace::{Config, SpanOptions, TracerProvider};
//!
//! let provider = TracerProvider::builder()
//!     .with_config(Config::builtin())
//!     .with_service("web")
//!     .build();
//!
//! let tracer = provider.tracer();
//! let span = tracer.start_span("http.request", SpanOptions::default());
//! span.set_tag("http.method", "GET");
//! span.finish();
//!
//! provider.shutdown().unwrap();
//! ```
use crate::error::{DdSdkError, DdSdkResult};
use crate::propagation::composite_for;
use crate::trace::span::FinishObserver;
use crate::trace::{
    Config, DatadogSampler, IdGenerator, RandomIdGenerator, ScopeManager, ShouldSample,
    SpanData, SpanExporter, SpanProcessor, TraceAggregatingProcessor, Tracer,
};
use ddtrace::propagation::TextMapCompositePropagator;
use ddtrace::{dd_debug, dd_info, TraceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct TraceSpans {
    open: usize,
    recorded: usize,
}

/// TracerProvider inner type
#[derive(Debug)]
pub(crate) struct TracerProviderInner {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Config,
    sampler: Box<dyn ShouldSample>,
    id_generator: Box<dyn IdGenerator>,
    extract_propagator: TextMapCompositePropagator,
    inject_propagator: TextMapCompositePropagator,
    traces: Mutex<HashMap<TraceId, TraceSpans>>,
    is_shutdown: AtomicBool,
}

impl TracerProviderInner {
    /// Crate-private shutdown method to be called both from explicit shutdown
    /// and from Drop when the last reference is released.
    fn shutdown(&self) -> Vec<DdSdkResult> {
        let mut results = vec![];
        for processor in &self.processors {
            let result = processor.shutdown();
            if let Err(err) = &result {
                dd_debug!(name: "TracerProvider.Drop.ShutdownError", error = format!("{}", err));
            }
            results.push(result);
        }
        results
    }

    /// Registers a new span of `trace_id`. Returns `false` when the trace
    /// already recorded as many spans as allowed.
    ///
    /// The count covers one chunk: it is dropped with the last open span of
    /// the trace, when the chunk is handed to the processors, so spans of the
    /// same trace started afterwards get a fresh budget.
    pub(crate) fn admit_span(&self, trace_id: TraceId) -> bool {
        let Ok(mut traces) = self.traces.lock() else {
            return true;
        };
        let spans = traces.entry(trace_id).or_default();
        let limit = self.config.spans_limit;
        if limit > 0 && spans.recorded >= limit {
            if spans.open == 0 {
                let _ = traces.remove(&trace_id);
            }
            dd_debug!(name: "Tracer.SpansLimitReached", limit = limit);
            return false;
        }
        spans.recorded += 1;
        spans.open += 1;
        true
    }

    fn release_span(&self, trace_id: TraceId) {
        if let Ok(mut traces) = self.traces.lock() {
            if let Some(spans) = traces.get_mut(&trace_id) {
                spans.open = spans.open.saturating_sub(1);
                if spans.open == 0 {
                    let _ = traces.remove(&trace_id);
                }
            }
        }
    }
}

impl FinishObserver for TracerProviderInner {
    fn on_finish(&self, data: SpanData) {
        self.release_span(data.span_context.trace_id());
        // skip if provider has been shut down
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }
        match self.processors.as_slice() {
            [] => {}
            [processor] => processor.on_end(data),
            processors => {
                for processor in processors {
                    processor.on_end(data.clone());
                }
            }
        }
    }
}

impl Drop for TracerProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            let _ = self.shutdown(); // errors are handled within shutdown
        } else {
            dd_debug!(
                name: "TracerProvider.Drop.AlreadyShutdown",
                message = "TracerProvider was already shut down; drop will not attempt shutdown again."
            );
        }
    }
}

/// Creator of [`Tracer`] instances.
///
/// `TracerProvider` is a container holding pointers to the span processors
/// and other shared components. Cloning it and dropping the clone does not
/// stop span processing.
#[derive(Clone, Debug)]
pub struct TracerProvider {
    inner: Arc<TracerProviderInner>,
}

impl Default for TracerProvider {
    fn default() -> Self {
        TracerProvider::builder().build()
    }
}

impl TracerProvider {
    /// Create a new [`TracerProvider`] builder.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Creates a tracer with its own, empty scope stack.
    pub fn tracer(&self) -> Tracer {
        Tracer::new(self.clone(), ScopeManager::new())
    }

    pub(crate) fn inner(&self) -> &Arc<TracerProviderInner> {
        &self.inner
    }

    pub(crate) fn span_processors(&self) -> &[Box<dyn SpanProcessor>] {
        &self.inner.processors
    }

    /// Configuration shared by every tracer of this provider.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn sampler(&self) -> &dyn ShouldSample {
        self.inner.sampler.as_ref()
    }

    pub(crate) fn id_generator(&self) -> &dyn IdGenerator {
        self.inner.id_generator.as_ref()
    }

    pub(crate) fn extract_propagator(&self) -> &TextMapCompositePropagator {
        &self.inner.extract_propagator
    }

    pub(crate) fn inject_propagator(&self) -> &TextMapCompositePropagator {
        &self.inner.inject_propagator
    }

    /// true if the provider has been shutdown
    /// Don't start span or export spans when provider is shutdown
    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Relaxed)
    }

    /// Hands every buffered span to the exporters, including partial chunks
    /// of traces that still have open spans.
    pub fn force_flush(&self) -> DdSdkResult {
        let result: Vec<_> = self
            .span_processors()
            .iter()
            .map(|processor| processor.force_flush())
            .collect();
        if result.iter().all(|r| r.is_ok()) {
            Ok(())
        } else {
            Err(DdSdkError::InternalFailure(format!("errs: {:?}", result)))
        }
    }

    /// Shuts down the current `TracerProvider`.
    pub fn shutdown(&self) -> DdSdkResult {
        if self
            .inner
            .is_shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // propagate the shutdown signal to processors
            let results = self.inner.shutdown();

            if results.iter().all(|res| res.is_ok()) {
                Ok(())
            } else {
                Err(DdSdkError::InternalFailure(format!(
                    "Shutdown errors: {:?}",
                    results
                        .into_iter()
                        .filter_map(Result::err)
                        .collect::<Vec<_>>() // Collect only the errors
                )))
            }
        } else {
            Err(DdSdkError::AlreadyShutdown)
        }
    }
}

/// Builder for provider attributes.
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Option<Config>,
    sampler: Option<Box<dyn ShouldSample>>,
    id_generator: Option<Box<dyn IdGenerator>>,
    service: Option<String>,
    env: Option<String>,
    version: Option<String>,
    global_tags: Vec<(String, String)>,
}

impl TracerProviderBuilder {
    /// Exports finished trace chunks through a [`TraceAggregatingProcessor`].
    pub fn with_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        self.with_span_processor(TraceAggregatingProcessor::new(Box::new(exporter)))
    }

    /// Adds a [`SpanProcessor`] to the pipeline.
    pub fn with_span_processor<T: SpanProcessor + 'static>(self, processor: T) -> Self {
        let mut processors = self.processors;
        processors.push(Box::new(processor));

        TracerProviderBuilder { processors, ..self }
    }

    /// Replaces the configuration read from the environment.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the sampler built from the configuration.
    pub fn with_sampler<T: ShouldSample + 'static>(mut self, sampler: T) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    /// Replaces the random id generator.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    /// Overrides the default service.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Overrides the environment.
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Overrides the application version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Adds a tag to every span.
    pub fn with_global_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_tags.push((key.into(), value.into()));
        self
    }

    /// Create a new provider from this configuration.
    pub fn build(self) -> TracerProvider {
        let mut config = self.config.unwrap_or_default();
        if let Some(service) = self.service {
            config.service = service;
        }
        if let Some(env) = self.env {
            config.env = Some(env);
        }
        if let Some(version) = self.version {
            config.version = Some(version);
        }
        config.global_tags.extend(self.global_tags);

        let sampler = self
            .sampler
            .unwrap_or_else(|| Box::new(default_sampler(&config)));
        let id_generator = self.id_generator.unwrap_or_else(|| {
            if config.trace_id_128_bit {
                Box::new(RandomIdGenerator::with_128_bit_trace_ids())
            } else {
                Box::new(RandomIdGenerator::new())
            }
        });
        let extract_propagator = composite_for(
            &config.propagation_style_extract,
            config.tags_header_max_length,
        );
        let inject_propagator = composite_for(
            &config.propagation_style_inject,
            config.tags_header_max_length,
        );

        dd_info!(
            name: "TracerProvider.Built",
            service = config.service.as_str(),
            env = config.env.as_deref().unwrap_or(""),
            enabled = config.enabled,
            processors = self.processors.len()
        );

        TracerProvider {
            inner: Arc::new(TracerProviderInner {
                processors: self.processors,
                config,
                sampler,
                id_generator,
                extract_propagator,
                inject_propagator,
                traces: Mutex::new(HashMap::new()),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

fn default_sampler(config: &Config) -> DatadogSampler {
    let mut sampler = DatadogSampler::new(config.sampling_rules.clone())
        .with_rate_limit(config.rate_limit);
    if let Some(rate) = config.sample_rate {
        sampler = sampler.with_default_rate(rate);
    }
    if let Some(env) = &config.env {
        sampler = sampler.with_env(env.as_str());
    }
    sampler
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{Span, SpanOptions};
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    struct TestSpanProcessor {
        success: bool,
        started: Arc<AtomicU32>,
        ended: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
    }

    impl TestSpanProcessor {
        fn new(success: bool) -> Self {
            TestSpanProcessor {
                success,
                started: Arc::new(AtomicU32::new(0)),
                ended: Arc::new(AtomicU32::new(0)),
                shutdowns: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    impl SpanProcessor for TestSpanProcessor {
        fn on_start(&self, _span: &Span) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_end(&self, _span: SpanData) {
            self.ended.fetch_add(1, Ordering::SeqCst);
        }

        fn force_flush(&self) -> DdSdkResult {
            if self.success {
                Ok(())
            } else {
                Err(DdSdkError::InternalFailure("cannot export".into()))
            }
        }

        fn shutdown(&self) -> DdSdkResult {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.force_flush()
        }
    }

    #[test]
    fn test_force_flush() {
        let tracer_provider = TracerProvider::builder()
            .with_config(Config::builtin())
            .with_span_processor(TestSpanProcessor::new(true))
            .with_span_processor(TestSpanProcessor::new(false))
            .build();

        assert!(tracer_provider.force_flush().is_err());
    }

    #[test]
    fn processors_see_start_and_end() {
        let processor = TestSpanProcessor::new(true);
        let (started, ended) = (processor.started.clone(), processor.ended.clone());
        let provider = TracerProvider::builder()
            .with_config(Config::builtin())
            .with_span_processor(processor)
            .build();

        let span = provider.tracer().start_span("op", SpanOptions::default());
        span.finish();
        span.finish();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_noops() {
        let processor = TestSpanProcessor::new(true);
        let (started, shutdowns) = (processor.started.clone(), processor.shutdowns.clone());
        let provider = TracerProvider::builder()
            .with_config(Config::builtin())
            .with_span_processor(processor)
            .build();

        assert!(provider.shutdown().is_ok());
        assert!(matches!(provider.shutdown(), Err(DdSdkError::AlreadyShutdown)));

        let span = provider.tracer().start_span("after", SpanOptions::default());
        assert!(!span.is_recording());
        assert!(!span.span_context().is_valid());
        assert_eq!(started.load(Ordering::SeqCst), 0);

        drop(provider);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_shuts_down_once() {
        let processor = TestSpanProcessor::new(true);
        let shutdowns = processor.shutdowns.clone();
        let provider = TracerProvider::builder()
            .with_config(Config::builtin())
            .with_span_processor(processor)
            .build();
        let clone = provider.clone();

        drop(provider);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
        drop(clone);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn builder_overrides_config() {
        let provider = TracerProvider::builder()
            .with_config(Config::builtin())
            .with_service("checkout")
            .with_env("staging")
            .with_version("2.0")
            .with_global_tag("team", "payments")
            .build();

        let config = provider.config();
        assert_eq!(config.service, "checkout");
        assert_eq!(config.env.as_deref(), Some("staging"));
        assert_eq!(config.version.as_deref(), Some("2.0"));
        assert_eq!(config.global_tags.get("team").map(String::as_str), Some("payments"));
    }
}
