/*
    Span Creation scenarios.
    This benchmark measures the cost of the span creation patterns of the
    tracer when traces are kept or dropped by a sampling rule.
*/

use criterion::{criterion_group, criterion_main, Criterion};
use ddtrace_sdk::{
    error::DdSdkResult,
    trace::{Config, SamplingRule, SpanData, SpanExporter, SpanOptions, Tracer, TracerProvider},
};
use std::collections::HashMap;

fn criterion_benchmark(c: &mut Criterion) {
    trace_benchmark_group(c, "span-creation-simple", |tracer| {
        let span = tracer.start_span("span-name", SpanOptions::default());
        span.set_tag("key1", "hello");
        span.set_metric("key2", 123.456);
        span.finish();
    });

    trace_benchmark_group(c, "span-creation-with-options", |tracer| {
        let span = tracer.start_span(
            "span-name",
            SpanOptions::new()
                .with_service("db")
                .with_resource("SELECT 1")
                .with_tag("key1", "hello")
                .with_metric("key2", 123.456),
        );
        span.finish();
    });

    trace_benchmark_group(c, "span-creation-active-child", |tracer| {
        let scope = tracer.start_active_span("parent", SpanOptions::default());
        tracer.start_span("child", SpanOptions::default()).finish();
        scope.close();
    });

    trace_benchmark_group(c, "span-inject", |tracer| {
        let span = tracer.start_span("client", SpanOptions::default());
        let mut headers: HashMap<String, String> = HashMap::new();
        tracer.inject(span.span_context(), &mut headers);
        span.finish();
    });
}

#[derive(Debug)]
struct VoidExporter;

impl SpanExporter for VoidExporter {
    fn export(&mut self, _chunk: Vec<SpanData>) -> DdSdkResult {
        Ok(())
    }
}

fn trace_benchmark_group<F: Fn(&Tracer)>(c: &mut Criterion, name: &str, f: F) {
    let mut group = c.benchmark_group(name);

    group.bench_function("keep", |b| {
        let provider = TracerProvider::builder()
            .with_config(Config::builtin())
            .with_exporter(VoidExporter)
            .build();
        let tracer = provider.tracer();
        b.iter(|| f(&tracer));
    });

    group.bench_function("drop", |b| {
        let mut config = Config::builtin();
        config.sampling_rules = vec![SamplingRule::new(None, None, 0.0)];
        let provider = TracerProvider::builder()
            .with_config(config)
            .with_exporter(VoidExporter)
            .build();
        let tracer = provider.tracer();
        b.iter(|| f(&tracer));
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
