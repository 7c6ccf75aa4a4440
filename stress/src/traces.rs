/*
    Stress test for span creation: a local root with one child, both tagged,
    exported to a void exporter.

    Run with `cargo run --release --bin traces`.
*/

use ddtrace_sdk::{
    error::DdSdkResult,
    trace::{Config, SpanData, SpanExporter, SpanOptions, Tracer, TracerProvider},
};
use lazy_static::lazy_static;

mod throughput;

lazy_static! {
    static ref PROVIDER: TracerProvider = TracerProvider::builder()
        .with_config(Config::builtin())
        .with_service("stress")
        .with_exporter(VoidExporter)
        .build();
}

thread_local! {
    static TRACER: Tracer = PROVIDER.tracer();
}

#[derive(Debug)]
struct VoidExporter;

impl SpanExporter for VoidExporter {
    fn export(&mut self, _chunk: Vec<SpanData>) -> DdSdkResult {
        Ok(())
    }
}

fn main() {
    throughput::test_throughput(test_span);
}

fn test_span() {
    TRACER.with(|tracer| {
        let root = tracer.start_active_span(
            "test_span",
            SpanOptions::new()
                .with_tag("tag_at_span_start1", "value1")
                .with_tag("tag_at_span_start2", "value2"),
        );
        let child = tracer.start_span("test_child", SpanOptions::default());
        child.set_tag("key3", "value3");
        child.set_metric("key4", 4.0);
        child.finish();
        root.close();
    });
}
