use crate::error::{DdSdkError, DdSdkResult};
use crate::trace::{SpanData, SpanExporter};
use std::sync::{Arc, Mutex};

/// An in-memory span exporter that keeps every exported trace chunk.
///
/// This exporter is useful for testing and debugging purposes. Clones share
/// the same storage, so a clone can be handed to the provider and the
/// original inspected afterwards.
///
/// # Example
/// ```
///# use ddtrace_sdk::trace::{Config, InMemorySpanExporter, SpanOptions, TracerProvider};
/// let exporter = InMemorySpanExporter::default();
/// let provider = TracerProvider::builder()
///     .with_config(Config::builtin())
///     .with_exporter(exporter.clone())
///     .build();
///
/// let tracer = provider.tracer();
/// let root = tracer.start_span("say hello", SpanOptions::default());
/// root.finish();
///
/// let chunks = exporter.get_finished_chunks().unwrap();
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0][0].name, "say hello");
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    chunks: Arc<Mutex<Vec<Vec<SpanData>>>>,
}

impl InMemorySpanExporter {
    /// Returns the exported trace chunks, in export order.
    ///
    /// # Errors
    ///
    /// Returns a `DdSdkError` if the internal lock cannot be acquired.
    pub fn get_finished_chunks(&self) -> Result<Vec<Vec<SpanData>>, DdSdkError> {
        self.chunks
            .lock()
            .map(|chunks| chunks.clone())
            .map_err(DdSdkError::from)
    }

    /// Returns every exported span, chunk boundaries removed.
    ///
    /// # Errors
    ///
    /// Returns a `DdSdkError` if the internal lock cannot be acquired.
    pub fn get_finished_spans(&self) -> Result<Vec<SpanData>, DdSdkError> {
        self.chunks
            .lock()
            .map(|chunks| chunks.iter().flatten().cloned().collect())
            .map_err(DdSdkError::from)
    }

    /// Clears the internal storage of finished chunks.
    pub fn reset(&self) {
        let _ = self.chunks.lock().map(|mut chunks| chunks.clear());
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, chunk: Vec<SpanData>) -> DdSdkResult {
        self.chunks
            .lock()
            .map(|mut chunks| chunks.push(chunk))
            .map_err(|err| DdSdkError::InternalFailure(format!("Failed to lock spans: {:?}", err)))
    }
}
