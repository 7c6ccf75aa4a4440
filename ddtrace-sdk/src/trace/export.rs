//! Trace exporters
use crate::error::DdSdkResult;
use crate::trace::SpanData;
use std::fmt::Debug;

/// `SpanExporter` defines the interface that transports implement to receive
/// finished trace chunks.
///
/// A chunk holds the finished spans of one trace, in finish order. The
/// encoding and transmission of chunks is up to the exporter.
pub trait SpanExporter: Send + Sync + Debug {
    /// Exports one trace chunk.
    ///
    /// This function is never called concurrently for the same exporter
    /// instance and must not block indefinitely.
    fn export(&mut self, chunk: Vec<SpanData>) -> DdSdkResult;

    /// Exports anything the exporter buffered itself.
    fn force_flush(&mut self) -> DdSdkResult {
        Ok(())
    }

    /// Shuts down the exporter. Called once, when the SDK is shut down.
    fn shutdown(&mut self) -> DdSdkResult {
        Ok(())
    }
}
