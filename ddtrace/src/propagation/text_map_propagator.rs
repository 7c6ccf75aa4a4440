//! # Text Propagator
//!
//! `TextMapPropagator` reads and writes a [`SpanContext`] as string key/value
//! pairs.
//!
//! [`SpanContext`]: crate::trace::SpanContext
use crate::propagation::{Extractor, Injector};
use crate::trace::SpanContext;
use std::fmt::Debug;
use std::slice;

/// Methods to inject and extract a [`SpanContext`] into and from a text map carrier.
///
/// Implementations must never panic on malformed carriers: anything they
/// cannot decode is reported as `None`.
pub trait TextMapPropagator: Debug {
    /// Encodes `context` into the carrier.
    ///
    /// Injection has no side effect on the context.
    fn inject(&self, context: &SpanContext, injector: &mut dyn Injector);

    /// Decodes a remote [`SpanContext`] from the carrier.
    ///
    /// Returns `None` if the required fields are absent or unparsable. Unknown
    /// keys are ignored.
    fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext>;

    /// Returns iter of fields used by [`TextMapPropagator`]
    fn fields(&self) -> FieldIter<'_>;
}

/// An iterator over fields of a [`TextMapPropagator`]
#[derive(Debug)]
pub struct FieldIter<'a>(slice::Iter<'a, String>);

impl<'a> FieldIter<'a> {
    /// Create a new `FieldIter` from a slice of propagator fields
    pub fn new(fields: &'a [String]) -> Self {
        FieldIter(fields.iter())
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|field| field.as_str())
    }
}
