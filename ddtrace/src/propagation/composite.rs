//! # Composite Propagator
//!
//! Groups several text map propagators so that a service can speak more than
//! one header style at once, for example Datadog and W3C trace context.
use crate::propagation::{Extractor, FieldIter, Injector, TextMapPropagator};
use crate::trace::SpanContext;
use std::collections::HashSet;

/// Composite propagator for [`TextMapPropagator`]s.
///
/// Injection runs every propagator in order. Extraction uses the first
/// propagator that yields a context; later propagators only contribute
/// baggage items, and only when they agree on the trace id.
#[derive(Debug)]
pub struct TextMapCompositePropagator {
    propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>>,
    fields: Vec<String>,
}

impl TextMapCompositePropagator {
    /// Constructs a new propagator out of instances of [`TextMapPropagator`].
    pub fn new(propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>>) -> Self {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for propagator in &propagators {
            for field in propagator.fields() {
                if seen.insert(field.to_string()) {
                    fields.push(field.to_string());
                }
            }
        }

        TextMapCompositePropagator {
            propagators,
            fields,
        }
    }

    /// Returns `true` if no propagator was configured.
    pub fn is_empty(&self) -> bool {
        self.propagators.is_empty()
    }
}

impl TextMapPropagator for TextMapCompositePropagator {
    fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        for propagator in &self.propagators {
            propagator.inject(context, injector)
        }
    }

    fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        let mut extracted: Option<SpanContext> = None;
        for propagator in &self.propagators {
            let Some(candidate) = propagator.extract(extractor) else {
                continue;
            };
            extracted = match extracted {
                None => Some(candidate),
                Some(current) if current.trace_id() == candidate.trace_id() => {
                    let mut merged = current;
                    for (key, value) in candidate.baggage().iter() {
                        if merged.baggage_item(key).is_none() {
                            merged = merged.with_baggage_item(key, value);
                        }
                    }
                    Some(merged)
                }
                Some(current) => Some(current),
            };
        }
        extracted
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(self.fields.as_slice())
    }
}
