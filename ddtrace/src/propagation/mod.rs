//! # Propagator interface
//!
//! Propagators carry a [`SpanContext`] across process boundaries by reading
//! and writing it to the messages exchanged between services. A text map
//! propagator works on flat string key/value carriers such as HTTP headers.
//!
//! Propagators use [`Injector`] and [`Extractor`] to write to and read from
//! the carrier. Keys are case-insensitive on read and written in their
//! canonical lowercase form.
//!
//! [`SpanContext`]: crate::trace::SpanContext
use std::borrow::Cow;
use std::collections::HashMap;

pub mod composite;
pub mod text_map_propagator;

pub use composite::TextMapCompositePropagator;
pub use text_map_propagator::{FieldIter, TextMapPropagator};

/// Injector provides an interface for adding fields to an underlying carrier like `HashMap`
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for reading fields from an underlying carrier like `HashMap`
pub trait Extractor {
    /// Get a value from a key from the underlying data.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap, lowercasing the key.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    ///
    /// Carriers filled by hand may hold mixed-case keys, so a miss on the
    /// lowercase key falls back to a case-insensitive scan.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        let lower = key.to_lowercase();
        self.get(&lower)
            .or_else(|| {
                self.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&lower))
                    .map(|(_, v)| v)
            })
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys()
            .map(|k| Cow::Borrowed(k.as_str()))
            .collect::<Vec<_>>()
    }
}
