//! Primitives for sending name/value data across process boundaries.
//!
//! Baggage is a set of user-defined name/value pairs that travel with a trace
//! to every descendant span, locally and across the wire. It is distinct from
//! span tags: baggage is never exported on a span unless the application copies
//! it there.
//!
//! Entries keep their insertion order, so propagated headers are written in a
//! stable order. Names are case-insensitive and stored lowercase, matching
//! the form they take on header carriers.
use indexmap::IndexMap;
use std::fmt;

/// An ordered set of name/value pairs carried by a [`SpanContext`].
///
/// Cloning a `Baggage` copies its entries; the clone and the original evolve
/// independently afterwards.
///
/// [`SpanContext`]: crate::trace::SpanContext
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Baggage {
    inner: IndexMap<String, String>,
}

impl Baggage {
    /// Creates an empty `Baggage`.
    pub fn new() -> Self {
        Baggage::default()
    }

    /// Returns the value associated with a given name.
    ///
    /// # Examples
    /// ```
    /// use ddtrace::baggage::Baggage;
    ///
    /// let mut baggage = Baggage::new();
    /// let _ = baggage.insert("user.id", "42");
    ///
    /// assert_eq!(baggage.get("user.id"), Some("42"));
    /// ```
    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&str> {
        self.inner
            .get(&key.as_ref().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Inserts a name/value pair into the baggage.
    ///
    /// If the name was already present its value is replaced in place and the
    /// old value is returned. Names are lowercased and empty names are ignored.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut key = key.into();
        key.make_ascii_lowercase();
        if key.is_empty() {
            return None;
        }
        self.inner.insert(key, value.into())
    }

    /// Removes a name from the baggage, keeping the order of the other entries.
    pub fn remove<K: AsRef<str>>(&mut self, key: K) -> Option<String> {
        self.inner
            .shift_remove(&key.as_ref().to_ascii_lowercase())
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the baggage contains no items.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Baggage
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut baggage = Baggage::new();
        for (k, v) in iter {
            let _ = baggage.insert(k, v);
        }
        baggage
    }
}

impl fmt::Debug for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

impl fmt::Display for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.inner.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}
