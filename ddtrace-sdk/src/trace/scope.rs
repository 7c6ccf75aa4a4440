//! Active span tracking.
//!
//! A [`ScopeManager`] keeps an explicit stack of the spans active in one
//! logical execution context, such as one request. Activating a span pushes
//! a [`Scope`]; closing the scope removes it again, wherever it sits in the
//! stack, so scopes closed out of order leave the others untouched.
use crate::trace::Span;
use ddtrace::dd_debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Entry {
    id: u64,
    span: Span,
}

#[derive(Debug, Default)]
struct Stack {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

/// LIFO stack of active spans.
///
/// Clones share the same stack.
#[derive(Clone, Debug, Default)]
pub struct ScopeManager {
    stack: Arc<Stack>,
}

impl ScopeManager {
    /// Creates an empty stack.
    pub fn new() -> Self {
        ScopeManager::default()
    }

    /// Makes `span` the active span until the returned scope is closed.
    ///
    /// With `finish_on_close` the span is finished when the scope closes.
    pub fn activate(&self, span: Span, finish_on_close: bool) -> Scope {
        let id = self.stack.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.stack.entries.lock() {
            entries.push(Entry {
                id,
                span: span.clone(),
            });
        }
        Scope {
            id,
            span,
            finish_on_close,
            manager: self.clone(),
            closed: false,
        }
    }

    /// The span of the most recently activated scope still open.
    pub fn active(&self) -> Option<Span> {
        self.stack
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.last().map(|entry| entry.span.clone()))
    }

    /// Number of open scopes.
    pub fn len(&self) -> usize {
        self.stack
            .entries
            .lock()
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Returns `true` when no scope is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spans of the open scopes, bottom of the stack first.
    pub fn active_spans(&self) -> Vec<Span> {
        self.stack
            .entries
            .lock()
            .map(|entries| entries.iter().map(|entry| entry.span.clone()).collect())
            .unwrap_or_default()
    }

    /// Empties the stack and returns the spans it held, top of the stack
    /// first. Scopes still held by callers become no-ops when closed.
    pub(crate) fn drain(&self) -> Vec<Span> {
        self.stack
            .entries
            .lock()
            .map(|mut entries| entries.drain(..).rev().map(|entry| entry.span).collect())
            .unwrap_or_default()
    }

    fn remove(&self, id: u64) -> bool {
        let Ok(mut entries) = self.stack.entries.lock() else {
            return false;
        };
        match entries.iter().rposition(|entry| entry.id == id) {
            Some(index) => {
                if index + 1 != entries.len() {
                    dd_debug!(
                        name: "Scope.ClosedOutOfOrder",
                        position = index,
                        depth = entries.len()
                    );
                }
                let _ = entries.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Handle marking a span as active.
///
/// Closing the scope, explicitly or by dropping it, removes it from its
/// [`ScopeManager`] and finishes the span if the scope was created with
/// `finish_on_close`.
#[derive(Debug)]
#[must_use = "dropping a scope closes it immediately"]
pub struct Scope {
    id: u64,
    span: Span,
    finish_on_close: bool,
    manager: ScopeManager,
    closed: bool,
}

impl Scope {
    /// The span this scope activates.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Closes the scope.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let removed = self.manager.remove(self.id);
        if removed && self.finish_on_close {
            self.span.finish();
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.close_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddtrace::baggage::Baggage;
    use ddtrace::trace::SpanContext;
    use ddtrace::{SpanId, TraceId};

    fn span(id: u64) -> Span {
        Span::non_recording(SpanContext::new_root(
            TraceId::from(1u128),
            SpanId::from(id),
            Baggage::new(),
        ))
    }

    fn active_ids(manager: &ScopeManager) -> Vec<u64> {
        manager
            .active_spans()
            .iter()
            .map(|span| span.span_context().span_id().as_u64())
            .collect()
    }

    #[test]
    fn lifo_activation() {
        let manager = ScopeManager::new();
        assert!(manager.active().is_none());

        let outer = manager.activate(span(1), false);
        let inner = manager.activate(span(2), false);
        assert_eq!(manager.active().unwrap().span_context().span_id(), SpanId::from(2));

        inner.close();
        assert_eq!(manager.active().unwrap().span_context().span_id(), SpanId::from(1));
        outer.close();
        assert!(manager.is_empty());
    }

    #[test]
    fn out_of_order_close_keeps_relative_order() {
        let manager = ScopeManager::new();
        let first = manager.activate(span(1), false);
        let second = manager.activate(span(2), false);
        let third = manager.activate(span(3), false);

        second.close();
        assert_eq!(active_ids(&manager), vec![1, 3]);
        assert_eq!(manager.active().unwrap().span_context().span_id(), SpanId::from(3));

        first.close();
        assert_eq!(active_ids(&manager), vec![3]);
        drop(third);
        assert!(manager.is_empty());
    }

    #[test]
    fn same_span_activated_twice() {
        let manager = ScopeManager::new();
        let shared = span(7);
        let a = manager.activate(shared.clone(), false);
        let b = manager.activate(shared, false);
        a.close();
        assert_eq!(manager.len(), 1);
        b.close();
        assert!(manager.is_empty());
    }

    #[test]
    fn drained_scopes_close_quietly() {
        let manager = ScopeManager::new();
        let scope = manager.activate(span(1), true);
        assert_eq!(manager.drain().len(), 1);
        scope.close();
        assert!(manager.is_empty());
    }
}
