use crate::baggage::Baggage;
use crate::trace::sampling::{SamplingPriority, TraceDecision};
use crate::{SpanId, TraceId};
use std::sync::Arc;

/// Immutable portion of a span that can be serialized and propagated.
///
/// A `SpanContext` identifies one span within a trace and carries the state
/// that every descendant inherits:
///
/// * baggage, copied by value when a child is forked;
/// * the trace decision cell (sampling priority, origin, propagated tags),
///   shared by reference among all contexts of the trace.
///
/// Contexts are never mutated after construction. Deriving operations such as
/// [`SpanContext::with_baggage_item`] return a new value.
#[derive(Clone, Debug)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_id: Option<SpanId>,
    decision: Arc<TraceDecision>,
    baggage: Baggage,
    is_remote: bool,
}

impl SpanContext {
    /// Creates the context of a trace root: no parent and an undecided
    /// sampling cell.
    pub fn new_root(trace_id: TraceId, span_id: SpanId, baggage: Baggage) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_id: None,
            decision: Arc::new(TraceDecision::new()),
            baggage,
            is_remote: false,
        }
    }

    /// Creates the context of a span living in another process, as decoded
    /// from a carrier.
    ///
    /// `span_id` is the upstream span, which becomes the parent of the first
    /// local span.
    pub fn new_remote(
        trace_id: TraceId,
        span_id: SpanId,
        decision: TraceDecision,
        baggage: Baggage,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_id: None,
            decision: Arc::new(decision),
            baggage,
            is_remote: true,
        }
    }

    /// Forks a child context: same trace id and decision cell, a fresh span
    /// id, this span as parent and a copy of the baggage.
    pub fn create_child(&self, span_id: SpanId) -> Self {
        SpanContext {
            trace_id: self.trace_id,
            span_id,
            parent_id: Some(self.span_id),
            decision: Arc::clone(&self.decision),
            baggage: self.baggage.clone(),
            is_remote: false,
        }
    }

    /// Returns a copy of this context with one more baggage item.
    ///
    /// The receiver is left untouched:
    ///
    /// ```
    /// use ddtrace::{baggage::Baggage, trace::SpanContext, SpanId, TraceId};
    ///
    /// let root = SpanContext::new_root(TraceId::from(1u128), SpanId::from(1), Baggage::new());
    /// let derived = root.with_baggage_item("user.id", "42");
    ///
    /// assert_eq!(derived.baggage_item("user.id"), Some("42"));
    /// assert_eq!(root.baggage_item("user.id"), None);
    /// ```
    pub fn with_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut baggage = self.baggage.clone();
        let _ = baggage.insert(key, value);
        SpanContext {
            baggage,
            ..self.clone()
        }
    }

    /// The trace id.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span id.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The span id of the direct parent, `None` for trace roots and remote
    /// contexts.
    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    /// Returns `true` if this context was decoded from a carrier.
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    /// Returns `true` if both ids are valid.
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }

    /// The trace decision cell shared with every other context of the trace.
    pub fn decision(&self) -> &Arc<TraceDecision> {
        &self.decision
    }

    /// Shortcut for the current sampling priority of the trace.
    pub fn sampling_priority(&self) -> Option<SamplingPriority> {
        self.decision.priority()
    }

    /// Shortcut for the origin of the trace.
    pub fn origin(&self) -> Option<String> {
        self.decision.origin()
    }

    /// The baggage carried by this context.
    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    /// Returns a single baggage item.
    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.baggage.get(key)
    }

    /// Returns `true` if `other` belongs to the same trace and shares its
    /// decision cell.
    pub fn shares_decision_with(&self, other: &SpanContext) -> bool {
        Arc::ptr_eq(&self.decision, &other.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::SamplingMechanism;

    fn root() -> SpanContext {
        SpanContext::new_root(TraceId::from(1337u128), SpanId::from(1), Baggage::new())
    }

    #[test]
    fn child_links_to_parent() {
        let root = root();
        let child = root.create_child(SpanId::from(2));

        assert_eq!(root.parent_id(), None);
        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_id(), Some(root.span_id()));
        assert_eq!(child.span_id(), SpanId::from(2));
        assert!(child.shares_decision_with(&root));
    }

    #[test]
    fn child_observes_priority_set_later_on_parent() {
        let root = root();
        let child = root.create_child(SpanId::from(2));
        let grandchild = child.create_child(SpanId::from(3));

        let _ = root
            .decision()
            .set_priority(SamplingPriority::UserKeep, SamplingMechanism::Manual);

        assert_eq!(child.sampling_priority(), Some(SamplingPriority::UserKeep));
        assert_eq!(grandchild.sampling_priority(), Some(SamplingPriority::UserKeep));
    }

    #[test]
    fn baggage_is_copied_at_fork() {
        let root = root().with_baggage_item("a", "1");
        let child = root.create_child(SpanId::from(2));
        let derived = child.with_baggage_item("b", "2");

        assert_eq!(child.baggage_item("a"), Some("1"));
        assert_eq!(child.baggage_item("b"), None);
        assert_eq!(root.baggage_item("b"), None);
        assert_eq!(derived.baggage().len(), 2);
        assert!(derived.shares_decision_with(&root));
    }

    #[test]
    fn remote_context_is_marked() {
        let remote = SpanContext::new_remote(
            TraceId::from(1337u128),
            SpanId::from(42),
            TraceDecision::new(),
            Baggage::new(),
        );
        assert!(remote.is_remote());
        assert!(remote.is_valid());
        assert!(!remote.create_child(SpanId::from(7)).is_remote());
    }
}
