use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

/// Propagated tag holding the mechanism that made the keep decision.
pub const DECISION_MAKER_TAG: &str = "_dd.p.dm";

/// Prefix shared by all tags that travel in the `x-datadog-tags` header.
pub const PROPAGATED_TAG_PREFIX: &str = "_dd.p.";

/// The keep/drop verdict attached to a whole trace.
///
/// `AUTO_*` values come from the tracer's own sampling, `USER_*` values from
/// explicit rules, a configured sample rate or manual overrides. A `USER_*`
/// value is never replaced by an `AUTO_*` one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplingPriority {
    /// Drop, decided by the user.
    UserReject,
    /// Drop, decided by the tracer.
    AutoReject,
    /// Keep, decided by the tracer.
    AutoKeep,
    /// Keep, decided by the user.
    UserKeep,
}

impl SamplingPriority {
    /// Wire value of the priority.
    pub const fn as_i8(self) -> i8 {
        match self {
            SamplingPriority::UserReject => -1,
            SamplingPriority::AutoReject => 0,
            SamplingPriority::AutoKeep => 1,
            SamplingPriority::UserKeep => 2,
        }
    }

    /// Maps a wire value back to a priority.
    ///
    /// Values outside `-1..=2` are clamped to the nearest user priority, which is
    /// how upstream tracers sending out-of-range priorities are interpreted.
    pub fn from_i64(value: i64) -> Self {
        match value {
            i64::MIN..=-1 => SamplingPriority::UserReject,
            0 => SamplingPriority::AutoReject,
            1 => SamplingPriority::AutoKeep,
            _ => SamplingPriority::UserKeep,
        }
    }

    /// Returns `true` for both keep priorities.
    pub const fn is_keep(self) -> bool {
        matches!(self, SamplingPriority::AutoKeep | SamplingPriority::UserKeep)
    }

    /// Returns `true` for priorities set by the user.
    pub const fn is_user(self) -> bool {
        matches!(self, SamplingPriority::UserKeep | SamplingPriority::UserReject)
    }
}

impl fmt::Display for SamplingPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

/// What produced a sampling decision, reported in the `_dd.p.dm` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplingMechanism {
    /// Built-in default when no rate is known.
    Default,
    /// Per service rate computed by the agent.
    AgentRate,
    /// A sampling rule or the configured global sample rate.
    Rule,
    /// A manual `manual.keep` / `manual.drop` override.
    Manual,
}

impl SamplingMechanism {
    /// Numeric identifier of the mechanism.
    pub const fn as_u8(self) -> u8 {
        match self {
            SamplingMechanism::Default => 0,
            SamplingMechanism::AgentRate => 1,
            SamplingMechanism::Rule => 3,
            SamplingMechanism::Manual => 4,
        }
    }

    /// Value written to the `_dd.p.dm` propagated tag.
    pub fn decision_maker(self) -> String {
        format!("-{}", self.as_u8())
    }
}

/// A priority together with the mechanism that set it.
///
/// `mechanism` is `None` when the priority was received from an upstream
/// service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplingDecision {
    /// The keep/drop verdict.
    pub priority: SamplingPriority,
    /// What produced it, if it was made locally.
    pub mechanism: Option<SamplingMechanism>,
}

#[derive(Debug, Default)]
struct DecisionState {
    decision: Option<SamplingDecision>,
    origin: Option<String>,
    propagated_tags: BTreeMap<String, String>,
    propagation_error: Option<String>,
}

/// The trace-scoped cell shared by every [`SpanContext`] of one trace.
///
/// Children reference the same cell as their parent, so a priority set from
/// any span is observed by all of them. The cell also holds the other
/// trace-level state that crosses process boundaries: the origin and the
/// `_dd.p.*` propagated tags.
///
/// [`SpanContext`]: crate::trace::SpanContext
#[derive(Debug, Default)]
pub struct TraceDecision {
    state: Mutex<DecisionState>,
}

impl TraceDecision {
    /// An undecided cell with no origin.
    pub fn new() -> Self {
        TraceDecision::default()
    }

    /// A cell populated from an inbound carrier.
    pub fn remote(
        priority: Option<SamplingPriority>,
        origin: Option<String>,
        propagated_tags: BTreeMap<String, String>,
    ) -> Self {
        TraceDecision {
            state: Mutex::new(DecisionState {
                decision: priority.map(|priority| SamplingDecision {
                    priority,
                    mechanism: None,
                }),
                origin,
                propagated_tags,
                propagation_error: None,
            }),
        }
    }

    /// The current decision, if any.
    pub fn decision(&self) -> Option<SamplingDecision> {
        self.state.lock().ok().and_then(|state| state.decision)
    }

    /// The current priority, if any.
    pub fn priority(&self) -> Option<SamplingPriority> {
        self.decision().map(|d| d.priority)
    }

    /// Records a priority.
    ///
    /// An `AUTO_*` priority never replaces a `USER_*` one; the call is then
    /// ignored and `false` is returned.
    pub fn set_priority(&self, priority: SamplingPriority, mechanism: SamplingMechanism) -> bool {
        match self.state.lock() {
            Ok(mut state) => {
                if let Some(current) = state.decision {
                    if current.priority.is_user() && !priority.is_user() {
                        return false;
                    }
                }
                apply(&mut state, priority, mechanism);
                true
            }
            Err(_) => false,
        }
    }

    /// Records a priority only when no decision exists yet.
    ///
    /// Used by the sampler at trace roots, so a trace is decided at most once.
    pub fn set_priority_if_unset(
        &self,
        priority: SamplingPriority,
        mechanism: SamplingMechanism,
    ) -> bool {
        match self.state.lock() {
            Ok(mut state) if state.decision.is_none() => {
                apply(&mut state, priority, mechanism);
                true
            }
            _ => false,
        }
    }

    /// Origin of a distributed trace, such as `synthetics`.
    pub fn origin(&self) -> Option<String> {
        self.state.lock().ok().and_then(|state| state.origin.clone())
    }

    /// Sets the origin of the trace.
    pub fn set_origin(&self, origin: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.origin = Some(origin.into());
        }
    }

    /// A snapshot of the `_dd.p.*` tags.
    pub fn propagated_tags(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .map(|state| state.propagated_tags.clone())
            .unwrap_or_default()
    }

    /// Returns a single propagated tag.
    pub fn propagated_tag(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.propagated_tags.get(key).cloned())
    }

    /// Sets a propagated tag. Keys outside the `_dd.p.` namespace are ignored.
    pub fn set_propagated_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !key.starts_with(PROPAGATED_TAG_PREFIX) {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            let _ = state.propagated_tags.insert(key, value.into());
        }
    }

    /// Why propagated tags were discarded while decoding a carrier, recorded
    /// on the local root span as `_dd.propagation_error`.
    pub fn propagation_error(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.propagation_error.clone())
    }

    /// Records a propagation error.
    pub fn set_propagation_error(&self, error: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.propagation_error = Some(error.into());
        }
    }

    /// Removes a propagated tag.
    pub fn remove_propagated_tag(&self, key: &str) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.propagated_tags.remove(key);
        }
    }
}

fn apply(state: &mut DecisionState, priority: SamplingPriority, mechanism: SamplingMechanism) {
    state.decision = Some(SamplingDecision {
        priority,
        mechanism: Some(mechanism),
    });
    if priority.is_keep() {
        let _ = state
            .propagated_tags
            .insert(DECISION_MAKER_TAG.to_string(), mechanism.decision_maker());
    } else {
        let _ = state.propagated_tags.remove(DECISION_MAKER_TAG);
    }
}
