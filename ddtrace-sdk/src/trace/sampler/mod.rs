//! Priority sampling.
//!
//! A trace is sampled once, when its local root span starts. The decision is
//! written to the trace decision cell of the root's [`SpanContext`], which every
//! descendant shares, so children never consult the sampler again.
//!
//! [`DatadogSampler`] evaluates, in order:
//!
//! 1. the `manual.keep` / `manual.drop` tags of the root span;
//! 2. the sampling rules, first match wins;
//! 3. the configured global sample rate;
//! 4. the per service rates reported by the agent;
//! 5. a built-in rate of 100%.
//!
//! Decisions from steps 1 to 3 are user decisions (`USER_KEEP` /
//! `USER_REJECT`), the others are automatic. Keeping a trace with probability
//! `rate` is a deterministic function of the trace id, so every tracer seeing
//! the same trace id and rate reaches the same verdict.
//!
//! [`SpanContext`]: ddtrace::trace::SpanContext
mod agent_rates;
mod glob;
mod rate_limiter;
mod rule;

pub use rule::{parse_rules, RuleError, RuleFormat, SamplingRule};

use agent_rates::AgentRates;
use ddtrace::trace::{SamplingMechanism, SamplingPriority};
use ddtrace::{dd_debug, dd_warn, TraceId};
use rate_limiter::RateLimiter;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Tag forcing a trace to be kept.
pub const MANUAL_KEEP: &str = "manual.keep";
/// Tag forcing a trace to be dropped.
pub const MANUAL_DROP: &str = "manual.drop";

/// Metric holding the rate applied by a rule or the global sample rate.
pub const RULE_RATE_METRIC: &str = "_dd.rule_psr";
/// Metric holding the rate applied from agent rates or the built-in default.
pub const AGENT_RATE_METRIC: &str = "_dd.agent_psr";
/// Metric holding the effective rate of the rate limiter on limited traces.
pub const LIMITER_RATE_METRIC: &str = "_dd.limit_psr";

// Multiplier spreading sequential ids over the whole u64 range.
const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;

/// What the sampler knows about the root span of a trace.
#[derive(Clone, Copy, Debug)]
pub struct SamplingCandidate<'a> {
    /// Trace being decided.
    pub trace_id: TraceId,
    /// Service of the root span, after service mapping.
    pub service: &'a str,
    /// Operation name of the root span.
    pub name: &'a str,
    /// Resource of the root span.
    pub resource: &'a str,
    /// Tags of the root span at the time of the decision.
    pub tags: &'a BTreeMap<String, String>,
    /// Metrics of the root span at the time of the decision.
    pub metrics: &'a BTreeMap<String, f64>,
}

/// Outcome of a sampling decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingResult {
    /// Priority to record on the trace.
    pub priority: SamplingPriority,
    /// What produced it.
    pub mechanism: SamplingMechanism,
    /// Keep probability that was applied.
    pub rate: f64,
    /// Effective limiter rate, set only when the limiter rejected the trace.
    pub limit_rate: Option<f64>,
}

impl SamplingResult {
    /// Metrics to record on the root span.
    pub fn metrics(&self) -> Vec<(&'static str, f64)> {
        let mut metrics = Vec::with_capacity(2);
        match self.mechanism {
            SamplingMechanism::Rule => metrics.push((RULE_RATE_METRIC, self.rate)),
            SamplingMechanism::AgentRate | SamplingMechanism::Default => {
                metrics.push((AGENT_RATE_METRIC, self.rate))
            }
            SamplingMechanism::Manual => {}
        }
        if let Some(limit_rate) = self.limit_rate {
            metrics.push((LIMITER_RATE_METRIC, limit_rate));
        }
        metrics
    }
}

/// The [`ShouldSample`] interface decides the priority of a new trace from
/// its root span.
///
/// The tracer calls it at most once per trace.
pub trait ShouldSample: Send + Sync + fmt::Debug {
    /// Returns the [`SamplingResult`] for the trace rooted at `candidate`.
    fn should_sample(&self, candidate: &SamplingCandidate<'_>) -> SamplingResult;
}

/// The Datadog sampling engine.
///
/// Rules and agent rates can be replaced at any time from any thread.
/// Replacement swaps the whole set at once: a concurrent decision sees either
/// the old or the new set, never a mix.
#[derive(Debug)]
pub struct DatadogSampler {
    rules: RwLock<Arc<Vec<SamplingRule>>>,
    agent_rates: RwLock<Arc<AgentRates>>,
    default_rate: Option<f64>,
    env: String,
    limiter: Option<RateLimiter>,
}

impl Default for DatadogSampler {
    fn default() -> Self {
        DatadogSampler::new(Vec::new())
    }
}

impl DatadogSampler {
    /// Creates a sampler with the given rules, no global rate, no limiter.
    pub fn new(rules: Vec<SamplingRule>) -> Self {
        DatadogSampler {
            rules: RwLock::new(Arc::new(rules)),
            agent_rates: RwLock::new(Arc::new(AgentRates::default())),
            default_rate: None,
            env: String::new(),
            limiter: None,
        }
    }

    /// Sets the global sample rate applied when no rule matches.
    pub fn with_default_rate(mut self, rate: f64) -> Self {
        self.default_rate = Some(rule::clamp_rate(rate));
        self
    }

    /// Sets the environment used to look up agent rates.
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    /// Limits user keeps to `per_second` traces per second. Zero disables
    /// limiting.
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = RateLimiter::new(per_second);
        self
    }

    /// Replaces the rule set.
    pub fn update_rules(&self, rules: Vec<SamplingRule>) {
        let rules = Arc::new(rules);
        match self.rules.write() {
            Ok(mut current) => *current = rules,
            Err(poisoned) => *poisoned.into_inner() = rules,
        }
    }

    /// Parses and installs a JSON rule set, returning the errors of the
    /// entries that were skipped.
    pub fn update_rules_from_json(&self, json: &str, format: RuleFormat) -> Vec<RuleError> {
        let (rules, errors) = parse_rules(json, format);
        self.update_rules(rules);
        errors
    }

    /// Installs the rates of an agent response such as
    /// `{"rate_by_service":{"service:web,env:prod":0.5}}`.
    ///
    /// A malformed body leaves the current rates untouched.
    pub fn update_agent_rates(&self, json: &str) -> Result<(), serde_json::Error> {
        let rates = match AgentRates::from_json(json) {
            Ok(rates) => Arc::new(rates),
            Err(err) => {
                dd_warn!(name: "Sampler.InvalidAgentRates", reason = format!("{}", err));
                return Err(err);
            }
        };
        match self.agent_rates.write() {
            Ok(mut current) => *current = rates,
            Err(poisoned) => *poisoned.into_inner() = rates,
        }
        Ok(())
    }

    /// Number of installed rules.
    pub fn rule_count(&self) -> usize {
        self.current_rules().len()
    }

    /// Decides the priority of a trace from its root service and operation
    /// name.
    ///
    /// The rate limiter is not consulted, so the answer only depends on the
    /// arguments and the installed rules and rates.
    pub fn decide(&self, service: &str, name: &str, trace_id: TraceId) -> SamplingPriority {
        let empty_tags = BTreeMap::new();
        let empty_metrics = BTreeMap::new();
        let candidate = SamplingCandidate {
            trace_id,
            service,
            name,
            resource: name,
            tags: &empty_tags,
            metrics: &empty_metrics,
        };
        self.evaluate(&candidate, false).priority
    }

    fn current_rules(&self) -> Arc<Vec<SamplingRule>> {
        match self.rules.read() {
            Ok(rules) => Arc::clone(&rules),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn current_agent_rates(&self) -> Arc<AgentRates> {
        match self.agent_rates.read() {
            Ok(rates) => Arc::clone(&rates),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn evaluate(&self, candidate: &SamplingCandidate<'_>, apply_limiter: bool) -> SamplingResult {
        if candidate.tags.contains_key(MANUAL_KEEP) {
            return manual(SamplingPriority::UserKeep, 1.0);
        }
        if candidate.tags.contains_key(MANUAL_DROP) {
            return manual(SamplingPriority::UserReject, 0.0);
        }

        let rules = self.current_rules();
        let (rate, mechanism) = match rules.iter().find(|rule| rule.matches(candidate)) {
            Some(rule) => (rule.sample_rate(), SamplingMechanism::Rule),
            None => match self.default_rate {
                Some(rate) => (rate, SamplingMechanism::Rule),
                None => {
                    let agent_rates = self.current_agent_rates();
                    if agent_rates.is_empty() {
                        (1.0, SamplingMechanism::Default)
                    } else {
                        let rate = agent_rates
                            .rate_for(candidate.service, &self.env)
                            .unwrap_or(1.0);
                        (rate, SamplingMechanism::AgentRate)
                    }
                }
            },
        };

        let keep = sample_by_rate(rate, candidate.trace_id);
        let user = mechanism == SamplingMechanism::Rule;

        let mut limit_rate = None;
        if keep && user && apply_limiter {
            if let Some(limiter) = &self.limiter {
                if !limiter.allow() {
                    limit_rate = Some(limiter.effective_rate());
                    dd_debug!(name: "Sampler.RateLimited", trace_id = candidate.trace_id.low());
                }
            }
        }
        let keep = keep && limit_rate.is_none();

        let priority = match (user, keep) {
            (true, true) => SamplingPriority::UserKeep,
            (true, false) => SamplingPriority::UserReject,
            (false, true) => SamplingPriority::AutoKeep,
            (false, false) => SamplingPriority::AutoReject,
        };

        SamplingResult {
            priority,
            mechanism,
            rate,
            limit_rate,
        }
    }
}

impl ShouldSample for DatadogSampler {
    fn should_sample(&self, candidate: &SamplingCandidate<'_>) -> SamplingResult {
        self.evaluate(candidate, true)
    }
}

fn manual(priority: SamplingPriority, rate: f64) -> SamplingResult {
    SamplingResult {
        priority,
        mechanism: SamplingMechanism::Manual,
        rate,
        limit_rate: None,
    }
}

/// Keeps a trace with probability `rate`, deterministically in its trace id.
///
/// Only the lower 64 bits take part, so 64-bit and 128-bit tracers agree.
pub(crate) fn sample_by_rate(rate: f64, trace_id: TraceId) -> bool {
    if rate >= 1.0 {
        return true;
    }
    if rate <= 0.0 || rate.is_nan() {
        return false;
    }
    let threshold = (rate * u64::MAX as f64) as u64;
    trace_id.low().wrapping_mul(KNUTH_FACTOR) < threshold
}
