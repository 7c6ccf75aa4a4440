use super::glob::GlobMatcher;
use super::SamplingCandidate;
use ddtrace::dd_debug;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How rule patterns are interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RuleFormat {
    /// `*` matches any run of characters, everything else is literal.
    #[default]
    Glob,
    /// Patterns are regular expressions that must match the whole value.
    Regex,
}

impl FromStr for RuleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glob" => Ok(RuleFormat::Glob),
            "regex" => Ok(RuleFormat::Regex),
            other => Err(format!("unknown sampling rules format: {}", other)),
        }
    }
}

/// Why a sampling rule was dropped at load time.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RuleError {
    /// The rule set is not a JSON array.
    #[error("sampling rules must be a JSON array: {0}")]
    InvalidJson(String),
    /// An entry of the array is not a JSON object.
    #[error("sampling rule #{0} is not an object")]
    NotAnObject(usize),
    /// The entry has no numeric `sample_rate`.
    #[error("sampling rule #{0} has no numeric sample_rate")]
    MissingSampleRate(usize),
    /// A pattern could not be compiled.
    #[error("sampling rule #{index} has an invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Position of the rule in the array.
        index: usize,
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
}

#[derive(Clone)]
enum Pattern {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl Pattern {
    fn compile(pattern: &str, format: RuleFormat) -> Result<Self, regex::Error> {
        match format {
            RuleFormat::Glob => Ok(Pattern::Glob(GlobMatcher::new(pattern))),
            RuleFormat::Regex => Regex::new(&format!("^(?:{})$", pattern)).map(Pattern::Regex),
        }
    }

    fn is_match(&self, subject: &str) -> bool {
        match self {
            Pattern::Glob(glob) => glob.is_match(subject),
            Pattern::Regex(regex) => regex.is_match(subject),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Glob(glob) => write!(f, "Glob({:?})", glob),
            Pattern::Regex(regex) => write!(f, "Regex({:?})", regex.as_str()),
        }
    }
}

/// One entry of the sampling rule set.
///
/// A rule matches when every pattern it declares matches the candidate.
/// Omitted patterns match anything.
#[derive(Clone, Debug)]
pub struct SamplingRule {
    service: Option<Pattern>,
    name: Option<Pattern>,
    resource: Option<Pattern>,
    tags: Vec<(String, Pattern)>,
    sample_rate: f64,
}

impl SamplingRule {
    /// Builds a rule from glob patterns. `None` matches anything.
    ///
    /// The rate is clamped to `[0, 1]`.
    pub fn new(service: Option<&str>, name: Option<&str>, sample_rate: f64) -> Self {
        SamplingRule {
            service: service.map(|p| Pattern::Glob(GlobMatcher::new(p))),
            name: name.map(|p| Pattern::Glob(GlobMatcher::new(p))),
            resource: None,
            tags: Vec::new(),
            sample_rate: clamp_rate(sample_rate),
        }
    }

    /// The keep probability of traces matching this rule.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub(crate) fn matches(&self, candidate: &SamplingCandidate<'_>) -> bool {
        let matches = |pattern: &Option<Pattern>, subject: &str| {
            pattern.as_ref().map_or(true, |p| p.is_match(subject))
        };

        matches(&self.service, candidate.service)
            && matches(&self.name, candidate.name)
            && matches(&self.resource, candidate.resource)
            && self.tags.iter().all(|(key, pattern)| {
                match candidate.tags.get(key) {
                    Some(value) => pattern.is_match(value),
                    None => candidate
                        .metrics
                        .get(key)
                        .is_some_and(|value| pattern.is_match(&value.to_string())),
                }
            })
    }
}

#[derive(Deserialize)]
struct RawRule {
    service: Option<String>,
    name: Option<String>,
    resource: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    sample_rate: Option<Value>,
}

/// Parses a JSON rule set such as
/// `[{"service":"web","name":"http.request","sample_rate":0.5}]`.
///
/// Entries that cannot be used are skipped and reported in the second
/// element of the returned tuple; the order of the remaining rules is kept.
pub fn parse_rules(json: &str, format: RuleFormat) -> (Vec<SamplingRule>, Vec<RuleError>) {
    let entries = match serde_json::from_str::<Vec<Value>>(json) {
        Ok(entries) => entries,
        Err(err) => return (Vec::new(), vec![RuleError::InvalidJson(err.to_string())]),
    };

    let mut rules = Vec::with_capacity(entries.len());
    let mut errors = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        match parse_rule(index, entry, format) {
            Ok(rule) => rules.push(rule),
            Err(err) => {
                dd_debug!(name: "SamplingRule.Dropped", reason = format!("{}", err));
                errors.push(err);
            }
        }
    }
    (rules, errors)
}

fn parse_rule(index: usize, entry: Value, format: RuleFormat) -> Result<SamplingRule, RuleError> {
    if !entry.is_object() {
        return Err(RuleError::NotAnObject(index));
    }
    let raw: RawRule =
        serde_json::from_value(entry).map_err(|_| RuleError::NotAnObject(index))?;

    let sample_rate = raw
        .sample_rate
        .as_ref()
        .and_then(rate_from_json)
        .ok_or(RuleError::MissingSampleRate(index))?;

    let compile = |pattern: Option<String>| -> Result<Option<Pattern>, RuleError> {
        pattern
            .map(|p| {
                Pattern::compile(&p, format).map_err(|err| RuleError::InvalidPattern {
                    index,
                    pattern: p.clone(),
                    reason: err.to_string(),
                })
            })
            .transpose()
    };

    let mut tags = Vec::with_capacity(raw.tags.len());
    for (key, pattern) in raw.tags {
        if let Some(pattern) = compile(Some(pattern))? {
            tags.push((key, pattern));
        }
    }

    Ok(SamplingRule {
        service: compile(raw.service)?,
        name: compile(raw.name)?,
        resource: compile(raw.resource)?,
        tags,
        sample_rate: clamp_rate(sample_rate),
    })
}

fn rate_from_json(value: &Value) -> Option<f64> {
    let rate = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    rate.filter(|rate| !rate.is_nan())
}

pub(crate) fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        return 1.0;
    }
    rate.clamp(0.0, 1.0)
}
