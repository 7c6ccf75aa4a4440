//! SDK Configuration
//!
//! Configuration is read from `DD_*` environment variables by
//! [`Config::default`]. Invalid values are reported through `dd_warn!` and
//! replaced by their default; configuration never fails.
use crate::propagation::PropagationStyle;
use crate::trace::sampler::{parse_rules, RuleFormat, SamplingRule};
use ddtrace::dd_warn;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::str::FromStr;

/// Service name used when `DD_SERVICE` is not set.
pub const DEFAULT_SERVICE: &str = "unnamed-service";

/// Tracer configuration
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// When `false` the tracer only produces non-recording spans.
    pub enabled: bool,

    /// Service of spans that do not set one.
    pub service: String,

    /// Deployment environment, added as the `env` tag.
    pub env: Option<String>,

    /// Application version, added as the `version` tag.
    pub version: Option<String>,

    /// Tags added to every span.
    pub global_tags: BTreeMap<String, String>,

    /// Service renames applied to every span.
    pub service_mapping: HashMap<String, String>,

    /// Global sample rate applied when no rule matches.
    pub sample_rate: Option<f64>,

    /// Sampling rules, in evaluation order.
    pub sampling_rules: Vec<SamplingRule>,

    /// Maximum number of traces per second kept by rules or the global
    /// sample rate. Zero disables the limiter.
    pub rate_limit: u32,

    /// Generate 128-bit trace ids.
    pub trace_id_128_bit: bool,

    /// Header styles read by `Tracer::extract`, in priority order.
    pub propagation_style_extract: Vec<PropagationStyle>,

    /// Header styles written by `Tracer::inject`.
    pub propagation_style_inject: Vec<PropagationStyle>,

    /// Maximum length of the `x-datadog-tags` header. Zero disables it.
    pub tags_header_max_length: usize,

    /// Finish spans still active when the tracer is flushed.
    pub autofinish_spans: bool,

    /// Maximum number of spans recorded per trace chunk. Spans above the
    /// limit are non-recording. The count resets once every open span of the
    /// trace has finished. Zero removes the limit.
    pub spans_limit: usize,
}

impl Config {
    /// Configuration with built-in defaults, ignoring the environment.
    pub fn builtin() -> Self {
        Config {
            enabled: true,
            service: DEFAULT_SERVICE.to_string(),
            env: None,
            version: None,
            global_tags: BTreeMap::new(),
            service_mapping: HashMap::new(),
            sample_rate: None,
            sampling_rules: Vec::new(),
            rate_limit: 0,
            trace_id_128_bit: false,
            propagation_style_extract: PropagationStyle::defaults(),
            propagation_style_inject: PropagationStyle::defaults(),
            tags_header_max_length: 512,
            autofinish_spans: false,
            spans_limit: 1000,
        }
    }

    /// Returns the service `service` is renamed to, or `service` itself.
    pub fn map_service<'a>(&'a self, service: &'a str) -> &'a str {
        self.service_mapping
            .get(service)
            .map(String::as_str)
            .unwrap_or(service)
    }
}

impl Default for Config {
    /// Create default sdk configuration from the environment.
    fn default() -> Self {
        let mut config = Config::builtin();

        config.enabled = env_bool("DD_TRACE_ENABLED", config.enabled);

        if let Some(service) = env_value("DD_SERVICE").or_else(|| env_value("DD_SERVICE_NAME")) {
            config.service = service;
        }
        config.env = env_value("DD_ENV");
        config.version = env_value("DD_VERSION");

        if let Some(tags) = env_value("DD_TAGS").or_else(|| env_value("DD_TRACE_GLOBAL_TAGS")) {
            config.global_tags = parse_key_values(&tags).into_iter().collect();
        }
        if let Some(mapping) = env_value("DD_SERVICE_MAPPING") {
            config.service_mapping = parse_key_values(&mapping).into_iter().collect();
        }

        if let Some(rate) = env_value("DD_TRACE_SAMPLE_RATE").or_else(|| env_value("DD_SAMPLING_RATE"))
        {
            match f64::from_str(&rate) {
                Ok(r) if !r.is_nan() => config.sample_rate = Some(r.clamp(0.0, 1.0)),
                _ => {
                    dd_warn!(
                        name: "Config.InvalidSampleRate",
                        message = "DD_TRACE_SAMPLE_RATE must be a number between 0.0 and 1.0. Ignoring it.",
                        value = rate.as_str()
                    );
                }
            }
        }

        let format = match env_value("DD_TRACE_SAMPLING_RULES_FORMAT") {
            Some(value) => RuleFormat::from_str(&value).unwrap_or_else(|err| {
                dd_warn!(name: "Config.InvalidSamplingRulesFormat", message = err.as_str());
                RuleFormat::default()
            }),
            None => RuleFormat::default(),
        };
        if let Some(rules) = env_value("DD_TRACE_SAMPLING_RULES") {
            let (rules, errors) = parse_rules(&rules, format);
            for err in errors {
                dd_warn!(name: "Config.InvalidSamplingRule", message = format!("{}", err));
            }
            config.sampling_rules = rules;
        }

        config.rate_limit = env_number("DD_TRACE_RATE_LIMIT", config.rate_limit);
        config.trace_id_128_bit = env_bool(
            "DD_TRACE_128_BIT_TRACEID_GENERATION_ENABLED",
            config.trace_id_128_bit,
        );

        let shared_style = env_value("DD_TRACE_PROPAGATION_STYLE");
        if let Some(styles) = env_value("DD_TRACE_PROPAGATION_STYLE_EXTRACT").or(shared_style.clone())
        {
            config.propagation_style_extract = PropagationStyle::parse_list(&styles);
        }
        if let Some(styles) = env_value("DD_TRACE_PROPAGATION_STYLE_INJECT").or(shared_style) {
            config.propagation_style_inject = PropagationStyle::parse_list(&styles);
        }

        config.tags_header_max_length = env_number(
            "DD_TRACE_X_DATADOG_TAGS_MAX_LENGTH",
            config.tags_header_max_length,
        );
        config.autofinish_spans = env_bool("DD_AUTOFINISH_SPANS", config.autofinish_spans);
        config.spans_limit = env_number("DD_TRACE_SPANS_LIMIT", config.spans_limit);

        config
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    let Some(value) = env_value(name) else {
        return default;
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            dd_warn!(
                name: "Config.InvalidBoolean",
                variable = name,
                value = value.as_str()
            );
            default
        }
    }
}

fn env_number<T: FromStr + Copy>(name: &str, default: T) -> T {
    let Some(value) = env_value(name) else {
        return default;
    };
    match T::from_str(&value) {
        Ok(parsed) => parsed,
        Err(_) => {
            dd_warn!(
                name: "Config.InvalidNumber",
                variable = name,
                value = value.as_str()
            );
            default
        }
    }
}

/// Parses `key:value` pairs separated by commas or spaces.
///
/// Entries without a key are skipped; an entry without `:` maps to an empty
/// value.
pub(crate) fn parse_key_values(input: &str) -> Vec<(String, String)> {
    input
        .split(|c: char| c == ',' || c == ' ')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (key, value) = entry.split_once(':').unwrap_or((entry, ""));
            let key = key.trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.trim().to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults_without_env() {
        temp_env::with_vars_unset(
            [
                "DD_SERVICE",
                "DD_SERVICE_NAME",
                "DD_ENV",
                "DD_TRACE_ENABLED",
                "DD_TRACE_SAMPLE_RATE",
                "DD_SAMPLING_RATE",
                "DD_TRACE_SAMPLING_RULES",
                "DD_TRACE_PROPAGATION_STYLE",
                "DD_TRACE_PROPAGATION_STYLE_EXTRACT",
                "DD_TRACE_PROPAGATION_STYLE_INJECT",
            ],
            || {
                let config = Config::default();
                assert!(config.enabled);
                assert_eq!(config.service, DEFAULT_SERVICE);
                assert_eq!(config.env, None);
                assert_eq!(config.sample_rate, None);
                assert!(config.sampling_rules.is_empty());
                assert_eq!(config.propagation_style_extract, PropagationStyle::defaults());
                assert_eq!(config.tags_header_max_length, 512);
            },
        );
    }

    #[test]
    fn reads_service_and_tags() {
        temp_env::with_vars(
            [
                ("DD_SERVICE", Some("checkout")),
                ("DD_ENV", Some("prod")),
                ("DD_VERSION", Some("1.2.3")),
                ("DD_TAGS", Some("team:payments, region:eu-west-1 ,,bare")),
                ("DD_SERVICE_MAPPING", Some("mysql:orders-db,redis:cache")),
            ],
            || {
                let config = Config::default();
                assert_eq!(config.service, "checkout");
                assert_eq!(config.env.as_deref(), Some("prod"));
                assert_eq!(config.version.as_deref(), Some("1.2.3"));
                assert_eq!(config.global_tags.get("team").map(String::as_str), Some("payments"));
                assert_eq!(
                    config.global_tags.get("region").map(String::as_str),
                    Some("eu-west-1")
                );
                assert_eq!(config.global_tags.get("bare").map(String::as_str), Some(""));
                assert_eq!(config.map_service("mysql"), "orders-db");
                assert_eq!(config.map_service("web"), "web");
            },
        );
    }

    #[test]
    fn sample_rate_is_clamped_and_validated() {
        temp_env::with_var("DD_TRACE_SAMPLE_RATE", Some("1.7"), || {
            assert_eq!(Config::default().sample_rate, Some(1.0));
        });
        temp_env::with_var("DD_TRACE_SAMPLE_RATE", Some("often"), || {
            assert_eq!(Config::default().sample_rate, None);
        });
    }

    #[test]
    fn sampling_rules_skip_invalid_entries() {
        temp_env::with_vars(
            [
                (
                    "DD_TRACE_SAMPLING_RULES",
                    Some(r#"[{"service":"web","sample_rate":0.5},{"service":"api"}]"#),
                ),
                ("DD_TRACE_SAMPLING_RULES_FORMAT", Some("bogus")),
            ],
            || {
                let config = Config::default();
                assert_eq!(config.sampling_rules.len(), 1);
                assert_eq!(config.sampling_rules[0].sample_rate(), 0.5);
            },
        );
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        temp_env::with_vars(
            [
                ("DD_TRACE_ENABLED", Some("maybe")),
                ("DD_TRACE_RATE_LIMIT", Some("-3")),
                ("DD_TRACE_SPANS_LIMIT", Some("lots")),
                ("DD_AUTOFINISH_SPANS", Some("1")),
            ],
            || {
                let config = Config::default();
                assert!(config.enabled);
                assert_eq!(config.rate_limit, 0);
                assert_eq!(config.spans_limit, 1000);
                assert!(config.autofinish_spans);
            },
        );
    }

    #[test]
    fn propagation_styles() {
        temp_env::with_vars(
            [
                ("DD_TRACE_PROPAGATION_STYLE", Some("tracecontext")),
                ("DD_TRACE_PROPAGATION_STYLE_EXTRACT", Some("Datadog, tracecontext")),
                ("DD_TRACE_PROPAGATION_STYLE_INJECT", None::<&str>),
            ],
            || {
                let config = Config::default();
                assert_eq!(
                    config.propagation_style_extract,
                    vec![PropagationStyle::Datadog, PropagationStyle::TraceContext]
                );
                assert_eq!(
                    config.propagation_style_inject,
                    vec![PropagationStyle::TraceContext]
                );
            },
        );
    }

    #[test]
    fn disabled_tracer() {
        temp_env::with_var("DD_TRACE_ENABLED", Some("false"), || {
            assert!(!Config::default().enabled);
        });
    }
}
