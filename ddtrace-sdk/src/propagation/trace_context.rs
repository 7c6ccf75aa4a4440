//! # W3C Trace Context Propagator
//!
use ddtrace::baggage::Baggage;
use ddtrace::propagation::{text_map_propagator::FieldIter, Extractor, Injector, TextMapPropagator};
use ddtrace::trace::{SamplingPriority, SpanContext, TraceDecision, PROPAGATED_TAG_PREFIX};
use ddtrace::{SpanId, TraceId};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const SUPPORTED_VERSION: u8 = 0;
const MAX_VERSION: u8 = 254;
const TRACEPARENT_HEADER: &str = "traceparent";
const TRACESTATE_HEADER: &str = "tracestate";
const DATADOG_VENDOR_KEY: &str = "dd";
const TRACE_ID_HIGH_TAG: &str = "_dd.p.tid";

static TRACE_CONTEXT_HEADER_FIELDS: OnceLock<[String; 2]> = OnceLock::new();

fn trace_context_header_fields() -> &'static [String; 2] {
    TRACE_CONTEXT_HEADER_FIELDS
        .get_or_init(|| [TRACEPARENT_HEADER.to_owned(), TRACESTATE_HEADER.to_owned()])
}

/// Propagates [`SpanContext`]s in [W3C TraceContext] format under the
/// `traceparent` and `tracestate` headers.
///
/// `traceparent` carries the 128-bit trace id, the span id and the sampled
/// flag:
///
/// `traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
///
/// The Datadog specific state travels in the `dd` member of `tracestate`:
/// the sampling priority (`s`), the origin (`o`) and the propagated tags
/// (`t.<name>` for `_dd.p.<name>`):
///
/// `tracestate: dd=s:2;o:synthetics;t.dm:-4`
///
/// Members of other vendors are not retained.
///
/// [W3C TraceContext]: https://www.w3.org/TR/trace-context/
#[derive(Clone, Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    /// Create a new `TraceContextPropagator`.
    pub fn new() -> Self {
        TraceContextPropagator { _private: () }
    }

    /// Extract span context from w3c trace-context header.
    fn extract_span_context(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let header = extractor.get(TRACEPARENT_HEADER).ok_or(())?;
        let parts = header.trim().split_terminator('-').collect::<Vec<&str>>();
        // Ensure parts are not out of range.
        if parts.len() < 4 {
            return Err(());
        }
        if parts[0].len() != 2 || parts[1].len() != 32 || parts[2].len() != 16 || parts[3].len() != 2
        {
            return Err(());
        }

        // Ensure version is within range, for version 0 there must be 4 parts.
        let version = parse_lower_hex(parts[0], |v| u8::from_str_radix(v, 16))?;
        if version > MAX_VERSION || version == 0 && parts.len() != 4 {
            return Err(());
        }

        let trace_id = parse_lower_hex(parts[1], TraceId::from_hex)?;
        let span_id = parse_lower_hex(parts[2], SpanId::from_hex)?;
        let flags = parse_lower_hex(parts[3], |v| u8::from_str_radix(v, 16))?;

        // Ensure opts are valid for version 0
        if version == 0 && flags > 2 {
            return Err(());
        }
        if !trace_id.is_valid() || !span_id.is_valid() {
            return Err(());
        }
        let sampled = flags & 0x01 == 0x01;

        let state = extractor
            .get(TRACESTATE_HEADER)
            .and_then(|header| DatadogState::from_tracestate(&header))
            .unwrap_or_default();

        // the sampled flag wins when it disagrees with the propagated priority
        let priority = match state.priority {
            Some(priority) if priority.is_keep() == sampled => priority,
            _ if sampled => SamplingPriority::AutoKeep,
            _ => SamplingPriority::AutoReject,
        };

        let decision = TraceDecision::remote(Some(priority), state.origin, state.tags);
        Ok(SpanContext::new_remote(
            trace_id,
            span_id,
            decision,
            Baggage::new(),
        ))
    }
}

fn parse_lower_hex<T, E>(value: &str, parse: impl Fn(&str) -> Result<T, E>) -> Result<T, ()> {
    if value.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(());
    }
    parse(value).map_err(|_| ())
}

#[derive(Debug, Default)]
struct DatadogState {
    priority: Option<SamplingPriority>,
    origin: Option<String>,
    tags: BTreeMap<String, String>,
}

impl DatadogState {
    /// Reads the `dd` member of a `tracestate` header.
    fn from_tracestate(header: &str) -> Option<Self> {
        let member = header.split(',').find_map(|member| {
            let (key, value) = member.trim().split_once('=')?;
            (key == DATADOG_VENDOR_KEY).then_some(value)
        })?;

        let mut state = DatadogState::default();
        for field in member.split(';') {
            let Some((key, value)) = field.split_once(':') else {
                continue;
            };
            match key {
                "s" => {
                    state.priority = value.parse::<i64>().ok().map(SamplingPriority::from_i64)
                }
                "o" if !value.is_empty() => state.origin = Some(decode_value(value)),
                _ => {
                    if let Some(name) = key.strip_prefix("t.") {
                        let tag = format!("{}{}", PROPAGATED_TAG_PREFIX, name);
                        if tag != TRACE_ID_HIGH_TAG && !name.is_empty() {
                            let _ = state.tags.insert(tag, decode_value(value));
                        }
                    }
                }
            }
        }
        Some(state)
    }

    fn to_member(context: &SpanContext) -> String {
        let decision = context.decision();
        let mut fields = Vec::new();
        if let Some(priority) = decision.priority() {
            fields.push(format!("s:{}", priority));
        }
        if let Some(origin) = decision.origin() {
            fields.push(format!("o:{}", encode_value(&origin)));
        }
        for (key, value) in decision.propagated_tags() {
            if key == TRACE_ID_HIGH_TAG {
                continue;
            }
            if let Some(name) = key.strip_prefix(PROPAGATED_TAG_PREFIX) {
                fields.push(format!("t.{}:{}", name, encode_value(&value)));
            }
        }
        format!("{}={}", DATADOG_VENDOR_KEY, fields.join(";"))
    }
}

/// `=` is not allowed in tracestate values and is sent as `~`; other
/// separators and non printable characters become `_`.
fn encode_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '=' => '~',
            ',' | ';' | '~' => '_',
            c if (' '..='~').contains(&c) => c,
            _ => '_',
        })
        .collect()
}

fn decode_value(value: &str) -> String {
    value.replace('~', "=")
}

impl TextMapPropagator for TraceContextPropagator {
    /// Properly encodes the values of the `SpanContext` and injects them
    /// into the `Injector`.
    fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        if !context.is_valid() {
            return;
        }
        let sampled = context
            .sampling_priority()
            .map_or(true, SamplingPriority::is_keep);
        let header_value = format!(
            "{:02x}-{:032x}-{:016x}-{:02x}",
            SUPPORTED_VERSION,
            context.trace_id(),
            context.span_id(),
            u8::from(sampled)
        );
        injector.set(TRACEPARENT_HEADER, header_value);
        injector.set(TRACESTATE_HEADER, DatadogState::to_member(context));
    }

    /// Retrieves encoded `SpanContext`s using the `Extractor`. Returns `None`
    /// if no valid `traceparent` was found.
    fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        self.extract_span_context(extractor).ok()
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(trace_context_header_fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddtrace::trace::SamplingMechanism;
    use std::collections::HashMap;

    const TRACE_ID: u128 = 0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736;
    const SPAN_ID: u64 = 0x00f0_67aa_0ba9_02b7;

    #[rustfmt::skip]
    fn extract_data() -> Vec<(&'static str, &'static str, SamplingPriority, Option<&'static str>)> {
        vec![
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00", "foo=bar", SamplingPriority::AutoReject, None),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "foo=bar", SamplingPriority::AutoKeep, None),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "dd=s:2;o:synthetics", SamplingPriority::UserKeep, Some("synthetics")),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00", "foo=bar,dd=s:-1", SamplingPriority::UserReject, None),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00", "dd=s:2", SamplingPriority::AutoReject, None),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "dd=s:-1", SamplingPriority::AutoKeep, None),
            ("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09", "dd=o:a~b", SamplingPriority::AutoKeep, Some("a=b")),
            ("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-08", "", SamplingPriority::AutoReject, None),
            ("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09-XYZxsf09", "", SamplingPriority::AutoKeep, None),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-", "", SamplingPriority::AutoKeep, None),
        ]
    }

    #[rustfmt::skip]
    fn extract_data_invalid() -> Vec<(&'static str, &'static str)> {
        vec![
            ("0000-00000000000000000000000000000000-0000000000000000-01", "wrong version length"),
            ("00-ab00000000000000000000000000000000-cd00000000000000-01", "wrong trace ID length"),
            ("00-ab000000000000000000000000000000-cd0000000000000000-01", "wrong span ID length"),
            ("00-ab000000000000000000000000000000-cd00000000000000-0100", "wrong trace flag length"),
            ("qw-00000000000000000000000000000000-0000000000000000-01",   "bogus version"),
            ("00-qw000000000000000000000000000000-cd00000000000000-01",   "bogus trace ID"),
            ("00-ab000000000000000000000000000000-qw00000000000000-01",   "bogus span ID"),
            ("00-ab000000000000000000000000000000-cd00000000000000-qw",   "bogus trace flag"),
            ("A0-00000000000000000000000000000000-0000000000000000-01",   "upper case version"),
            ("00-AB000000000000000000000000000000-cd00000000000000-01",   "upper case trace ID"),
            ("00-ab000000000000000000000000000000-CD00000000000000-01",   "upper case span ID"),
            ("00-ab000000000000000000000000000000-cd00000000000000-A1",   "upper case trace flag"),
            ("00-00000000000000000000000000000000-0000000000000000-01",   "zero trace ID and span ID"),
            ("00-ab000000000000000000000000000000-cd00000000000000-09",   "trace-flag unused bits set"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",      "missing options"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-",     "empty options"),
            ("ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",   "version out of range"),
        ]
    }

    fn carrier(traceparent: &str, tracestate: &str) -> HashMap<String, String> {
        let mut carrier = HashMap::new();
        carrier.insert(TRACEPARENT_HEADER.to_string(), traceparent.to_string());
        carrier.insert(TRACESTATE_HEADER.to_string(), tracestate.to_string());
        carrier
    }

    #[test]
    fn extract_w3c() {
        let propagator = TraceContextPropagator::new();

        for (traceparent, tracestate, priority, origin) in extract_data() {
            let context = propagator
                .extract(&carrier(traceparent, tracestate))
                .unwrap_or_else(|| panic!("{} should extract", traceparent));

            assert_eq!(u128::from(context.trace_id()), TRACE_ID);
            assert_eq!(context.span_id().as_u64(), SPAN_ID);
            assert!(context.is_remote());
            assert_eq!(context.sampling_priority(), Some(priority), "{} {}", traceparent, tracestate);
            assert_eq!(context.origin().as_deref(), origin);
        }
    }

    #[test]
    fn extract_w3c_reject_invalid() {
        let propagator = TraceContextPropagator::new();

        for (invalid_header, reason) in extract_data_invalid() {
            assert!(
                propagator.extract(&carrier(invalid_header, "")).is_none(),
                "{}",
                reason
            );
        }
        assert!(propagator.extract(&HashMap::<String, String>::new()).is_none());
    }

    #[test]
    fn extract_propagated_tags() {
        let context = TraceContextPropagator::new()
            .extract(&carrier(
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
                "dd=s:1;t.dm:-4;t.usr.id:a~b;t.tid:1;unknown:1,other=x",
            ))
            .unwrap();
        let tags = context.decision().propagated_tags();
        assert_eq!(tags.get("_dd.p.dm").map(String::as_str), Some("-4"));
        assert_eq!(tags.get("_dd.p.usr.id").map(String::as_str), Some("a=b"));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn inject_w3c() {
        let propagator = TraceContextPropagator::new();
        let context = SpanContext::new_root(
            TraceId::from(TRACE_ID),
            SpanId::from(SPAN_ID),
            Baggage::new(),
        );
        let _ = context
            .decision()
            .set_priority(SamplingPriority::UserReject, SamplingMechanism::Manual);
        context.decision().set_origin("syn;thetics");
        context.decision().set_propagated_tag("_dd.p.usr", "k=v");

        let mut injector: HashMap<String, String> = HashMap::new();
        propagator.inject(&context, &mut injector);

        assert_eq!(
            injector.get(TRACEPARENT_HEADER).map(String::as_str),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00")
        );
        assert_eq!(
            injector.get(TRACESTATE_HEADER).map(String::as_str),
            Some("dd=s:-1;o:syn_thetics;t.usr:k~v")
        );
    }

    #[test]
    fn inject_invalid_context_writes_nothing() {
        let context = SpanContext::new_root(TraceId::INVALID, SpanId::from(1), Baggage::new());
        let mut injector: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject(&context, &mut injector);
        assert!(injector.is_empty());
    }

    #[test]
    fn round_trip() {
        let propagator = TraceContextPropagator::new();
        let context = SpanContext::new_root(TraceId::from(TRACE_ID), SpanId::from(7), Baggage::new());
        let _ = context
            .decision()
            .set_priority(SamplingPriority::UserKeep, SamplingMechanism::Rule);
        context.decision().set_origin("rum");

        let mut injector: HashMap<String, String> = HashMap::new();
        propagator.inject(&context, &mut injector);
        let extracted = propagator.extract(&injector).unwrap();

        assert_eq!(extracted.trace_id(), context.trace_id());
        assert_eq!(extracted.span_id(), context.span_id());
        assert_eq!(extracted.sampling_priority(), Some(SamplingPriority::UserKeep));
        assert_eq!(extracted.origin().as_deref(), Some("rum"));
        assert_eq!(
            extracted.decision().propagated_tag("_dd.p.dm").as_deref(),
            Some("-3")
        );
    }
}
