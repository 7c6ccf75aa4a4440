use ddtrace::baggage::Baggage;
use ddtrace::dd_debug;
use ddtrace::propagation::{text_map_propagator::FieldIter, Extractor, Injector, TextMapPropagator};
use ddtrace::trace::{SamplingPriority, SpanContext, TraceDecision, PROPAGATED_TAG_PREFIX};
use ddtrace::{SpanId, TraceId};
use std::collections::BTreeMap;

const DATADOG_TRACE_ID_HEADER: &str = "x-datadog-trace-id";
const DATADOG_PARENT_ID_HEADER: &str = "x-datadog-parent-id";
const DATADOG_SAMPLING_PRIORITY_HEADER: &str = "x-datadog-sampling-priority";
const DATADOG_ORIGIN_HEADER: &str = "x-datadog-origin";
const DATADOG_TAGS_HEADER: &str = "x-datadog-tags";
const BAGGAGE_PREFIX: &str = "ot-baggage-";

/// Propagated tag carrying the upper 64 bits of a 128-bit trace id.
const TRACE_ID_HIGH_TAG: &str = "_dd.p.tid";

const DEFAULT_TAGS_MAX_LENGTH: usize = 512;

lazy_static::lazy_static! {
    static ref DATADOG_HEADER_FIELDS: [String; 5] = [
        DATADOG_TRACE_ID_HEADER.to_string(),
        DATADOG_PARENT_ID_HEADER.to_string(),
        DATADOG_SAMPLING_PRIORITY_HEADER.to_string(),
        DATADOG_ORIGIN_HEADER.to_string(),
        DATADOG_TAGS_HEADER.to_string(),
    ];
}

#[derive(Debug)]
enum ExtractError {
    TraceId,
    SpanId,
}

/// Extracts and injects [`SpanContext`]s using Datadog's `x-datadog-*` headers.
///
/// Identifiers are written as decimal strings. Only the lower 64 bits of the
/// trace id travel in `x-datadog-trace-id`; the upper half of a 128-bit id is
/// sent as the `_dd.p.tid` entry of `x-datadog-tags`. Baggage items are sent
/// as one `ot-baggage-<key>` header each, with the lowercase key.
///
/// Injection is not free of side effects: when the encoded `x-datadog-tags`
/// value exceeds the configured maximum length, the header is omitted and
/// `inject_max_size` is recorded as the propagation error on the trace's
/// shared sampling decision. The local root span reports it as
/// `_dd.propagation_error` when the trace chunk is exported.
///
/// ## Example
///
/// ```
/// use ddtrace::propagation::TextMapPropagator;
/// use ddtrace_sdk::propagation::DatadogPropagator;
/// use std::collections::HashMap;
///
/// let carrier = HashMap::from([
///     ("x-datadog-trace-id".to_string(), "1337".to_string()),
///     ("x-datadog-parent-id".to_string(), "42".to_string()),
/// ]);
/// let context = DatadogPropagator::default().extract(&carrier).unwrap();
/// assert_eq!(context.trace_id().low(), 1337);
/// ```
#[derive(Clone, Debug)]
pub struct DatadogPropagator {
    tags_max_length: usize,
}

impl Default for DatadogPropagator {
    fn default() -> Self {
        DatadogPropagator {
            tags_max_length: DEFAULT_TAGS_MAX_LENGTH,
        }
    }
}

impl DatadogPropagator {
    /// Creates a new `DatadogPropagator`.
    pub fn new() -> Self {
        DatadogPropagator::default()
    }

    /// Sets the maximum length of the `x-datadog-tags` header. Zero disables
    /// the header in both directions.
    pub fn with_tags_max_length(tags_max_length: usize) -> Self {
        DatadogPropagator { tags_max_length }
    }

    fn extract_trace_id(&self, trace_id: &str) -> Result<TraceId, ExtractError> {
        TraceId::from_decimal(trace_id.trim())
            .ok()
            .filter(|id| id.is_valid())
            .ok_or(ExtractError::TraceId)
    }

    fn extract_span_id(&self, span_id: &str) -> Result<SpanId, ExtractError> {
        SpanId::from_decimal(span_id.trim())
            .ok()
            .filter(|id| id.is_valid())
            .ok_or(ExtractError::SpanId)
    }

    fn extract_sampling_priority(&self, sampling_priority: &str) -> Option<SamplingPriority> {
        sampling_priority
            .trim()
            .parse::<i64>()
            .ok()
            .map(SamplingPriority::from_i64)
    }

    fn extract_span_context(&self, extractor: &dyn Extractor) -> Result<SpanContext, ExtractError> {
        let mut trace_id = self.extract_trace_id(
            extractor
                .get(DATADOG_TRACE_ID_HEADER)
                .as_deref()
                .unwrap_or(""),
        )?;
        let span_id = self.extract_span_id(
            extractor
                .get(DATADOG_PARENT_ID_HEADER)
                .as_deref()
                .unwrap_or(""),
        )?;
        let priority = extractor
            .get(DATADOG_SAMPLING_PRIORITY_HEADER)
            .and_then(|value| self.extract_sampling_priority(&value));
        let origin = extractor
            .get(DATADOG_ORIGIN_HEADER)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let mut error = None;
        let mut tags = match extractor.get(DATADOG_TAGS_HEADER) {
            Some(_) if self.tags_max_length == 0 => BTreeMap::new(),
            Some(header) if header.len() > self.tags_max_length => {
                error = Some("extract_max_size".to_string());
                BTreeMap::new()
            }
            Some(header) => decode_tags(&header).unwrap_or_else(|| {
                error = Some("decoding_error".to_string());
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };

        if let Some(high) = tags.remove(TRACE_ID_HIGH_TAG) {
            match parse_trace_id_high(&high) {
                Some(high) => trace_id = trace_id.with_high(high),
                None => error = Some(format!("malformed_tid {}", high)),
            }
        }

        let mut baggage = Baggage::new();
        for key in extractor.keys() {
            let lower = key.to_ascii_lowercase();
            let Some(item) = lower.strip_prefix(BAGGAGE_PREFIX) else {
                continue;
            };
            if let Some(value) = extractor.get(&key) {
                let _ = baggage.insert(item, value.into_owned());
            }
        }

        let decision = TraceDecision::remote(priority, origin, tags);
        if let Some(error) = error {
            dd_debug!(name: "DatadogPropagator.TagsDropped", reason = error.as_str());
            decision.set_propagation_error(error);
        }

        Ok(SpanContext::new_remote(trace_id, span_id, decision, baggage))
    }

    fn encode_tags(&self, context: &SpanContext) -> Option<String> {
        if self.tags_max_length == 0 {
            return None;
        }
        let mut tags = context.decision().propagated_tags();
        let trace_id = context.trace_id();
        if trace_id.is_128_bit() {
            let _ = tags.insert(
                TRACE_ID_HIGH_TAG.to_string(),
                format!("{:016x}", trace_id.high()),
            );
        }
        if tags.is_empty() {
            return None;
        }

        let encoded = tags
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",");
        if encoded.len() > self.tags_max_length {
            dd_debug!(
                name: "DatadogPropagator.TagsTooLong",
                length = encoded.len(),
                max_length = self.tags_max_length
            );
            context.decision().set_propagation_error("inject_max_size");
            return None;
        }
        Some(encoded)
    }
}

/// Decodes `k1=v1,k2=v2`, keeping only `_dd.p.*` keys. Returns `None` when an
/// entry is not a `key=value` pair.
fn decode_tags(header: &str) -> Option<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();
    for entry in header.split(',').filter(|entry| !entry.trim().is_empty()) {
        let (key, value) = entry.split_once('=')?;
        let key = key.trim();
        if key.is_empty() || value.is_empty() {
            return None;
        }
        if key.starts_with(PROPAGATED_TAG_PREFIX) {
            let _ = tags.insert(key.to_string(), value.to_string());
        }
    }
    Some(tags)
}

fn parse_trace_id_high(value: &str) -> Option<u64> {
    if value.len() != 16 || !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u64::from_str_radix(value, 16).ok()
}

impl TextMapPropagator for DatadogPropagator {
    /// Writes the context to `injector`. May record `inject_max_size` on the
    /// context's decision, see [`DatadogPropagator`].
    fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        if !context.is_valid() {
            return;
        }
        injector.set(DATADOG_TRACE_ID_HEADER, context.trace_id().low().to_string());
        injector.set(
            DATADOG_PARENT_ID_HEADER,
            context.span_id().as_u64().to_string(),
        );
        if let Some(priority) = context.sampling_priority() {
            injector.set(DATADOG_SAMPLING_PRIORITY_HEADER, priority.to_string());
        }
        if let Some(origin) = context.origin() {
            injector.set(DATADOG_ORIGIN_HEADER, origin);
        }
        if let Some(tags) = self.encode_tags(context) {
            injector.set(DATADOG_TAGS_HEADER, tags);
        }
        for (key, value) in context.baggage().iter() {
            injector.set(&format!("{}{}", BAGGAGE_PREFIX, key), value.to_string());
        }
    }

    fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        match self.extract_span_context(extractor) {
            Ok(context) => Some(context),
            Err(err) => {
                dd_debug!(name: "DatadogPropagator.ExtractFailed", reason = format!("{:?}", err));
                None
            }
        }
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(DATADOG_HEADER_FIELDS.as_ref())
    }
}
