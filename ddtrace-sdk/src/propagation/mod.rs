//! Datadog and W3C trace context propagators.
//!
//! [`PropagationStyle`] names the header formats a tracer reads and writes;
//! [`composite_for`] turns a configured list of styles into a single
//! [`TextMapCompositePropagator`].
use ddtrace::dd_warn;
use ddtrace::propagation::{TextMapCompositePropagator, TextMapPropagator};

mod datadog;
mod trace_context;

pub use datadog::DatadogPropagator;
pub use trace_context::TraceContextPropagator;

/// A header format understood by the tracer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropagationStyle {
    /// `x-datadog-*` headers.
    Datadog,
    /// W3C `traceparent` / `tracestate`.
    TraceContext,
}

impl PropagationStyle {
    /// Styles used when none are configured.
    pub fn defaults() -> Vec<PropagationStyle> {
        vec![PropagationStyle::Datadog, PropagationStyle::TraceContext]
    }

    /// Parses a comma separated style list such as `datadog,tracecontext`.
    ///
    /// Unknown names are skipped with a warning, duplicates are removed and
    /// `none` yields an empty list.
    pub fn parse_list(input: &str) -> Vec<PropagationStyle> {
        let mut styles = Vec::new();
        for name in input.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let style = match name.to_ascii_lowercase().as_str() {
                "datadog" => PropagationStyle::Datadog,
                "tracecontext" => PropagationStyle::TraceContext,
                "none" => continue,
                _ => {
                    dd_warn!(name: "Config.UnknownPropagationStyle", style = name);
                    continue;
                }
            };
            if !styles.contains(&style) {
                styles.push(style);
            }
        }
        styles
    }
}

/// Builds the propagator for an ordered list of styles.
///
/// `tags_max_length` bounds the `x-datadog-tags` header of the Datadog
/// propagator.
pub fn composite_for(
    styles: &[PropagationStyle],
    tags_max_length: usize,
) -> TextMapCompositePropagator {
    let propagators = styles
        .iter()
        .map(|style| -> Box<dyn TextMapPropagator + Send + Sync> {
            match style {
                PropagationStyle::Datadog => {
                    Box::new(DatadogPropagator::with_tags_max_length(tags_max_length))
                }
                PropagationStyle::TraceContext => Box::new(TraceContextPropagator::new()),
            }
        })
        .collect();
    TextMapCompositePropagator::new(propagators)
}
