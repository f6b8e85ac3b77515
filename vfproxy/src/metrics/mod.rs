//! Prometheus counters for the gateway, recorded through the `metrics` facade.
//!
//! Without an installed recorder (`enable_metrics: false`) these calls are no-ops.

use metrics::counter;

/// Outcome of one forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Upstream answered with a status below 400
    Success,
    /// Upstream answered with a 4xx or 5xx status
    UpstreamError,
    /// Upstream could not be reached
    NetworkError,
    /// The request was rejected before forwarding
    Rejected,
}

impl ForwardOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ForwardOutcome::Success => "success",
            ForwardOutcome::UpstreamError => "upstream_error",
            ForwardOutcome::NetworkError => "network_error",
            ForwardOutcome::Rejected => "rejected",
        }
    }
}

/// Counts a proxied request, split by whether it was an interaction.
pub fn record_forwarded_request(interaction: bool, outcome: ForwardOutcome) {
    counter!(
        "vfproxy_forwarded_requests_total",
        "kind" => if interaction { "interaction" } else { "passthrough" },
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Counts an analytics record handed to the sink.
pub fn record_analytics_emitted() {
    counter!("vfproxy_analytics_records_total").increment(1);
}

/// Counts a trace that could not be read at all.
pub fn record_analytics_skipped(reason: &'static str) {
    counter!("vfproxy_analytics_skipped_total", "reason" => reason).increment(1);
}

/// Counts an extraction diagnostic by kind.
pub fn record_diagnostic(kind: &'static str) {
    counter!("vfproxy_analytics_diagnostics_total", "kind" => kind).increment(1);
}

/// Longest model name used as a label value, in characters.
const MAX_MODEL_LABEL_CHARS: usize = 64;

/// Label value for a model name taken from runtime debug text, truncated to
/// [`MAX_MODEL_LABEL_CHARS`].
fn model_label(model: Option<&str>) -> String {
    match model.map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) => model.chars().take(MAX_MODEL_LABEL_CHARS).collect(),
        None => "unknown".to_string(),
    }
}

/// Adds post-multiplier token usage per model.
///
/// The `model` label is free text reported by the runtime. Its length is capped, but the number
/// of distinct values is only bounded by the models the runtime's projects use.
pub fn record_token_consumption(model: Option<&str>, total: f64) {
    if total > 0.0 {
        counter!("vfproxy_token_consumption_total", "model" => model_label(model)).increment(total.round() as u64);
    }
}
