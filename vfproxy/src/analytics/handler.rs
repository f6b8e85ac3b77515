//! Analytics handler for proxied interaction responses.
//!
//! [`AnalyticsHandler`] sits between the gateway and an [`AnalyticsSink`]. It reads the runtime's
//! trace out of a successful interaction response, runs the extractor over it and hands the
//! resulting record to the sink. It never affects the response returned to the client: a body
//! without a readable trace is logged and skipped.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};

use super::extractor::extract_with_diagnostics;
use super::models::TraceItem;
use super::sink::AnalyticsSink;
use crate::metrics;

#[derive(Clone)]
pub struct AnalyticsHandler {
    sink: Arc<dyn AnalyticsSink>,
}

impl AnalyticsHandler {
    pub fn new(sink: Arc<dyn AnalyticsSink>) -> Self {
        Self { sink }
    }

    /// Extracts analytics from an interaction response and emits them.
    ///
    /// # Arguments
    ///
    /// * `request_body` - The interaction body as forwarded upstream
    /// * `request_headers` - The headers the client sent
    /// * `response_body` - The raw upstream response body
    pub async fn handle_response(&self, request_body: &Value, request_headers: &HeaderMap, response_body: &[u8]) {
        let span = info_span!("analytics_handler", response_bytes = response_body.len());

        async {
            let response: Value = match serde_json::from_slice(response_body) {
                Ok(value) => value,
                Err(e) => {
                    debug!(error = %e, "Interaction response is not JSON, skipping analytics");
                    metrics::record_analytics_skipped("invalid_json");
                    return;
                }
            };

            let Some(raw_trace) = response.get("trace").and_then(Value::as_array) else {
                debug!("Interaction response has no trace, skipping analytics");
                metrics::record_analytics_skipped("missing_trace");
                return;
            };

            let (trace, mut diagnostics) = TraceItem::parse_sequence(raw_trace);
            let extraction = extract_with_diagnostics(&trace, request_body, request_headers);
            diagnostics.extend(extraction.diagnostics);

            for diagnostic in &diagnostics {
                warn!(kind = diagnostic.kind(), "{diagnostic}");
                metrics::record_diagnostic(diagnostic.kind());
            }

            let record = extraction.record;
            metrics::record_token_consumption(record.model.as_deref(), record.token_consumption.total);
            metrics::record_analytics_emitted();
            self.sink.record(record);
        }
        .instrument(span)
        .await;
    }
}
