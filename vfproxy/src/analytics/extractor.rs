//! Turns one conversation turn into an [`AnalyticsRecord`].
//!
//! Extraction is a pure, synchronous fold over the runtime's trace. The record is seeded from the
//! request (client headers and the user's action) and then every trace item is applied to it in
//! order. Fields follow three update rules:
//!
//! - **last write wins**: `matchedIntent`, `confidence`, `model`
//! - **summed**: `tokenConsumption`, `apiCalls`
//! - **append / latch**: `textResponses` grows in trace order, `endOfConvo` never resets
//!
//! Extraction never fails. Anything it cannot make sense of leaves the affected field untouched
//! and is reported as a [`Diagnostic`].

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};

use super::models::{AnalyticsRecord, DebugPayload, Diagnostic, HeaderInfo, TextPayload, TraceItem};
use super::patterns;
use super::user_agent::UserAgent;
use super::utils::{client_address, extract_header_as_string, is_truthy};

/// Prefix of action types produced by button clicks.
const BUTTON_ACTION_PREFIX: &str = "path-";

/// A record together with everything noticed while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: AnalyticsRecord,
    pub diagnostics: Vec<Diagnostic>,
}

/// Extracts the analytics record of one turn.
///
/// # Arguments
/// * `trace` - The runtime's trace for the turn, in emission order
/// * `request_body` - The interaction request body; only its `action` is read
/// * `request_headers` - The inbound request headers
pub fn extract(trace: &[TraceItem], request_body: &Value, request_headers: &HeaderMap) -> AnalyticsRecord {
    extract_with_diagnostics(trace, request_body, request_headers).record
}

/// Same as [`extract`], also returning the diagnostics noted along the way.
pub fn extract_with_diagnostics(trace: &[TraceItem], request_body: &Value, request_headers: &HeaderMap) -> Extraction {
    let (action_type, action_value) = extract_action(request_body);

    let mut reducer = TraceReducer {
        record: AnalyticsRecord {
            headers: extract_header_info(request_headers),
            action_type,
            action_value,
            ..Default::default()
        },
        diagnostics: Vec::new(),
    };

    for (index, item) in trace.iter().enumerate() {
        reducer.apply(index, item);
    }

    reducer.finish()
}

/// Client context from the inbound headers.
fn extract_header_info(headers: &HeaderMap) -> HeaderInfo {
    let user_agent = extract_header_as_string(headers, "user-agent")
        .map(|ua| UserAgent::parse(&ua))
        .unwrap_or_default();

    // Resolved but not reported.
    let _client_address = client_address(headers);

    HeaderInfo {
        os: user_agent.os,
        device: user_agent.device,
        browser: user_agent.browser,
        origin: extract_header_as_string(headers, "origin"),
        referer: extract_header_as_string(headers, "referer"),
        session: extract_header_as_string(headers, "sessionid"),
        version: extract_header_as_string(headers, "versionid"),
    }
}

/// Action type and value from the request body's `action`.
///
/// Button clicks (`path-*` actions) are reported by their label, the value a human saw. Any other
/// action is reported by its raw payload, e.g. the free text sent to the intent matcher.
fn extract_action(request_body: &Value) -> (Option<String>, Option<Value>) {
    let Some(action) = request_body.get("action").filter(|a| is_truthy(a)) else {
        return (None, None);
    };

    let action_type = action.get("type").and_then(Value::as_str);
    let payload = action.get("payload");

    let label = payload.and_then(|p| p.get("label")).filter(|label| is_truthy(label));
    let value = match (action_type, label) {
        (Some(kind), Some(label)) if kind.starts_with(BUTTON_ACTION_PREFIX) => Some(label),
        _ => payload,
    };

    (
        action_type.map(str::to_string),
        value.filter(|v| !v.is_null()).cloned(),
    )
}

/// Call-scoped accumulator for the trace fold.
struct TraceReducer {
    record: AnalyticsRecord,
    diagnostics: Vec<Diagnostic>,
}

impl TraceReducer {
    fn apply(&mut self, index: usize, item: &TraceItem) {
        match item {
            TraceItem::End => self.record.end_of_convo = true,
            TraceItem::Text { payload } => self.apply_text(payload.as_ref()),
            TraceItem::Debug { payload: Some(payload) } => self.apply_debug(index, payload),
            TraceItem::Debug { payload: None } | TraceItem::Unknown => {}
        }
    }

    fn apply_text(&mut self, payload: Option<&TextPayload>) {
        if let Some(message) = payload.and_then(|p| p.message.as_deref())
            && !message.is_empty()
        {
            self.record.text_responses.push(message.to_string());
        }
    }

    fn apply_debug(&mut self, index: usize, payload: &DebugPayload) {
        let message = payload.message.as_deref().unwrap_or_default();

        match payload.kind.as_deref() {
            Some("api") => {
                let calls = &mut self.record.api_calls;
                calls.total += 1;
                if message == patterns::API_SUCCESS_MESSAGE {
                    calls.successful += 1;
                } else {
                    calls.failed += 1;
                }
            }
            Some("intent") => {
                if let Some(intent) = patterns::match_intent(message) {
                    self.record.matched_intent = Some(intent.name);
                    self.record.confidence = intent.confidence;
                }
            }
            _ => {}
        }

        if patterns::is_ai_usage_message(message) {
            self.apply_ai_usage(index, message);
        }
    }

    fn apply_ai_usage(&mut self, index: usize, message: &str) {
        if let Some(model) = patterns::match_model(message) {
            self.record.model = Some(model.to_string());
        }

        let Some(body) = patterns::match_token_consumption(message) else {
            return;
        };

        match patterns::parse_token_consumption(body) {
            Ok(counts) => {
                let consumption = &mut self.record.token_consumption;
                consumption.total += counts.total();
                consumption.query += counts.query();
                consumption.answer += counts.answer();
            }
            Err(e) => {
                warn!(index, body, error = %e, "Failed to parse post-multiplier token consumption");
                self.diagnostics.push(Diagnostic::MalformedTokenConsumption {
                    index,
                    body: body.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn finish(self) -> Extraction {
        debug_assert_eq!(
            self.record.api_calls.total,
            self.record.api_calls.successful + self.record.api_calls.failed
        );
        debug!(
            text_responses = self.record.text_responses.len(),
            api_calls = self.record.api_calls.total,
            diagnostics = self.diagnostics.len(),
            "Extracted turn analytics"
        );
        Extraction {
            record: self.record,
            diagnostics: self.diagnostics,
        }
    }
}
