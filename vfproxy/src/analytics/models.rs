//! Analytics data models.
//!
//! [`TraceItem`] is the runtime's description of one step of a turn; [`AnalyticsRecord`] is the
//! single structured record extracted from a whole turn.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One event emitted by the conversational runtime for the current turn.
///
/// Only the variants the extractor understands carry data. Anything else, including known
/// variants whose payload has an unexpected shape, becomes [`TraceItem::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraceItem {
    /// The conversation has ended
    End,
    /// Text shown to the user
    Text {
        #[serde(default)]
        payload: Option<TextPayload>,
    },
    /// Internal diagnostic note from the runtime pipeline
    Debug {
        #[serde(default)]
        payload: Option<DebugPayload>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TextPayload {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DebugPayload {
    /// Debug sub-type: `api`, `intent`, or free-form
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl TraceItem {
    pub fn text(message: impl Into<String>) -> Self {
        TraceItem::Text {
            payload: Some(TextPayload {
                message: Some(message.into()),
            }),
        }
    }

    pub fn debug(kind: impl Into<String>, message: impl Into<String>) -> Self {
        TraceItem::Debug {
            payload: Some(DebugPayload {
                kind: Some(kind.into()),
                message: Some(message.into()),
            }),
        }
    }

    /// Reads a raw trace array item by item.
    ///
    /// An item that fails to deserialize is kept as [`TraceItem::Unknown`] so that positions
    /// in the returned sequence line up with the raw trace, and a diagnostic is returned for it.
    pub fn parse_sequence(raw: &[Value]) -> (Vec<TraceItem>, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let items = raw
            .iter()
            .enumerate()
            .map(|(index, value)| {
                TraceItem::deserialize(value).unwrap_or_else(|e| {
                    diagnostics.push(Diagnostic::UnreadableTraceItem {
                        index,
                        reason: e.to_string(),
                    });
                    TraceItem::Unknown
                })
            })
            .collect();
        (items, diagnostics)
    }
}

/// Problems noticed while extracting analytics. None of them abort an extraction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Diagnostic {
    /// A post-multiplier token consumption body could not be parsed after normalization
    #[error("trace item {index}: could not parse token consumption {{{body}}}: {reason}")]
    MalformedTokenConsumption { index: usize, body: String, reason: String },

    /// A trace item had a recognized type but an unreadable payload
    #[error("trace item {index} could not be read: {reason}")]
    UnreadableTraceItem { index: usize, reason: String },
}

impl Diagnostic {
    /// Stable label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::MalformedTokenConsumption { .. } => "malformed_token_consumption",
            Diagnostic::UnreadableTraceItem { .. } => "unreadable_trace_item",
        }
    }
}

/// Client context derived from the inbound request headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderInfo {
    pub os: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub session: Option<String>,
    pub version: Option<String>,
}

/// Post-multiplier token usage, summed over every AI step of the turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TokenConsumption {
    pub total: f64,
    pub query: f64,
    pub answer: f64,
}

/// API step outcomes. `total` always equals `successful + failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApiCalls {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Structured analytics for one conversation turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    pub headers: HeaderInfo,
    pub action_type: Option<String>,
    /// Button label for `path-*` actions, otherwise the raw action payload
    pub action_value: Option<Value>,
    pub matched_intent: Option<String>,
    pub confidence: Option<f64>,
    pub model: Option<String>,
    pub token_consumption: TokenConsumption,
    pub api_calls: ApiCalls,
    pub text_responses: Vec<String>,
    pub end_of_convo: bool,
}
