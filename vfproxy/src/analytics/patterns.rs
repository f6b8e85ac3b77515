//! Named matchers for the facts the runtime embeds in markdown-formatted debug messages.
//!
//! The runtime does not report intents, models or token usage as typed fields. It renders them
//! into human-readable debug text, for example:
//!
//! ```text
//! matched intent **BookFlight** - confidence interval _87.5%_
//! __AI Response__ Model: `gpt-4` Post-Multiplier Token Consumption: `{total:10,query:4,answer:6}`
//! ```
//!
//! Every upstream message format the extractor depends on is written down here and nowhere else,
//! so a change in the runtime's wording is a change to this module only. The patterns are
//! case-sensitive and treat the markdown emphasis markers as literal delimiters.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Exact message of a debug `api` item whose call succeeded.
pub const API_SUCCESS_MESSAGE: &str = "API call successfully triggered";

/// Marker of messages emitted when an AI step sets a variable.
pub const AI_SET_MARKER: &str = "__AI Set__";

/// Marker of messages emitted when an AI step answers the user.
pub const AI_RESPONSE_MARKER: &str = "__AI Response__";

static INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"matched intent \*\*(.*?)\*\* - confidence interval _(.*?)%_").expect("intent pattern is valid")
});

static MODEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"Model: `(.*?)`").expect("model pattern is valid"));

static TOKEN_CONSUMPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Post-Multiplier Token Consumption: `\{(.*?)\}`").expect("token consumption pattern is valid")
});

/// An identifier directly followed by a colon, e.g. the `total:` in `{total:10}`.
static BARE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Za-z0-9_]+):").expect("bare key pattern is valid"));

/// The numeric prefix `parseFloat` would accept.
static FLOAT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)").expect("float prefix pattern is valid"));

/// The resolved intent of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentMatch {
    pub name: String,
    /// Confidence in percent, `None` when the rendered percentage is not numeric
    pub confidence: Option<f64>,
}

/// Token counts as found in a consumption body. Absent and `null` fields count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    total: Option<f64>,
    #[serde(default)]
    query: Option<f64>,
    #[serde(default)]
    answer: Option<f64>,
}

impl TokenCounts {
    pub fn total(&self) -> f64 {
        self.total.unwrap_or(0.0)
    }

    pub fn query(&self) -> f64 {
        self.query.unwrap_or(0.0)
    }

    pub fn answer(&self) -> f64 {
        self.answer.unwrap_or(0.0)
    }
}

/// Matches `matched intent **<NAME>** - confidence interval _<PCT>%_`.
pub fn match_intent(message: &str) -> Option<IntentMatch> {
    let captures = INTENT.captures(message)?;
    Some(IntentMatch {
        name: captures[1].to_string(),
        confidence: parse_float_prefix(&captures[2]),
    })
}

/// Matches ``Model: `<NAME>` `` and returns the model name.
pub fn match_model(message: &str) -> Option<&str> {
    MODEL.captures(message).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Matches ``Post-Multiplier Token Consumption: `{<BODY>}` `` and returns the body without braces.
pub fn match_token_consumption(message: &str) -> Option<&str> {
    TOKEN_CONSUMPTION.captures(message).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Whether a debug message reports the model and token usage of an AI step.
pub fn is_ai_usage_message(message: &str) -> bool {
    message.contains(AI_SET_MARKER) || message.contains(AI_RESPONSE_MARKER)
}

/// Turns the pseudo-JSON body of a consumption message into JSON text.
///
/// Backticks become double quotes and every `word:` becomes `"word":`, then the result is
/// wrapped in braces. This is a best-effort bridge, not a parser: string values containing
/// colons or nested braces produce invalid JSON, which the caller must treat as "no data".
/// A repeated count key (`total:1,total:2`) is also rejected rather than resolved to the last
/// value.
pub fn normalize_pseudo_json(body: &str) -> String {
    let quoted = body.replace('`', "\"");
    let keyed = BARE_KEY.replace_all(&quoted, "\"${1}\":");
    format!("{{{keyed}}}")
}

/// Normalizes and parses a consumption body.
pub fn parse_token_consumption(body: &str) -> Result<TokenCounts, serde_json::Error> {
    serde_json::from_str(&normalize_pseudo_json(body))
}

/// Parses the leading number of `s` the way a lenient float parser does: leading whitespace is
/// skipped and anything after the numeric prefix is ignored. Returns `None` if there is no
/// numeric prefix at all.
pub fn parse_float_prefix(s: &str) -> Option<f64> {
    let captures = FLOAT_PREFIX.captures(s)?;
    captures[1].parse().ok()
}
