//! The forwarding gateway.
//!
//! Every inbound request is relayed to the upstream runtime at the same path and query. Requests
//! to an interaction endpoint get two extra steps: the body is rewritten so the runtime returns a
//! trace suitable for analytics, and a successful response is handed to the
//! [`AnalyticsHandler`](crate::analytics::AnalyticsHandler) before being returned to the client.
//! The client always receives the upstream response as-is.

pub mod upstream;

use axum::{
    body::Body,
    extract::{State, rejection::BytesRejection},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri,
        header::{ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, ORIGIN},
    },
    response::Response,
};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::errors::Error;
use crate::metrics::{self, ForwardOutcome};

pub use upstream::{Upstream, UpstreamResponse};

/// Path fragment identifying interaction requests.
const INTERACTION_PATH_FRAGMENT: &str = "/interact";

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a request path targets an interaction endpoint.
pub fn is_interaction_path(path: &str) -> bool {
    path.contains(INTERACTION_PATH_FRAGMENT)
}

/// Runtime settings attached to every interaction request. Presentation-only trace types are
/// excluded and text-to-speech is disabled.
pub fn interaction_config() -> Value {
    json!({
        "excludeTypes": ["speak", "flow", "block"],
        "tts": false
    })
}

/// Parses an interaction body and sets its `config`.
///
/// An empty body is treated as `{}`. Anything other than a JSON object is rejected.
pub fn prepare_interaction_body(body: &[u8]) -> Result<Value, Error> {
    let mut value = if body.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(body).map_err(|e| Error::BadRequest {
            message: format!("Interaction body is not valid JSON: {e}"),
        })?
    };

    let Some(object) = value.as_object_mut() else {
        return Err(Error::BadRequest {
            message: "Interaction body must be a JSON object".to_string(),
        });
    };
    object.insert("config".to_string(), interaction_config());

    Ok(value)
}

/// Hop-by-hop headers, including any extra ones named by the `Connection` header.
fn hop_by_hop(headers: &HeaderMap) -> Vec<HeaderName> {
    let listed = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok());

    HOP_BY_HOP_HEADERS
        .into_iter()
        .map(HeaderName::from_static)
        .chain(listed)
        .collect()
}

/// Headers sent upstream: the inbound ones minus connection-specific and origin headers, with
/// `Host` pointing at the runtime.
pub fn upstream_request_headers(inbound: &HeaderMap, host: HeaderValue, interaction: bool) -> HeaderMap {
    let excluded = hop_by_hop(inbound);
    let mut headers = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound {
        if excluded.contains(name) || name == HOST || name == ORIGIN || name == CONTENT_LENGTH {
            continue;
        }
        // The response body is inspected, so it must come back uncompressed
        if interaction && name == ACCEPT_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(HOST, host);
    if interaction {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    headers
}

/// Headers returned to the client from a successful upstream response.
pub fn client_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let excluded = hop_by_hop(upstream);
    let mut headers = HeaderMap::with_capacity(upstream.len());

    for (name, value) in upstream {
        if excluded.contains(name) || name == CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Response body rendered for logs: pretty JSON when possible, lossy text otherwise.
fn body_for_log(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

/// Fallback handler relaying every request to the upstream runtime.
#[instrument(skip_all, fields(method = %method, path = uri.path()))]
pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, Error> {
    let interaction = is_interaction_path(uri.path());

    let result = forward_inner(&state, method, &uri, &headers, body, interaction).await;
    let outcome = match &result {
        Ok(response) if response.status().as_u16() >= 400 => ForwardOutcome::UpstreamError,
        Ok(_) => ForwardOutcome::Success,
        Err(Error::Upstream(_)) => ForwardOutcome::NetworkError,
        Err(_) => ForwardOutcome::Rejected,
    };
    metrics::record_forwarded_request(interaction, outcome);

    result
}

async fn forward_inner(
    state: &AppState,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
    interaction: bool,
) -> Result<Response, Error> {
    let body = body.map_err(|rejection| match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => Error::PayloadTooLarge {
            limit: state.config.max_body_size,
        },
        _ => Error::BadRequest {
            message: rejection.body_text(),
        },
    })?;

    if interaction {
        info!(%method, path = uri.path(), "Interaction request");
    }

    let (body, interaction_body) = if interaction {
        let value = prepare_interaction_body(&body)?;
        let bytes = serde_json::to_vec(&value).map_err(|e| Error::Internal {
            operation: format!("serialize interaction body: {e}"),
        })?;
        (Bytes::from(bytes), Some(value))
    } else {
        (body, None)
    };

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| uri.path());
    let target = state.upstream.target_url(path_and_query)?;
    let upstream_headers = upstream_request_headers(headers, state.upstream.host_header()?, interaction);

    let upstream = state.upstream.send(method, target, upstream_headers, body).await?;

    if upstream.status.as_u16() >= 400 {
        if interaction {
            warn!(status = upstream.status.as_u16(), body = %body_for_log(&upstream.body), "Upstream rejected interaction request");
        }
        let mut builder = Response::builder().status(upstream.status);
        if let Some(content_type) = upstream.headers.get(CONTENT_TYPE) {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        return builder.body(Body::from(upstream.body)).map_err(|e| Error::Internal {
            operation: format!("build error response: {e}"),
        });
    }

    if let Some(request_body) = &interaction_body {
        state.analytics.handle_response(request_body, headers, &upstream.body).await;
    }

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = client_response_headers(&upstream.headers);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_interaction_path() {
        assert!(is_interaction_path("/state/user/u1/interact"));
        assert!(is_interaction_path("/v2/project/p1/user/u1/interact/stream"));
        assert!(is_interaction_path("/interaction"));
        assert!(!is_interaction_path("/state/user/u1"));
        assert!(!is_interaction_path("/INTERACT"));
    }

    #[test]
    fn test_prepare_interaction_body_sets_config() {
        let body = br#"{"action": {"type": "launch"}, "config": {"tts": true, "stripSSML": true}}"#;

        let value = prepare_interaction_body(body).unwrap();

        assert_eq!(value["action"], json!({"type": "launch"}));
        assert_eq!(value["config"], interaction_config());
    }

    #[test]
    fn test_prepare_interaction_body_empty_is_object() {
        let value = prepare_interaction_body(b"").unwrap();
        assert_eq!(value, json!({"config": interaction_config()}));
    }

    #[test]
    fn test_prepare_interaction_body_rejects_non_objects() {
        for body in [&b"[1, 2]"[..], b"\"text\"", b"null", b"{not json"] {
            let err = prepare_interaction_body(body).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "body {:?}", String::from_utf8_lossy(body));
        }
    }

    #[test]
    fn test_upstream_request_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(HOST, HeaderValue::from_static("proxy.example.com"));
        inbound.insert(ORIGIN, HeaderValue::from_static("https://shop.example.com"));
        inbound.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        inbound.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        inbound.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-trace-hop"));
        inbound.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        inbound.insert("x-trace-hop", HeaderValue::from_static("1"));
        inbound.insert("authorization", HeaderValue::from_static("VF.DM.key"));
        inbound.append("versionid", HeaderValue::from_static("production"));

        let host = HeaderValue::from_static("general-runtime.voiceflow.com");

        let headers = upstream_request_headers(&inbound, host.clone(), true);
        assert_eq!(headers.get(HOST).unwrap(), "general-runtime.voiceflow.com");
        assert_eq!(headers.get("authorization").unwrap(), "VF.DM.key");
        assert_eq!(headers.get("versionid").unwrap(), "production");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        for dropped in ["origin", "content-length", "accept-encoding", "connection", "keep-alive", "x-trace-hop"] {
            assert!(headers.get(dropped).is_none(), "{dropped} should not be forwarded");
        }

        let headers = upstream_request_headers(&inbound, host, false);
        assert_eq!(headers.get(ACCEPT_ENCODING).unwrap(), "gzip");
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert!(headers.get(ORIGIN).is_none());
    }

    #[test]
    fn test_client_response_headers() {
        let mut upstream = HeaderMap::new();
        upstream.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        upstream.insert("x-request-id", HeaderValue::from_static("abc"));

        let headers = client_response_headers(&upstream);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get("x-request-id").unwrap(), "abc");
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert!(headers.get("transfer-encoding").is_none());
    }

    #[test]
    fn test_body_for_log() {
        assert_eq!(body_for_log(br#"{"a":1}"#), "{\n  \"a\": 1\n}");
        assert_eq!(body_for_log(b"Bad Gateway"), "Bad Gateway");
    }
}
