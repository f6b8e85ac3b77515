//! HTTP client for the upstream conversational runtime.

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use tracing::{debug, instrument};
use url::Url;

use crate::config::UpstreamConfig;
use crate::errors::Error;

/// A fully buffered upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The runtime every inbound request is forwarded to.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base: Url,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base: config.url.clone(),
        })
    }

    /// Base URL followed by the inbound path and query, e.g. `/state/user/u1/interact?logs=off`.
    pub fn target_url(&self, path_and_query: &str) -> Result<Url, Error> {
        let base = self.base.as_str().trim_end_matches('/');
        let target = format!("{base}{path_and_query}");
        Url::parse(&target).map_err(|e| Error::BadRequest {
            message: format!("Cannot forward to '{target}': {e}"),
        })
    }

    /// Value of the `Host` header for upstream requests; includes the port only if it is not
    /// the scheme's default.
    pub fn host_header(&self) -> Result<HeaderValue, Error> {
        let host = self.base.host_str().ok_or_else(|| Error::Internal {
            operation: format!("derive host from upstream URL '{}'", self.base),
        })?;
        let host = match self.base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        HeaderValue::from_str(&host).map_err(|e| Error::Internal {
            operation: format!("build host header '{host}': {e}"),
        })
    }

    /// Sends one request and buffers the whole response.
    #[instrument(skip(self, headers, body), fields(body_bytes = body.len()), err)]
    pub async fn send(&self, method: Method, url: Url, headers: HeaderMap, body: Bytes) -> Result<UpstreamResponse, reqwest::Error> {
        let mut request = self.client.request(method, url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        debug!(%status, response_bytes = body.len(), "Upstream responded");

        Ok(UpstreamResponse { status, headers, body })
    }
}
