//! # vfproxy: Analytics proxy for conversational runtimes
//!
//! `vfproxy` sits between chat clients (web widgets, mobile apps) and a conversational runtime
//! such as Voiceflow's general runtime. It relays every request unchanged in meaning and, for
//! interaction requests, distills the runtime's trace into one structured analytics record per
//! conversation turn.
//!
//! ## Overview
//!
//! The runtime answers each user action with a *trace*: an ordered list of events describing
//! what happened during the turn. Texts shown to the user, API steps, intent classification and
//! generative AI usage all show up there, but the facts analytics cares about (which intent
//! matched and how confidently, which model answered, how many tokens it consumed) are only
//! rendered into human-readable debug messages. `vfproxy` recovers those facts and joins them
//! with context from the request (client user agent, session and version headers, the action
//! the user took) into an [`analytics::AnalyticsRecord`].
//!
//! ## Architecture
//!
//! The application is an [Axum](https://github.com/tokio-rs/axum) server with a single fallback
//! handler. There is no routing table to maintain: whatever the client calls is called upstream.
//!
//! ### Request Flow
//!
//! #### Interaction requests (paths containing `/interact`)
//!
//! The JSON body gets a runtime `config` that strips presentation-only trace types and disables
//! text-to-speech, and the request is forwarded. A successful response is read fully, its trace
//! is run through the [extractor](analytics::extractor), and the record is handed to the
//! configured [`AnalyticsSink`](analytics::AnalyticsSink). The client then receives the upstream
//! response unmodified.
//!
//! #### Everything else
//!
//! Forwarded as-is, apart from the connection-level headers every proxy rewrites.
//!
//! ### Core Components
//!
//! - [`proxy`]: the fallback handler and upstream client
//! - [`analytics`]: trace models, debug message patterns, user-agent parsing, the extractor and
//!   the sinks records are delivered to
//! - [`config`]: YAML and environment configuration via figment
//! - [`telemetry`]: tracing subscriber and optional OTLP export
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use vfproxy::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     vfproxy::install_crypto_provider();
//!
//!     let args = vfproxy::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     vfproxy::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
pub mod analytics;
pub mod config;
pub mod errors;
mod metrics;
pub mod proxy;
pub mod telemetry;

#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, http, routing::get};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};

use crate::analytics::{AnalyticsHandler, AnalyticsSink, LogSink};
use crate::config::CorsOrigin;
use crate::proxy::Upstream;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(Arc::new(config))
///     .upstream(Arc::new(upstream))
///     .analytics(AnalyticsHandler::new(Arc::new(LogSink)))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: Arc<Upstream>,
    pub analytics: AnalyticsHandler,
}

/// Installs the process-wide rustls crypto provider. Safe to call more than once.
pub fn install_crypto_provider() {
    // Err means a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Create CORS layer from configuration.
///
/// Methods and request headers are mirrored from the preflight, so browser clients can send any
/// header the runtime accepts (`versionID`, `sessionID`, `authorization`).
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a trailing slash
                origins.push(url.as_str().trim_end_matches('/').parse::<http::HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// Every request goes to [`proxy::forward`], except `/internal/metrics` when metrics are enabled.
/// CORS, body limit and request tracing apply to all of them.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors_layer = create_cors_layer(&state.config)?;
    let max_body_size = state.config.max_body_size;
    let enable_metrics = state.config.enable_metrics;

    let mut router = Router::new().fallback(proxy::forward).with_state(state);

    if enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

pub struct Application {
    router: Router,
    config: Arc<Config>,
}

impl Application {
    /// Create an application that logs analytics records.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_sink(config, Arc::new(LogSink))
    }

    /// Create an application delivering analytics records to `sink`.
    pub fn new_with_sink(config: Config, sink: Arc<dyn AnalyticsSink>) -> anyhow::Result<Self> {
        debug!("Starting proxy with configuration: {:#?}", config);

        let upstream = Upstream::new(&config.upstream)?;
        let config = Arc::new(config);

        let state = AppState::builder()
            .config(config.clone())
            .upstream(Arc::new(upstream))
            .analytics(AnalyticsHandler::new(sink))
            .build();

        let router = build_router(state)?;
        Ok(Self { router, config })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            upstream = %self.config.upstream.url,
            "Proxy listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
