//! Test utilities for integration testing.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::analytics::{AnalyticsRecord, ChannelSink};
use crate::config::{Config, UpstreamConfig};

/// Config pointing at `upstream_url` with a short timeout.
pub fn create_test_config(upstream_url: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        upstream: UpstreamConfig {
            url: Url::parse(upstream_url).expect("test upstream URL is valid"),
            timeout: Duration::from_secs(5),
        },
        ..Default::default()
    }
}

/// Test server for `config` and the receiving end of its analytics sink.
pub fn create_test_app_with_config(config: Config) -> (TestServer, UnboundedReceiver<AnalyticsRecord>) {
    crate::install_crypto_provider();

    let (sink, receiver) = ChannelSink::new();
    let app = crate::Application::new_with_sink(config, Arc::new(sink)).expect("Failed to create application");

    (app.into_test_server(), receiver)
}

/// Test server proxying to `upstream_url`.
pub fn create_test_app(upstream_url: &str) -> (TestServer, UnboundedReceiver<AnalyticsRecord>) {
    create_test_app_with_config(create_test_config(upstream_url))
}
