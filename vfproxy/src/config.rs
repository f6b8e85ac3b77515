//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `VFPROXY_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `VFPROXY_` override YAML values
//! 3. **PORT / VOICEFLOW_RUNTIME_URL** - Unprefixed variables understood by existing deployments,
//!    overriding `port` and `upstream.url` respectively
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `VFPROXY_UPSTREAM__TIMEOUT=10s` sets the `upstream.timeout` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use vfproxy::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Proxying {} on {}:{}", config.upstream.url, config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! VFPROXY_PORT=8080
//! # or, unprefixed
//! PORT=8080
//!
//! # Point at a private runtime
//! VOICEFLOW_RUNTIME_URL="https://runtime.internal.example.com"
//!
//! # Override nested values
//! VFPROXY_UPSTREAM__TIMEOUT=15s
//! VFPROXY_ENABLE_METRICS=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Default upstream conversational runtime.
pub const DEFAULT_RUNTIME_URL: &str = "https://general-runtime.voiceflow.com";

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "VFPROXY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// The conversational runtime every request is forwarded to
    pub upstream: UpstreamConfig,
    /// Cross-origin settings for browser clients
    pub cors: CorsConfig,
    /// Largest inbound request body (bytes) the proxy will buffer
    pub max_body_size: usize,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Upstream runtime settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL; the inbound path and query are appended to it
    pub url: Url,
    /// Per-request timeout for the upstream call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            upstream: UpstreamConfig::default(),
            cors: CorsConfig::default(),
            max_body_size: 2 * 1024 * 1024,
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_RUNTIME_URL).expect("default runtime URL is valid"),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.upstream.url.scheme(), "http" | "https") || self.upstream.url.host_str().is_none() {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: upstream.url must be an absolute http(s) URL with a host, got '{}'",
                    self.upstream.url
                ),
            });
        }

        if self.upstream.timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: upstream.timeout must be greater than zero".to_string(),
            });
        }

        if self.max_body_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: max_body_size cannot be 0".to_string(),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        // Browsers reject `Access-Control-Allow-Origin: *` on credentialed requests
        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("VFPROXY_").ignore(&["CONFIG"]).split("__"))
            // Unprefixed variables used by existing deployments
            .merge(Env::raw().only(&["PORT"]))
            .merge(Env::raw().only(&["VOICEFLOW_RUNTIME_URL"]).map(|_| "upstream.url".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
