pub mod extractor;
pub mod handler;
pub mod models;
pub mod patterns;
pub mod sink;
pub mod user_agent;
mod utils;

pub use extractor::{Extraction, extract, extract_with_diagnostics};
pub use handler::AnalyticsHandler;
pub use models::{AnalyticsRecord, Diagnostic, HeaderInfo, TraceItem};
pub use sink::{AnalyticsSink, ChannelSink, LogSink};
