//! Logging options for embedders that let DagBox install telemetry.

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-oriented single-line output.
    #[default]
    Compact,
    /// Structured JSON lines for log shippers.
    Json,
}

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive in `tracing_subscriber::EnvFilter` syntax.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: defaults::LOG_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}
