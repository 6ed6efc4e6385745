//! Structured telemetry initialisation for embedders.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{subscriber::SetGlobalDefaultError, Subscriber};
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use dagbox_config::{LogFormat, LogSettings};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first
/// time.
///
/// Repeated calls are idempotent: the first invocation installs the
/// global subscriber, later ones return a fresh [`TelemetryHandle`]
/// without touching global state. Embedders that already install their
/// own subscriber simply skip this.
///
/// # Errors
///
/// Fails when the filter expression does not parse or another subscriber
/// was installed through a different path first.
pub fn initialise(settings: &LogSettings) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(settings))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(settings: &LogSettings) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&settings.filter)
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        // Avoid stray colour codes in non-TTY sinks while keeping colour
        // on interactive terminals.
        .with_ansi(io::stderr().is_terminal());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match settings.format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
