//! Embedder settings for one DagBox instance.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults;
use crate::logging::LogSettings;

/// Transport family carrying bus messages.
///
/// Use `Ipc` when the application spans multiple processes on one host and
/// `Tcp` when it spans machines; otherwise `Inprocess` gives the best
/// performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Inprocess,
    Ipc,
    Tcp,
}

/// Settings for an embedded DagBox instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Directory the store workers persist into. The application must
    /// have write access here.
    pub data_dir: Utf8PathBuf,
    /// Transport family for the bus.
    #[serde(default)]
    pub transport: TransportKind,
    /// Explicit broker address, without the transport scheme. When unset
    /// a unique random name is generated.
    #[serde(default)]
    pub broker_address: Option<String>,
    /// Number of store reader workers to start. More readers can utilise
    /// disk throughput better, at the cost of a thread each.
    #[serde(default = "default_reader_count")]
    pub reader_count: usize,
    /// How long a worker may stay silent before the broker treats it as
    /// dead.
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout: Duration,
    /// Extra allowance for transport latency, added to the worker timeout
    /// on the broker side so in-flight replies still count.
    #[serde(default = "default_transport_delay")]
    pub transport_delay: Duration,
    /// Broker receive timeout; bounds how long the broker sleeps while
    /// idle.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: Duration,
    /// Telemetry options.
    #[serde(default)]
    pub logging: LogSettings,
}

impl Settings {
    /// Creates settings with the documented defaults for everything but
    /// the data directory.
    #[must_use]
    pub fn new(data_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            transport: TransportKind::default(),
            broker_address: None,
            reader_count: defaults::READER_COUNT,
            worker_timeout: defaults::WORKER_TIMEOUT,
            transport_delay: defaults::TRANSPORT_DELAY,
            poll_timeout: defaults::POLL_TIMEOUT,
            logging: LogSettings::default(),
        }
    }

    /// The broker-side liveness window: the worker timeout plus the
    /// transport delay, giving responses time to travel before a worker
    /// is declared dead.
    #[must_use]
    pub fn broker_timeout(&self) -> Duration {
        self.worker_timeout + self.transport_delay
    }

    /// Checks invariants that would otherwise surface as confusing
    /// failures deep inside the bus.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] naming the offending field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.data_dir.as_str().is_empty() {
            return Err(SettingsError::MissingDataDir);
        }
        if self.worker_timeout.is_zero() {
            return Err(SettingsError::ZeroTimeout {
                field: "worker_timeout",
            });
        }
        if self.poll_timeout.is_zero() {
            return Err(SettingsError::ZeroTimeout {
                field: "poll_timeout",
            });
        }
        Ok(())
    }
}

fn default_reader_count() -> usize {
    defaults::READER_COUNT
}

fn default_worker_timeout() -> Duration {
    defaults::WORKER_TIMEOUT
}

fn default_transport_delay() -> Duration {
    defaults::TRANSPORT_DELAY
}

fn default_poll_timeout() -> Duration {
    defaults::POLL_TIMEOUT
}

/// Errors surfaced by [`Settings::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// The data directory is empty.
    #[error("data directory must be set")]
    MissingDataDir,
    /// A timing field is zero.
    #[error("{field} must be nonzero")]
    ZeroTimeout { field: &'static str },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let settings = Settings::new("/var/lib/dagbox");
        assert_eq!(settings.transport, TransportKind::Inprocess);
        assert_eq!(settings.reader_count, 4);
        assert_eq!(settings.worker_timeout, Duration::from_millis(500));
        assert_eq!(settings.transport_delay, Duration::from_millis(100));
        assert!(settings.broker_address.is_none());
    }

    #[test]
    fn broker_timeout_adds_transport_delay() {
        let settings = Settings::new("/var/lib/dagbox");
        assert_eq!(settings.broker_timeout(), Duration::from_millis(600));
    }

    #[test]
    fn validates_default_settings() {
        assert_eq!(Settings::new("/var/lib/dagbox").validate(), Ok(()));
    }

    #[rstest]
    #[case::empty_data_dir("", SettingsError::MissingDataDir)]
    fn rejects_missing_data_dir(#[case] data_dir: &str, #[case] expected: SettingsError) {
        let settings = Settings::new(data_dir);
        assert_eq!(settings.validate(), Err(expected));
    }

    #[test]
    fn rejects_zero_timings() {
        let mut settings = Settings::new("/var/lib/dagbox");
        settings.worker_timeout = Duration::ZERO;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::ZeroTimeout {
                field: "worker_timeout"
            })
        ));
    }
}
