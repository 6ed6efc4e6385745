//! Default values for embedder settings.

use std::time::Duration;

/// Number of store reader workers started by default.
pub(crate) const READER_COUNT: usize = 4;

/// How long a worker may stay silent before the broker treats it as dead.
///
/// Should exceed the time an average request takes to process.
pub(crate) const WORKER_TIMEOUT: Duration = Duration::from_millis(500);

/// Allowance for a message to traverse the chosen transport.
///
/// The broker adds this on top of the worker timeout so in-flight replies
/// still count as signs of life.
pub(crate) const TRANSPORT_DELAY: Duration = Duration::from_millis(100);

/// Broker receive timeout; keeps the broker loop waking periodically even
/// when the bus is idle.
pub(crate) const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Default log filter directive.
pub(crate) const LOG_FILTER: &str = "info";
