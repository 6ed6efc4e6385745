//! Shared messaging context.

use std::sync::Arc;

use crate::hub::Hub;

/// Shared state sockets are created from.
///
/// The context owns the in-process exchange registry, so an in-process
/// router and its dealers must be created from clones of the same context.
/// Stream-backed sockets only need the context for uniformity. Cloning is
/// cheap; the clone refers to the same registry.
#[derive(Clone, Default)]
pub struct Context {
    hub: Arc<Hub>,
}

impl Context {
    /// Creates a fresh context with an empty exchange registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn hub(&self) -> &Hub {
        &self.hub
    }
}
