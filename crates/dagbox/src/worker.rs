//! The contract request-processing workers implement.

use dagbox_wire::{Reply, Request};

/// A request-processing worker.
///
/// The broker and the assistant never look inside request bodies; the
/// payload format is a contract between the worker and its clients. A
/// worker keeps whatever state it needs across requests — the lifetime of
/// each request itself ends when `process` returns.
pub trait Worker: Send + 'static {
    /// The service name declared at registration. Clients target requests
    /// by this name; it must stay stable for the worker's lifetime.
    fn service_name(&self) -> &str;

    /// Handles one request and produces its reply.
    ///
    /// Workers that transform payload records in place mutate the
    /// request's data parts and repackage it with
    /// [`Reply::from_request`], which keeps the client address and
    /// metadata intact for correlation.
    fn process(&mut self, request: Request) -> Reply;
}
