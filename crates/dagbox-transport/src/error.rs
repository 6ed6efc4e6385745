//! Error types for transport sockets.

use std::io;

use thiserror::Error;

/// Errors surfaced by router and dealer sockets.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind a router socket to its endpoint.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Failed to connect a dealer socket to its endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// An in-process exchange name is already bound in this context.
    #[error("in-process exchange '{name}' is already bound")]
    AlreadyBound { name: String },
    /// Connected to an in-process exchange nobody has bound.
    #[error("in-process exchange '{name}' is not bound")]
    NotBound { name: String },
    /// A routed send named a peer the socket does not know.
    ///
    /// The peer either never attached or has since disconnected. Senders
    /// that accept at-most-once delivery log and drop the message.
    #[error("no route to peer {address}")]
    Unroutable { address: String },
    /// A routed send carried no routing target as its first part.
    #[error("routed send without a routing target")]
    MissingTarget,
    /// The peer or the owning exchange has gone away.
    #[error("transport peer disconnected")]
    Disconnected,
    /// Endpoint family is unsupported on this platform.
    #[error("endpoint {endpoint} is unsupported on this platform")]
    Unsupported { endpoint: String },
    /// I/O failure while transmitting a message.
    #[error("transport i/o failure: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}
