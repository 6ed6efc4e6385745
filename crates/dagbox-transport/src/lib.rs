//! Message transport for the DagBox service bus.
//!
//! The transport moves complete multipart messages between peers and hides
//! the byte-level mechanics from the protocol layer. It offers two socket
//! shapes borrowed from the router/dealer model:
//!
//! - [`RouterSocket`] — binds an endpoint and talks to many peers. On
//!   receive, the sender's transport address is prepended as the first
//!   part; on send, the first part names the routing target and is
//!   stripped before delivery.
//! - [`DealerSocket`] — connects to a router and exchanges parts verbatim.
//!
//! Three endpoint families are supported: in-process exchanges backed by
//! channels, Unix domain sockets, and TCP. Stream-backed endpoints frame
//! each message as a length-prefixed part sequence; receipt is atomic per
//! message regardless of the family.
//!
//! Sockets are created from a shared [`Context`], which owns the
//! in-process exchange registry. The context is cheap to clone and safe to
//! share across threads; each socket must stay on the thread that uses it.

mod context;
mod dealer;
mod endpoint;
mod error;
mod frame;
mod hub;
mod router;
mod stream;

pub use context::Context;
pub use dealer::DealerSocket;
pub use endpoint::Endpoint;
pub use error::TransportError;
pub use router::RouterSocket;

/// A single opaque part of a multipart message.
pub type Part = Vec<u8>;

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
