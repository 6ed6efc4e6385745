//! Message model and wire codec for the DagBox service bus.
//!
//! DagBox peers exchange self-describing multipart messages. Every message
//! starts with a common header — an optional routing address, an empty
//! delimiter part, the protocol magic and version, and a one-byte type tag —
//! followed by sections specific to the message kind. This crate owns the
//! typed [`Message`] model and the conversions between messages and ordered
//! sequences of opaque byte parts.
//!
//! # Wire layout
//!
//! ```text
//! [address bytes]       optional; omitted entirely when absent
//! []                    empty delimiter
//! "DGBX" 0x01           protocol magic + version, one five-byte part
//! [tag]                 one byte, 0x01..=0x06
//! ...                   kind-specific sections
//! ```
//!
//! Optional sections encode as a nonempty part followed by an empty
//! delimiter, or a single empty part when absent. Multi-part sections run
//! until the next empty part or the end of the message. The conventions are
//! load-bearing for interoperability and are preserved bit-exact.
//!
//! # Core types
//!
//! - [`Message`] — tagged union over the six message kinds
//! - [`Address`] — opaque transport-assigned peer identifier
//! - [`WireError`] — framing and version violations

mod codec;
mod error;
mod message;

pub use error::WireError;
pub use message::{
    Address, Message, MessageKind, Ping, Pong, Reconnect, Registration, Reply, Request,
};

/// A single opaque part of a multipart message.
pub type Part = Vec<u8>;

/// Protocol magic bytes prefixed to every message.
pub const PROTOCOL_MAGIC: &[u8; 4] = b"DGBX";

/// Wire protocol version understood by this implementation.
pub const PROTOCOL_VERSION: u8 = 0x01;
