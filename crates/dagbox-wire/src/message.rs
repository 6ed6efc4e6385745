//! Typed message model for the DagBox wire protocol.

use std::fmt;

use crate::{Part, WireError};

/// Opaque transport-assigned identifier for a connected peer.
///
/// Addresses are handed out by the router side of the transport when a peer
/// first attaches and stay stable for the lifetime of that peer's
/// connection. The broker treats them as plain bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address(Vec<u8>);

impl Address {
    /// Wraps raw address bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrows the raw address bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the address, returning the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Address {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Address {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Address({self})")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(formatter, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The six message kinds, with their on-wire tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// A worker declaring the service it provides.
    Registration = 0x01,
    /// Liveness probe; the receiver answers with a pong.
    Ping = 0x02,
    /// Liveness response.
    Pong = 0x03,
    /// Work item targeted at a named service.
    Request = 0x04,
    /// Result of a request.
    Reply = 0x05,
    /// Broker asking a worker to register again.
    Reconnect = 0x06,
}

impl MessageKind {
    /// Returns the wire tag for this kind.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Maps a wire tag back to a kind.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] when the tag falls outside the
    /// valid range.
    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        match tag {
            0x01 => Ok(Self::Registration),
            0x02 => Ok(Self::Ping),
            0x03 => Ok(Self::Pong),
            0x04 => Ok(Self::Request),
            0x05 => Ok(Self::Reply),
            0x06 => Ok(Self::Reconnect),
            _ => Err(WireError::malformed("type tag out of range")),
        }
    }
}

/// A worker's declaration that it provides a named service.
///
/// The broker echoes the registration back to the sender as an
/// acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub(crate) address: Option<Address>,
    pub(crate) service: String,
}

impl Registration {
    /// Creates a registration for the given service.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            address: None,
            service: service.into(),
        }
    }

    /// The declared service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

/// Liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ping {
    pub(crate) address: Option<Address>,
}

impl Ping {
    /// Creates a ping with no routing address attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Liveness response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub(crate) address: Option<Address>,
}

impl Pong {
    /// Promotes a ping into a pong, preserving the routing envelope.
    #[must_use]
    pub fn from_ping(ping: Ping) -> Self {
        Self {
            address: ping.address,
        }
    }
}

/// Broker-to-worker notice that the worker must register again.
///
/// Sent when the broker receives a ping from a peer it has no record of,
/// typically after a broker restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconnect {
    pub(crate) address: Option<Address>,
}

impl Reconnect {
    /// Promotes a ping into a reconnect notice, preserving the routing
    /// envelope so the notice returns to the sender.
    #[must_use]
    pub fn from_ping(ping: Ping) -> Self {
        Self {
            address: ping.address,
        }
    }
}

/// A work item targeted at a named service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub(crate) address: Option<Address>,
    pub(crate) service: String,
    pub(crate) client: Option<Address>,
    pub(crate) metadata: Vec<Part>,
    pub(crate) data: Vec<Part>,
}

impl Request {
    /// Creates a request for the given service.
    ///
    /// Metadata parts are opaque to the broker and echoed verbatim on the
    /// reply; clients use them to correlate responses. Data parts carry the
    /// payload, whose format is a per-service contract.
    #[must_use]
    pub fn new(service: impl Into<String>, metadata: Vec<Part>, data: Vec<Part>) -> Self {
        Self {
            address: None,
            service: service.into(),
            client: None,
            metadata,
            data,
        }
    }

    /// The targeted service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The address of the client that originated this request, once the
    /// broker has stamped it.
    #[must_use]
    pub fn client_address(&self) -> Option<&Address> {
        self.client.as_ref()
    }

    /// Records the originating client's address.
    pub fn set_client_address(&mut self, client: Address) {
        self.client = Some(client);
    }

    /// Metadata parts, echoed verbatim on the reply.
    #[must_use]
    pub fn metadata(&self) -> &[Part] {
        &self.metadata
    }

    /// Payload parts.
    #[must_use]
    pub fn data(&self) -> &[Part] {
        &self.data
    }

    /// Mutable access to the payload parts, for workers that transform
    /// records in place.
    pub fn data_mut(&mut self) -> &mut Vec<Part> {
        &mut self.data
    }
}

/// The result of a request, carrying the originating client's address so
/// the broker can fan it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub(crate) address: Option<Address>,
    pub(crate) client: Option<Address>,
    pub(crate) metadata: Vec<Part>,
    pub(crate) data: Vec<Part>,
}

impl Reply {
    /// Promotes a request into its reply.
    ///
    /// The routing envelope, client address, metadata, and data all carry
    /// over; only the message type changes. Workers that transform payloads
    /// in place mutate the request's data first, then repackage it.
    #[must_use]
    pub fn from_request(request: Request) -> Self {
        Self {
            address: request.address,
            client: request.client,
            metadata: request.metadata,
            data: request.data,
        }
    }

    /// The address of the client this reply should reach.
    #[must_use]
    pub fn client_address(&self) -> Option<&Address> {
        self.client.as_ref()
    }

    /// Metadata parts echoed from the request.
    #[must_use]
    pub fn metadata(&self) -> &[Part] {
        &self.metadata
    }

    /// Payload parts.
    #[must_use]
    pub fn data(&self) -> &[Part] {
        &self.data
    }
}

/// A decoded wire message.
///
/// Handlers dispatch on the variant; the codec guarantees that every
/// decoded message carried the right magic, version, and section structure
/// for its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Registration(Registration),
    Ping(Ping),
    Pong(Pong),
    Request(Request),
    Reply(Reply),
    Reconnect(Reconnect),
}

impl Message {
    /// The kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Registration(_) => MessageKind::Registration,
            Self::Ping(_) => MessageKind::Ping,
            Self::Pong(_) => MessageKind::Pong,
            Self::Request(_) => MessageKind::Request,
            Self::Reply(_) => MessageKind::Reply,
            Self::Reconnect(_) => MessageKind::Reconnect,
        }
    }

    /// The routing address attached to this message, if any.
    ///
    /// On messages received through a router socket this is the sender's
    /// transport address; on outbound messages it is the routing target.
    #[must_use]
    pub fn address(&self) -> Option<&Address> {
        match self {
            Self::Registration(message) => message.address.as_ref(),
            Self::Ping(message) => message.address.as_ref(),
            Self::Pong(message) => message.address.as_ref(),
            Self::Request(message) => message.address.as_ref(),
            Self::Reply(message) => message.address.as_ref(),
            Self::Reconnect(message) => message.address.as_ref(),
        }
    }

    /// Overwrites the routing address, used by the broker when forwarding.
    pub fn set_address(&mut self, address: Address) {
        let slot = match self {
            Self::Registration(message) => &mut message.address,
            Self::Ping(message) => &mut message.address,
            Self::Pong(message) => &mut message.address,
            Self::Request(message) => &mut message.address,
            Self::Reply(message) => &mut message.address,
            Self::Reconnect(message) => &mut message.address,
        };
        *slot = Some(address);
    }
}

impl From<Registration> for Message {
    fn from(message: Registration) -> Self {
        Self::Registration(message)
    }
}

impl From<Ping> for Message {
    fn from(message: Ping) -> Self {
        Self::Ping(message)
    }
}

impl From<Pong> for Message {
    fn from(message: Pong) -> Self {
        Self::Pong(message)
    }
}

impl From<Request> for Message {
    fn from(message: Request) -> Self {
        Self::Request(message)
    }
}

impl From<Reply> for Message {
    fn from(message: Reply) -> Self {
        Self::Reply(message)
    }
}

impl From<Reconnect> for Message {
    fn from(message: Reconnect) -> Self {
        Self::Reconnect(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keeps_request_sections() {
        let mut request = Request::new("echo", vec![b"m".to_vec()], vec![b"d".to_vec()]);
        request.set_client_address(Address::from(b"client".as_slice()));

        let reply = Reply::from_request(request);

        assert_eq!(reply.client_address().unwrap().as_bytes(), b"client");
        assert_eq!(reply.metadata(), &[b"m".to_vec()]);
        assert_eq!(reply.data(), &[b"d".to_vec()]);
    }

    #[test]
    fn pong_preserves_routing_envelope() {
        let mut ping = Message::Ping(Ping::new());
        ping.set_address(Address::from(b"w1".as_slice()));
        let Message::Ping(ping) = ping else {
            unreachable!()
        };

        let pong = Pong::from_ping(ping);

        assert_eq!(pong.address.as_ref().unwrap().as_bytes(), b"w1");
    }

    #[test]
    fn address_displays_as_hex() {
        let address = Address::from(vec![0x00, 0xab, 0x10]);
        assert_eq!(address.to_string(), "00ab10");
    }

    #[test]
    fn rejects_out_of_range_tags() {
        assert!(MessageKind::from_tag(0x00).is_err());
        assert!(MessageKind::from_tag(0x07).is_err());
        assert_eq!(MessageKind::from_tag(0x04).unwrap(), MessageKind::Request);
    }
}
