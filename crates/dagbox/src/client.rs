//! Synchronous client for submitting requests to the bus.

use std::time::Duration;

use thiserror::Error;

use dagbox_transport::{Context, DealerSocket, Endpoint, TransportError};
use dagbox_wire::{Message, MessageKind, Reply, Request, WireError};

/// A connection to the broker for submitting requests.
///
/// The client is deliberately thin: it encodes requests, decodes replies,
/// and leaves correlation to the caller via metadata parts, which the bus
/// echoes verbatim. Replies can arrive out of order when requests fan out
/// to different workers.
///
/// There is no protocol-level error reporting: a request for a service
/// with no workers, or one whose worker dies mid-request, produces no
/// reply at all. Callers time out and resubmit at their own policy.
pub struct Client {
    socket: DealerSocket,
}

impl Client {
    /// Connects to the broker at the given endpoint.
    ///
    /// In-process endpoints require the same [`Context`] the broker was
    /// bound from.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint is unreachable.
    pub fn connect(context: &Context, broker: &Endpoint) -> Result<Self, ClientError> {
        let socket = DealerSocket::connect(context, broker)?;
        Ok(Self { socket })
    }

    /// Submits a request without waiting for its reply.
    ///
    /// # Errors
    ///
    /// Fails when the transport rejects the send.
    pub fn send(&mut self, request: Request) -> Result<(), ClientError> {
        self.socket.send(Message::Request(request).encode())?;
        Ok(())
    }

    /// Waits up to `timeout` for the next reply.
    ///
    /// Returns `Ok(None)` when the timeout elapses first.
    ///
    /// # Errors
    ///
    /// Fails on transport breakdown, undecodable input, or a message of
    /// any kind other than a reply.
    pub fn recv_reply(&mut self, timeout: Duration) -> Result<Option<Reply>, ClientError> {
        let Some(parts) = self.socket.recv_timeout(timeout)? else {
            return Ok(None);
        };
        match Message::decode(parts)? {
            Message::Reply(reply) => Ok(Some(reply)),
            other => Err(ClientError::UnexpectedMessage { kind: other.kind() }),
        }
    }

    /// Submits a request and waits up to `timeout` for the next reply.
    ///
    /// This is [`Client::send`] followed by [`Client::recv_reply`];
    /// callers with multiple requests in flight should use those directly
    /// and correlate via metadata.
    ///
    /// # Errors
    ///
    /// As for [`Client::send`] and [`Client::recv_reply`].
    pub fn request(
        &mut self,
        request: Request,
        timeout: Duration,
    ) -> Result<Option<Reply>, ClientError> {
        self.send(request)?;
        self.recv_reply(timeout)
    }
}

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport failed underneath the client.
    #[error("client transport failure: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },
    /// A received message could not be decoded.
    #[error("client received an undecodable message: {source}")]
    Wire {
        #[from]
        source: WireError,
    },
    /// A received message was not a reply.
    #[error("client received an unexpected {kind:?} message")]
    UnexpectedMessage { kind: MessageKind },
}
