#![allow(dead_code)]
//! Shared helpers for bus integration tests.

use std::time::Duration;

use dagbox_transport::{Context, DealerSocket, Endpoint};
use dagbox_wire::{Message, Part};

/// Generous deadline for messages that must arrive.
pub const RECV_DEADLINE: Duration = Duration::from_secs(2);
/// Short window used to assert that nothing arrives.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(100);
/// Time allowed for spawned components to settle (registrations landing
/// at the broker, mostly).
pub const SETTLE: Duration = Duration::from_millis(200);

/// A peer on the bus driven by hand: a client or a worker the test
/// controls directly instead of running an assistant.
pub struct Peer {
    socket: DealerSocket,
}

impl Peer {
    pub fn connect(context: &Context, endpoint: &Endpoint) -> Self {
        let socket = DealerSocket::connect(context, endpoint).expect("connect peer");
        Self { socket }
    }

    pub fn send(&mut self, message: Message) {
        self.socket.send(message.encode()).expect("peer send");
    }

    pub fn send_raw(&mut self, parts: Vec<Part>) {
        self.socket.send(parts).expect("peer raw send");
    }

    /// Receives and decodes the next message, failing the test if the
    /// deadline passes first.
    pub fn recv(&mut self) -> Message {
        let parts = self
            .socket
            .recv_timeout(RECV_DEADLINE)
            .expect("peer recv")
            .expect("message before deadline");
        Message::decode(parts).expect("decode message")
    }

    /// Returns the next message if one arrives within the silence window.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.socket
            .recv_timeout(SILENCE_WINDOW)
            .expect("peer recv")
            .map(|parts| Message::decode(parts).expect("decode message"))
    }

    /// Asserts that nothing reaches this peer within the silence window.
    pub fn expect_silence(&mut self) {
        let received = self.try_recv();
        assert!(received.is_none(), "expected silence, got {received:?}");
    }
}

pub fn parts(raw: &[&[u8]]) -> Vec<Part> {
    raw.iter().map(|part| part.to_vec()).collect()
}
