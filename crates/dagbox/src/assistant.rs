//! The per-worker protocol loop.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use dagbox_transport::{Context, DealerSocket, Endpoint, TransportError};
use dagbox_wire::{Message, Ping, Pong, Registration, Reply};

use crate::component::RunLoop;
use crate::worker::Worker;

const ASSISTANT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::assistant");

/// Protocol adapter wrapping one [`Worker`].
///
/// The assistant connects a dealer socket to the broker, registers the
/// worker's service, and then drives a receive loop: requests go to the
/// worker and its replies go back out, idle ticks turn into heartbeat
/// pings, and a reconnect notice from the broker triggers re-registration.
///
/// Each step sends at most one message in response to its input, plus at
/// most one heartbeat per idle tick. The assistant never retains a request
/// beyond the step that dispatched it.
pub struct Assistant<W> {
    socket: DealerSocket,
    recv_timeout: Duration,
    worker: W,
}

impl<W: Worker> Assistant<W> {
    /// Connects to the broker and registers the worker's service.
    ///
    /// `recv_timeout` is the idle window: when no message arrives within
    /// it, the assistant pings the broker so the worker keeps counting as
    /// alive. It should stay comfortably below the broker's worker
    /// timeout.
    ///
    /// # Errors
    ///
    /// Fails when the broker endpoint is unreachable or the registration
    /// cannot be sent.
    pub fn new(
        context: &Context,
        broker: &Endpoint,
        recv_timeout: Duration,
        worker: W,
    ) -> Result<Self, AssistantError> {
        let socket = DealerSocket::connect(context, broker)?;
        let mut assistant = Self {
            socket,
            recv_timeout,
            worker,
        };
        assistant.register()?;
        Ok(assistant)
    }

    /// The service this assistant registered.
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.worker.service_name()
    }

    fn register(&mut self) -> Result<(), AssistantError> {
        let registration = Registration::new(self.worker.service_name());
        self.socket
            .send(Message::Registration(registration).encode())?;
        Ok(())
    }

    /// Performs one protocol step: a bounded receive, then the reaction
    /// the received message calls for.
    ///
    /// Malformed input is logged and skipped; the loop continues.
    ///
    /// # Errors
    ///
    /// Fails when the transport breaks down underneath the socket.
    pub fn run_once(&mut self) -> Result<(), AssistantError> {
        let Some(parts) = self.socket.recv_timeout(self.recv_timeout)? else {
            // Nothing to do; check the broker is still there and keep our
            // own liveness record fresh.
            self.socket.send(Message::Ping(Ping::new()).encode())?;
            return Ok(());
        };

        let message = match Message::decode(parts) {
            Ok(message) => message,
            Err(error) => {
                warn!(target: ASSISTANT_TARGET, %error, "dropping undecodable message");
                return Ok(());
            }
        };

        match message {
            Message::Registration(registration) => {
                debug!(
                    target: ASSISTANT_TARGET,
                    service = registration.service(),
                    "registration acknowledged"
                );
            }
            Message::Ping(ping) => {
                self.socket
                    .send(Message::Pong(Pong::from_ping(ping)).encode())?;
            }
            Message::Pong(_) => {}
            Message::Request(request) => {
                let reply: Reply = self.worker.process(request);
                self.socket.send(Message::Reply(reply).encode())?;
            }
            Message::Reply(_) => {
                warn!(
                    target: ASSISTANT_TARGET,
                    service = self.worker.service_name(),
                    "dropping unexpected reply addressed to a worker"
                );
            }
            Message::Reconnect(_) => {
                debug!(
                    target: ASSISTANT_TARGET,
                    service = self.worker.service_name(),
                    "broker forgot us, registering again"
                );
                self.register()?;
            }
        }
        Ok(())
    }
}

impl<W: Worker> RunLoop for Assistant<W> {
    type Error = AssistantError;

    fn run_once(&mut self) -> Result<(), Self::Error> {
        Assistant::run_once(self)
    }
}

/// Errors that stop an assistant's loop.
#[derive(Debug, Error)]
pub enum AssistantError {
    /// The transport failed underneath the assistant.
    #[error("assistant transport failure: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },
}

#[cfg(test)]
mod tests {
    use dagbox_transport::RouterSocket;
    use dagbox_wire::{Address, Message, Reconnect, Request};

    use super::*;

    const STEP_TIMEOUT: Duration = Duration::from_millis(50);
    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    struct EchoWorker;

    impl Worker for EchoWorker {
        fn service_name(&self) -> &str {
            "echo"
        }

        fn process(&mut self, request: Request) -> Reply {
            Reply::from_request(request)
        }
    }

    /// Test double standing in for the broker: a bare router socket the
    /// test drives by hand.
    struct FakeBroker {
        router: RouterSocket,
    }

    impl FakeBroker {
        fn bind(context: &Context, name: &str) -> Self {
            let router = RouterSocket::bind(context, &Endpoint::inproc(name)).expect("bind");
            Self { router }
        }

        fn endpoint(&self) -> &Endpoint {
            self.router.endpoint()
        }

        fn expect_message(&self) -> (Address, Message) {
            let parts = self
                .router
                .recv_timeout(RECV_TIMEOUT)
                .expect("recv")
                .expect("message before timeout");
            let message = Message::decode(parts).expect("decode");
            let sender = message.address().cloned().expect("sender address");
            (sender, message)
        }

        fn expect_silence(&self) {
            let received = self
                .router
                .recv_timeout(Duration::from_millis(50))
                .expect("recv");
            assert!(received.is_none(), "expected no message from assistant");
        }

        fn send_to(&self, peer: &Address, mut message: Message) {
            message.set_address(peer.clone());
            self.router.send(message.encode()).expect("send");
        }
    }

    #[test]
    fn registers_on_construction() {
        let context = Context::new();
        let broker = FakeBroker::bind(&context, "register");

        let _assistant =
            Assistant::new(&context, broker.endpoint(), STEP_TIMEOUT, EchoWorker).expect("connect");

        let (_, message) = broker.expect_message();
        let Message::Registration(registration) = message else {
            panic!("expected registration, got {message:?}");
        };
        assert_eq!(registration.service(), "echo");
    }

    #[test]
    fn pings_once_per_idle_tick() {
        let context = Context::new();
        let broker = FakeBroker::bind(&context, "heartbeat");
        let mut assistant =
            Assistant::new(&context, broker.endpoint(), STEP_TIMEOUT, EchoWorker).expect("connect");
        let (worker_address, _) = broker.expect_message();

        assistant.run_once().expect("idle step");
        let (_, message) = broker.expect_message();
        assert!(matches!(message, Message::Ping(_)));
        broker.expect_silence();

        // A pong satisfies the probe without provoking anything further.
        broker.send_to(&worker_address, Message::Pong(Pong::from_ping(Ping::new())));
        assistant.run_once().expect("pong step");
        broker.expect_silence();
    }

    #[test]
    fn processes_requests_through_the_worker() {
        let context = Context::new();
        let broker = FakeBroker::bind(&context, "dispatch");
        let mut assistant =
            Assistant::new(&context, broker.endpoint(), STEP_TIMEOUT, EchoWorker).expect("connect");
        let (worker_address, _) = broker.expect_message();

        let mut request = Request::new("echo", vec![b"m".to_vec()], vec![b"payload".to_vec()]);
        request.set_client_address(Address::from(b"client".as_slice()));
        broker.send_to(&worker_address, Message::Request(request));

        assistant.run_once().expect("request step");
        let (_, message) = broker.expect_message();
        let Message::Reply(reply) = message else {
            panic!("expected reply, got {message:?}");
        };
        assert_eq!(reply.client_address().unwrap().as_bytes(), b"client");
        assert_eq!(reply.metadata(), &[b"m".to_vec()]);
        assert_eq!(reply.data(), &[b"payload".to_vec()]);
    }

    #[test]
    fn answers_pings_with_pongs() {
        let context = Context::new();
        let broker = FakeBroker::bind(&context, "probe");
        let mut assistant =
            Assistant::new(&context, broker.endpoint(), STEP_TIMEOUT, EchoWorker).expect("connect");
        let (worker_address, _) = broker.expect_message();

        broker.send_to(&worker_address, Message::Ping(Ping::new()));
        assistant.run_once().expect("ping step");

        let (_, message) = broker.expect_message();
        assert!(matches!(message, Message::Pong(_)));
    }

    #[test]
    fn reconnect_triggers_re_registration() {
        let context = Context::new();
        let broker = FakeBroker::bind(&context, "reconnect");
        let mut assistant =
            Assistant::new(&context, broker.endpoint(), STEP_TIMEOUT, EchoWorker).expect("connect");
        let (worker_address, _) = broker.expect_message();

        broker.send_to(
            &worker_address,
            Message::Reconnect(Reconnect::from_ping(Ping::new())),
        );
        assistant.run_once().expect("reconnect step");

        let (_, message) = broker.expect_message();
        let Message::Registration(registration) = message else {
            panic!("expected registration, got {message:?}");
        };
        assert_eq!(registration.service(), "echo");
    }
}
