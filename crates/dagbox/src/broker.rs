//! The message broker: routes requests to free workers and fans replies
//! back to the clients that sent them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use dagbox_transport::{Context, Endpoint, RouterSocket, TransportError};
use dagbox_wire::{Address, Message, Ping, Pong, Reconnect, Registration, Reply, Request};

use crate::component::RunLoop;

const BROKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::broker");

/// Directory entry for a registered worker.
struct WorkerEntry {
    service: String,
    last_seen: Instant,
}

/// Stateful routing engine at the centre of the bus.
///
/// The broker binds a router socket and processes one inbound message per
/// [`Broker::run_once`] step. All routing state — the worker directory,
/// the free-worker pools, the pending-request queues, and the outbound
/// send queue — is owned exclusively by the broker's thread; other
/// components talk to it only through the transport.
///
/// Dead workers are detected lazily: a worker's staleness is evaluated
/// when it comes up for selection, not by a background scan. A request
/// dispatched to a worker that dies afterwards is lost; clients are
/// expected to time out and resubmit.
pub struct Broker {
    socket: RouterSocket,
    worker_timeout: Duration,
    poll_timeout: Duration,
    workers: HashMap<Address, WorkerEntry>,
    free_workers: HashMap<String, HashSet<Address>>,
    pending_requests: HashMap<String, VecDeque<Request>>,
    send_queue: VecDeque<Message>,
}

impl Broker {
    /// Binds a broker to the given endpoint.
    ///
    /// `worker_timeout` is the liveness window: a worker silent for this
    /// long is evicted when it next comes up for selection. The embedding
    /// layer adds its transport-delay allowance before passing the value
    /// here. `poll_timeout` bounds each receive so the loop stays
    /// responsive to shutdown even when the bus is idle.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint cannot be bound.
    pub fn new(
        context: &Context,
        endpoint: &Endpoint,
        worker_timeout: Duration,
        poll_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let socket = RouterSocket::bind(context, endpoint)?;
        Ok(Self {
            socket,
            worker_timeout,
            poll_timeout,
            workers: HashMap::new(),
            free_workers: HashMap::new(),
            pending_requests: HashMap::new(),
            send_queue: VecDeque::new(),
        })
    }

    /// The endpoint the broker is reachable at, with any ephemeral TCP
    /// port resolved.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.socket.endpoint()
    }

    /// Processes at most one inbound message, then transmits everything
    /// the handlers queued.
    ///
    /// A receive timeout is a no-op: the send queue is already empty.
    /// Malformed input is logged and skipped; the loop continues.
    ///
    /// # Errors
    ///
    /// Fails on transport breakdown, or fatally when a received message
    /// carries no sender address — the transport guarantees one, so its
    /// absence is a programmer error.
    pub fn run_once(&mut self) -> Result<(), BrokerError> {
        let Some(parts) = self.socket.recv_timeout(self.poll_timeout)? else {
            return Ok(());
        };

        let message = match Message::decode(parts) {
            Ok(message) => message,
            Err(error) => {
                warn!(target: BROKER_TARGET, %error, "dropping undecodable message");
                return Ok(());
            }
        };
        let Some(sender) = message.address().cloned() else {
            return Err(BrokerError::MissingSender);
        };

        match message {
            Message::Registration(registration) => self.handle_registration(sender, registration),
            Message::Ping(ping) => self.handle_ping(sender, ping),
            Message::Pong(_) => self.handle_pong(sender),
            Message::Request(request) => self.handle_request(sender, request),
            Message::Reply(reply) => self.handle_reply(sender, reply),
            Message::Reconnect(_) => {
                warn!(
                    target: BROKER_TARGET,
                    peer = %sender,
                    "dropping reconnect; that kind only travels broker to worker"
                );
            }
        }

        self.drain_send_queue();
        Ok(())
    }

    /// Registers (or re-registers) the sender for the declared service,
    /// echoes the registration back as an acknowledgment, and frees the
    /// worker.
    fn handle_registration(&mut self, sender: Address, registration: Registration) {
        debug!(
            target: BROKER_TARGET,
            worker = %sender,
            service = registration.service(),
            "worker registered"
        );
        self.workers.insert(
            sender.clone(),
            WorkerEntry {
                service: registration.service().to_string(),
                last_seen: Instant::now(),
            },
        );
        self.send_queue.push_back(Message::Registration(registration));
        self.free_worker(sender);
    }

    /// Answers a known worker's ping with a pong; an unknown peer gets a
    /// reconnect notice, since it believes it is registered and we have
    /// no record of it.
    fn handle_ping(&mut self, sender: Address, ping: Ping) {
        match self.workers.get_mut(&sender) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                self.send_queue.push_back(Message::Pong(Pong::from_ping(ping)));
            }
            None => {
                debug!(
                    target: BROKER_TARGET,
                    peer = %sender,
                    "ping from unknown peer, asking it to reconnect"
                );
                self.send_queue
                    .push_back(Message::Reconnect(Reconnect::from_ping(ping)));
            }
        }
    }

    /// Records a sign of life. Pongs from peers we have no record of are
    /// ignored.
    fn handle_pong(&mut self, sender: Address) {
        if let Some(entry) = self.workers.get_mut(&sender) {
            entry.last_seen = Instant::now();
        }
    }

    /// Routes a request to a free worker for its service, or queues it.
    fn handle_request(&mut self, sender: Address, mut request: Request) {
        if request.client_address().is_none() {
            // Fresh from a client; remember where the reply must go.
            request.set_client_address(sender.clone());
        }
        if self.workers.contains_key(&sender) {
            // A worker submitting a request of its own is done with the
            // one it was carrying.
            self.free_worker(sender);
        }

        let service = request.service().to_string();
        match self.get_worker(&service) {
            Some(worker) => {
                let mut message = Message::Request(request);
                message.set_address(worker);
                self.send_queue.push_back(message);
            }
            None => {
                if self.has_workers_for(&service) {
                    self.pending_requests
                        .entry(service)
                        .or_default()
                        .push_back(request);
                } else {
                    warn!(
                        target: BROKER_TARGET,
                        service = %service,
                        "no workers registered for service, dropping request"
                    );
                }
            }
        }
    }

    /// Frees the replying worker and forwards the reply to the client
    /// recorded inside it.
    fn handle_reply(&mut self, sender: Address, reply: Reply) {
        if let Some(entry) = self.workers.get_mut(&sender) {
            entry.last_seen = Instant::now();
        }
        self.free_worker(sender);

        let Some(client) = reply.client_address().cloned() else {
            warn!(
                target: BROKER_TARGET,
                "dropping reply that carries no client address"
            );
            return;
        };
        let mut message = Message::Reply(reply);
        message.set_address(client);
        self.send_queue.push_back(message);
    }

    /// Puts a worker back into circulation: hands it the oldest pending
    /// request for its service when one is waiting, otherwise returns it
    /// to the free pool.
    fn free_worker(&mut self, address: Address) {
        let Some(entry) = self.workers.get(&address) else {
            return;
        };
        let service = entry.service.clone();

        if let Some(queue) = self.pending_requests.get_mut(&service) {
            if let Some(request) = queue.pop_front() {
                let mut message = Message::Request(request);
                message.set_address(address);
                self.send_queue.push_back(message);
                return;
            }
        }
        self.free_workers.entry(service).or_default().insert(address);
    }

    /// Selects a free worker for the service, evicting stale entries on
    /// the way. Selection order among free workers is arbitrary.
    fn get_worker(&mut self, service: &str) -> Option<Address> {
        let available = self.free_workers.get_mut(service)?;
        loop {
            let address = available.iter().next()?.clone();
            available.remove(&address);

            let Some(entry) = self.workers.get(&address) else {
                continue;
            };
            if entry.last_seen.elapsed() >= self.worker_timeout {
                debug!(
                    target: BROKER_TARGET,
                    worker = %address,
                    service = %service,
                    "evicting worker that exceeded its liveness window"
                );
                self.workers.remove(&address);
                continue;
            }
            return Some(address);
        }
    }

    fn has_workers_for(&self, service: &str) -> bool {
        self.workers.values().any(|entry| entry.service == service)
    }

    /// Transmits every queued outbound message, in enqueue order.
    ///
    /// Routing failures mean the peer vanished between enqueue and send;
    /// the message is dropped, consistent with at-most-once delivery.
    fn drain_send_queue(&mut self) {
        while let Some(message) = self.send_queue.pop_front() {
            if let Err(error) = self.socket.send(message.encode()) {
                warn!(
                    target: BROKER_TARGET,
                    %error,
                    "dropping undeliverable outbound message"
                );
            }
        }
    }
}

impl RunLoop for Broker {
    type Error = BrokerError;

    fn run_once(&mut self) -> Result<(), Self::Error> {
        Broker::run_once(self)
    }
}

/// Errors that stop the broker's loop.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The transport failed underneath the broker.
    #[error("broker transport failure: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },
    /// A received message carried no sender address. The transport
    /// guarantees one, so this is an invariant violation.
    #[error("received a message without a sender address")]
    MissingSender,
}
