//! Dealer socket: connects to a router and exchanges parts verbatim.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

use crate::frame::{read_frame, write_frame, ReadOutcome};
use crate::hub::ExchangeHandle;
use crate::stream::ConnStream;
use crate::{Context, Endpoint, Part, TransportError, TRANSPORT_TARGET};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Socket that attaches to exactly one router.
///
/// Sends transmit parts verbatim; receives return whatever the router
/// delivered, with no routing envelope. The router assigns this peer an
/// address on attach, which is what shows up on the router's side of the
/// conversation.
pub struct DealerSocket {
    endpoint: Endpoint,
    inbox: Receiver<Vec<Part>>,
    backend: DealerBackend,
}

enum DealerBackend {
    Inproc {
        exchange: ExchangeHandle,
        address: Vec<u8>,
    },
    Stream {
        writer: ConnStream,
        shutdown: Arc<AtomicBool>,
        reader_handle: Option<JoinHandle<()>>,
    },
}

impl DealerSocket {
    /// Connects a dealer to the router bound at the given endpoint.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint is unreachable, or for in-process
    /// endpoints, when nothing is bound under the name in this context.
    pub fn connect(context: &Context, endpoint: &Endpoint) -> Result<Self, TransportError> {
        match endpoint {
            Endpoint::Inproc { name } => {
                let exchange = context.hub().lookup(name)?;
                let address = exchange.assign_address();
                let (delivery, inbox) = mpsc::channel();
                exchange
                    .peers
                    .lock()
                    .expect("peer table poisoned")
                    .insert(address.clone(), delivery);
                Ok(Self {
                    endpoint: endpoint.clone(),
                    inbox,
                    backend: DealerBackend::Inproc { exchange, address },
                })
            }
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).map_err(|source| {
                    TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                Self::start_stream(endpoint.clone(), ConnStream::Tcp(stream))
            }
            Endpoint::Ipc { path } => {
                #[cfg(unix)]
                {
                    let stream =
                        UnixStream::connect(path).map_err(|source| TransportError::Connect {
                            endpoint: endpoint.to_string(),
                            source,
                        })?;
                    Self::start_stream(endpoint.clone(), ConnStream::Unix(stream))
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(TransportError::Unsupported {
                        endpoint: endpoint.to_string(),
                    })
                }
            }
        }
    }

    fn start_stream(endpoint: Endpoint, writer: ConnStream) -> Result<Self, TransportError> {
        let reader = writer.try_clone().map_err(TransportError::from)?;
        reader.set_read_timeout(Some(READ_POLL_INTERVAL))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (delivery, inbox) = mpsc::channel();

        let reader_shutdown = Arc::clone(&shutdown);
        let reader_handle = thread::spawn(move || {
            run_reader(reader, delivery, reader_shutdown);
        });

        Ok(Self {
            endpoint,
            inbox,
            backend: DealerBackend::Stream {
                writer,
                shutdown,
                reader_handle: Some(reader_handle),
            },
        })
    }

    /// The endpoint this dealer is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Sends one complete multipart message.
    ///
    /// # Errors
    ///
    /// Fails when the router has gone away or the underlying stream
    /// rejects the write.
    pub fn send(&mut self, parts: Vec<Part>) -> Result<(), TransportError> {
        match &mut self.backend {
            DealerBackend::Inproc { exchange, address } => exchange
                .inbox
                .send((address.clone(), parts))
                .map_err(|_| TransportError::Disconnected),
            DealerBackend::Stream { writer, .. } => {
                write_frame(writer, &parts).map_err(TransportError::from)
            }
        }
    }

    /// Receives one complete multipart message, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses with nothing
    /// delivered.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Disconnected`] once the router's side
    /// of the connection is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<Part>>, TransportError> {
        match self.inbox.recv_timeout(timeout) {
            Ok(parts) => Ok(Some(parts)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

impl Drop for DealerSocket {
    fn drop(&mut self) {
        match &mut self.backend {
            DealerBackend::Inproc { exchange, address } => {
                exchange
                    .peers
                    .lock()
                    .expect("peer table poisoned")
                    .remove(address);
            }
            DealerBackend::Stream {
                writer,
                shutdown,
                reader_handle,
            } => {
                shutdown.store(true, Ordering::SeqCst);
                writer.shutdown();
                if let Some(handle) = reader_handle.take() {
                    if handle.join().is_err() {
                        warn!(
                            target: TRANSPORT_TARGET,
                            endpoint = %self.endpoint,
                            "dealer reader thread panicked during drop"
                        );
                    }
                }
            }
        }
    }
}

fn run_reader(mut reader: ConnStream, delivery: Sender<Vec<Part>>, shutdown: Arc<AtomicBool>) {
    loop {
        match read_frame(&mut reader, &shutdown) {
            Ok(ReadOutcome::Frame(parts)) => {
                if delivery.send(parts).is_err() {
                    break;
                }
            }
            Ok(ReadOutcome::Eof) | Ok(ReadOutcome::Shutdown) => break,
            Err(error) => {
                if !shutdown.load(Ordering::SeqCst) {
                    warn!(target: TRANSPORT_TARGET, %error, "dealer read failure");
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::RouterSocket;

    use super::*;

    #[test]
    fn connect_to_unbound_inproc_name_fails() {
        let context = Context::new();
        let result = DealerSocket::connect(&context, &Endpoint::inproc("nobody-home"));
        assert!(matches!(result, Err(TransportError::NotBound { .. })));
    }

    #[test]
    fn dealer_recv_times_out_when_idle() {
        let context = Context::new();
        let router = RouterSocket::bind(&context, &Endpoint::inproc("quiet")).expect("bind");
        let dealer = DealerSocket::connect(&context, router.endpoint()).expect("connect");
        let received = dealer
            .recv_timeout(Duration::from_millis(20))
            .expect("recv");
        assert!(received.is_none());
    }

    #[test]
    fn dropped_dealer_detaches_from_exchange() {
        let context = Context::new();
        let router = RouterSocket::bind(&context, &Endpoint::inproc("detach")).expect("bind");
        let mut dealer = DealerSocket::connect(&context, router.endpoint()).expect("connect");

        dealer.send(vec![b"ping".to_vec()]).expect("send");
        let message = router
            .recv_timeout(Duration::from_secs(2))
            .expect("recv")
            .expect("message");
        let address = message[0].clone();
        drop(dealer);

        let result = router.send(vec![address, b"pong".to_vec()]);
        assert!(matches!(result, Err(TransportError::Unroutable { .. })));
    }
}
