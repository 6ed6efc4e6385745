//! Router socket: binds an endpoint and routes messages by peer address.

use std::collections::HashMap;
use std::io;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

use crate::frame::{read_frame, write_frame, ReadOutcome};
use crate::hub::{next_address, PeerTable, RoutedMessage};
use crate::stream::ConnStream;
use crate::{Context, Endpoint, Part, TransportError, TRANSPORT_TARGET};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Socket that binds an endpoint and talks to many attached peers.
///
/// Receives carry the sender's transport address as the first part; sends
/// treat the first part as the routing target and strip it before
/// delivery. Addresses are assigned when a peer attaches and stay stable
/// for that peer's connection.
pub struct RouterSocket {
    context: Context,
    endpoint: Endpoint,
    inbox: Receiver<RoutedMessage>,
    backend: Backend,
}

enum Backend {
    Inproc { name: String, peers: PeerTable },
    Stream(StreamRouter),
}

struct StreamRouter {
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    peers: Arc<Mutex<HashMap<Vec<u8>, ConnStream>>>,
    #[cfg_attr(not(unix), allow(dead_code))]
    ipc_path: Option<PathBuf>,
}

impl RouterSocket {
    /// Binds a router to the given endpoint.
    ///
    /// For TCP endpoints a port of `0` binds an ephemeral port; the
    /// effective endpoint is available through [`RouterSocket::endpoint`].
    ///
    /// # Errors
    ///
    /// Fails when the endpoint cannot be bound, or when an in-process
    /// name is already bound in this context.
    pub fn bind(context: &Context, endpoint: &Endpoint) -> Result<Self, TransportError> {
        match endpoint {
            Endpoint::Inproc { name } => {
                let (handle, inbox) = context.hub().bind(name)?;
                Ok(Self {
                    context: context.clone(),
                    endpoint: endpoint.clone(),
                    inbox,
                    backend: Backend::Inproc {
                        name: name.clone(),
                        peers: handle.peers,
                    },
                })
            }
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).map_err(|source| {
                    TransportError::Bind {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                let effective = match listener.local_addr() {
                    Ok(addr) => Endpoint::tcp(host.clone(), addr.port()),
                    Err(_) => endpoint.clone(),
                };
                Self::start_stream(context, effective, ListenerKind::Tcp(listener), None)
            }
            Endpoint::Ipc { path } => {
                #[cfg(unix)]
                {
                    endpoint
                        .prepare_filesystem()
                        .map_err(|source| TransportError::Bind {
                            endpoint: endpoint.to_string(),
                            source: io::Error::new(io::ErrorKind::Other, source.to_string()),
                        })?;
                    let listener = bind_unix(path, endpoint)?;
                    Self::start_stream(
                        context,
                        endpoint.clone(),
                        ListenerKind::Unix(listener),
                        Some(path.clone()),
                    )
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

    fn start_stream(
        context: &Context,
        endpoint: Endpoint,
        listener: ListenerKind,
        ipc_path: Option<PathBuf>,
    ) -> Result<Self, TransportError> {
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let peers = Arc::new(Mutex::new(HashMap::new()));
        let (inbox_tx, inbox) = mpsc::channel();

        let accept_shutdown = Arc::clone(&shutdown);
        let accept_peers = Arc::clone(&peers);
        let accept_handle = thread::spawn(move || {
            run_accept_loop(listener, accept_shutdown, accept_peers, inbox_tx);
        });

        Ok(Self {
            context: context.clone(),
            endpoint,
            inbox,
            backend: Backend::Stream(StreamRouter {
                shutdown,
                accept_handle: Some(accept_handle),
                peers,
                ipc_path,
            }),
        })
    }

    /// The endpoint this router is bound to, with any ephemeral TCP port
    /// resolved.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Receives one complete multipart message, waiting at most `timeout`.
    ///
    /// The sender's transport address is prepended as the first part.
    /// Returns `Ok(None)` when the timeout elapses with nothing to
    /// deliver.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Disconnected`] when the socket's
    /// receive machinery has gone away.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<Part>>, TransportError> {
        match self.inbox.recv_timeout(timeout) {
            Ok((address, parts)) => {
                let mut message = Vec::with_capacity(parts.len() + 1);
                message.push(address);
                message.extend(parts);
                Ok(Some(message))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    /// Sends a routed message.
    ///
    /// The first part names the target peer and is stripped before
    /// delivery; the remaining parts reach the peer verbatim.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::MissingTarget`] when the first part is
    /// missing or empty, and [`TransportError::Unroutable`] when the
    /// target is unknown or has disconnected.
    pub fn send(&self, mut parts: Vec<Part>) -> Result<(), TransportError> {
        if parts.first().map_or(true, Vec::is_empty) {
            return Err(TransportError::MissingTarget);
        }
        let target = parts.remove(0);

        match &self.backend {
            Backend::Inproc { peers, .. } => {
                let mut table = peers.lock().expect("peer table poisoned");
                let Some(delivery) = table.get(&target) else {
                    return Err(unroutable(&target));
                };
                if delivery.send(parts).is_err() {
                    table.remove(&target);
                    return Err(unroutable(&target));
                }
                Ok(())
            }
            Backend::Stream(router) => {
                let mut table = router.peers.lock().expect("peer table poisoned");
                let Some(stream) = table.get_mut(&target) else {
                    return Err(unroutable(&target));
                };
                if let Err(error) = write_frame(stream, &parts) {
                    warn!(
                        target: TRANSPORT_TARGET,
                        peer = %hex(&target),
                        %error,
                        "dropping unwritable peer"
                    );
                    table.remove(&target);
                    return Err(unroutable(&target));
                }
                Ok(())
            }
        }
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        match &mut self.backend {
            Backend::Inproc { name, .. } => {
                self.context.hub().unbind(name);
            }
            Backend::Stream(router) => {
                router.shutdown.store(true, Ordering::SeqCst);
                // Closing the writer halves unblocks reader threads parked
                // mid-read on duplicate handles.
                for (_, stream) in router.peers.lock().expect("peer table poisoned").drain() {
                    stream.shutdown();
                }
                if let Some(handle) = router.accept_handle.take() {
                    if handle.join().is_err() {
                        warn!(
                            target: TRANSPORT_TARGET,
                            "router accept thread panicked during drop"
                        );
                    }
                }
                #[cfg(unix)]
                if let Some(path) = &router.ipc_path {
                    if let Err(error) = fs::remove_file(path) {
                        if error.kind() != io::ErrorKind::NotFound {
                            warn!(
                                target: TRANSPORT_TARGET,
                                %error,
                                path = %path.display(),
                                "failed to remove ipc socket file"
                            );
                        }
                    }
                }
            }
        }
    }
}

enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl ListenerKind {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(nonblocking),
        }
    }

    fn accept(&self) -> io::Result<Option<ConnStream>> {
        match self {
            Self::Tcp(listener) => match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    Ok(Some(ConnStream::Tcp(stream)))
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(error) => Err(error),
            },
            #[cfg(unix)]
            Self::Unix(listener) => match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    Ok(Some(ConnStream::Unix(stream)))
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(error) => Err(error),
            },
        }
    }
}

fn run_accept_loop(
    listener: ListenerKind,
    shutdown: Arc<AtomicBool>,
    peers: Arc<Mutex<HashMap<Vec<u8>, ConnStream>>>,
    inbox: Sender<RoutedMessage>,
) {
    let counter = AtomicU64::new(1);
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok(Some(stream)) => {
                last_error = None;
                if let Err(error) =
                    attach_peer(stream, &counter, &peers, &inbox, &shutdown)
                {
                    warn!(
                        target: TRANSPORT_TARGET,
                        %error,
                        "failed to attach peer"
                    );
                }
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: TRANSPORT_TARGET,
                        %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

fn attach_peer(
    stream: ConnStream,
    counter: &AtomicU64,
    peers: &Arc<Mutex<HashMap<Vec<u8>, ConnStream>>>,
    inbox: &Sender<RoutedMessage>,
    shutdown: &Arc<AtomicBool>,
) -> io::Result<()> {
    let address = next_address(counter);
    let reader = stream.try_clone()?;
    reader.set_read_timeout(Some(READ_POLL_INTERVAL))?;
    peers
        .lock()
        .expect("peer table poisoned")
        .insert(address.clone(), stream);

    let peers = Arc::clone(peers);
    let inbox = inbox.clone();
    let shutdown = Arc::clone(shutdown);
    thread::spawn(move || {
        run_peer_reader(reader, address, peers, inbox, shutdown);
    });
    Ok(())
}

fn run_peer_reader(
    mut reader: ConnStream,
    address: Vec<u8>,
    peers: Arc<Mutex<HashMap<Vec<u8>, ConnStream>>>,
    inbox: Sender<RoutedMessage>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        match read_frame(&mut reader, &shutdown) {
            Ok(ReadOutcome::Frame(parts)) => {
                if inbox.send((address.clone(), parts)).is_err() {
                    break;
                }
            }
            Ok(ReadOutcome::Eof) | Ok(ReadOutcome::Shutdown) => break,
            Err(error) => {
                warn!(
                    target: TRANSPORT_TARGET,
                    peer = %hex(&address),
                    %error,
                    "dropping peer after read failure"
                );
                break;
            }
        }
    }
    peers
        .lock()
        .expect("peer table poisoned")
        .remove(&address);
}

#[cfg(unix)]
fn bind_unix(path: &Path, endpoint: &Endpoint) -> Result<UnixListener, TransportError> {
    // A socket file left behind by a dead process would make the bind
    // fail; probe it and clear it when nothing answers.
    if path.exists() {
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(TransportError::Bind {
                    endpoint: endpoint.to_string(),
                    source: io::Error::new(io::ErrorKind::AddrInUse, "socket is already in use"),
                });
            }
            Err(error)
                if error.kind() == io::ErrorKind::ConnectionRefused
                    || error.kind() == io::ErrorKind::NotFound =>
            {
                fs::remove_file(path).map_err(|source| TransportError::Bind {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(TransportError::Bind {
                    endpoint: endpoint.to_string(),
                    source,
                });
            }
        }
    }

    UnixListener::bind(path).map_err(|source| TransportError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })
}

fn unroutable(address: &[u8]) -> TransportError {
    TransportError::Unroutable {
        address: hex(address),
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut rendered = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(rendered, "{byte:02x}");
    }
    rendered
}
