//! In-process exchange registry.
//!
//! Each bound in-process router owns an exchange: an inbox channel that
//! dealers push into, and a peer table mapping assigned addresses to the
//! delivery channels of attached dealers. The registry lives in the
//! [`Context`](crate::Context) so binds and connects in one process find
//! each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::{Part, TransportError};

/// A routed inbound message: sender address plus its parts.
pub(crate) type RoutedMessage = (Vec<u8>, Vec<Part>);

/// Peer table shared between an exchange and its router.
pub(crate) type PeerTable = Arc<Mutex<HashMap<Vec<u8>, Sender<Vec<Part>>>>>;

/// Shared handle to one bound exchange.
#[derive(Clone)]
pub(crate) struct ExchangeHandle {
    pub(crate) inbox: Sender<RoutedMessage>,
    pub(crate) peers: PeerTable,
    next_address: Arc<AtomicU64>,
}

impl ExchangeHandle {
    /// Assigns the next peer address for this exchange.
    pub(crate) fn assign_address(&self) -> Vec<u8> {
        next_address(&self.next_address)
    }
}

/// Yields transport addresses from a per-socket counter.
pub(crate) fn next_address(counter: &AtomicU64) -> Vec<u8> {
    let assigned = counter.fetch_add(1, Ordering::SeqCst);
    assigned.to_be_bytes().to_vec()
}

/// Registry of bound in-process exchanges.
#[derive(Default)]
pub(crate) struct Hub {
    bindings: Mutex<HashMap<String, ExchangeHandle>>,
}

impl Hub {
    /// Binds a new exchange under the given name.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::AlreadyBound`] when the name is taken.
    pub(crate) fn bind(
        &self,
        name: &str,
    ) -> Result<(ExchangeHandle, Receiver<RoutedMessage>), TransportError> {
        let mut bindings = self.bindings.lock().expect("hub registry poisoned");
        if bindings.contains_key(name) {
            return Err(TransportError::AlreadyBound {
                name: name.to_string(),
            });
        }

        let (inbox, receiver) = mpsc::channel();
        let handle = ExchangeHandle {
            inbox,
            peers: Arc::new(Mutex::new(HashMap::new())),
            next_address: Arc::new(AtomicU64::new(1)),
        };
        bindings.insert(name.to_string(), handle.clone());
        Ok((handle, receiver))
    }

    /// Finds the exchange bound under the given name.
    pub(crate) fn lookup(&self, name: &str) -> Result<ExchangeHandle, TransportError> {
        self.bindings
            .lock()
            .expect("hub registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::NotBound {
                name: name.to_string(),
            })
    }

    /// Releases a binding when its router is dropped.
    pub(crate) fn unbind(&self, name: &str) {
        self.bindings
            .lock()
            .expect("hub registry poisoned")
            .remove(name);
    }
}
