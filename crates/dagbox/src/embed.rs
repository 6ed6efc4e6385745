//! Embedding API: owns a whole DagBox instance.

use std::time::Duration;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use dagbox_config::{Settings, SettingsError, TransportKind};
use dagbox_transport::{Context, Endpoint};

use crate::assistant::{Assistant, AssistantError};
use crate::broker::{Broker, BrokerError};
use crate::component::{Component, ComponentError};
use crate::workers::{LockWorker, Storage, StoreError, StoreReader, StoreWriter};

const EMBED_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::embed");

/// An embedded DagBox instance: the broker plus the built-in workers,
/// each on its own component thread.
///
/// Dropping the instance stops and joins every component. Pending
/// requests queued inside the broker are discarded on shutdown.
pub struct DagBox {
    // Components are listed workers-first so they stop before the broker
    // during drop.
    readers: Vec<Component>,
    _lock: Component,
    _writer: Component,
    _broker: Component,
    context: Context,
    endpoint: Endpoint,
    worker_timeout: Duration,
    storage: Storage,
}

impl DagBox {
    /// Starts a DagBox instance from the given settings.
    ///
    /// The broker binds first; its effective endpoint (with any ephemeral
    /// TCP port resolved) is what workers connect to and what
    /// [`DagBox::address`] reports. One store writer, one lock worker,
    /// and `settings.reader_count` store readers are started.
    ///
    /// # Errors
    ///
    /// Fails when the settings are invalid, the endpoint cannot be bound,
    /// the store cannot be opened, or any component fails to start.
    pub fn open(settings: Settings) -> Result<Self, DagBoxError> {
        settings.validate()?;

        let context = Context::new();
        let requested = form_endpoint(&settings)?;
        let broker = Broker::new(
            &context,
            &requested,
            settings.broker_timeout(),
            settings.poll_timeout,
        )?;
        let endpoint = broker.endpoint().clone();
        info!(target: EMBED_TARGET, address = %endpoint, "dagbox broker bound");

        let storage = Storage::open(settings.data_dir.as_std_path())?;

        let broker = Component::spawn("broker", broker)?;
        let writer = Component::spawn(
            "store-writer",
            Assistant::new(
                &context,
                &endpoint,
                settings.worker_timeout,
                StoreWriter::new(storage.clone()),
            )?,
        )?;
        let lock = Component::spawn(
            "lock",
            Assistant::new(&context, &endpoint, settings.worker_timeout, LockWorker::new())?,
        )?;

        let mut instance = Self {
            readers: Vec::new(),
            _lock: lock,
            _writer: writer,
            _broker: broker,
            context,
            endpoint,
            worker_timeout: settings.worker_timeout,
            storage,
        };
        instance.reader_add(settings.reader_count)?;
        Ok(instance)
    }

    /// The broker's effective address. Clients and externally-started
    /// workers connect here.
    #[must_use]
    pub fn address(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The messaging context this instance runs on. In-process clients
    /// must be created from it.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Starts `count` more store readers.
    ///
    /// # Errors
    ///
    /// Fails when a reader cannot connect or its component cannot spawn.
    pub fn reader_add(&mut self, count: usize) -> Result<(), DagBoxError> {
        for _ in 0..count {
            let assistant = Assistant::new(
                &self.context,
                &self.endpoint,
                self.worker_timeout,
                StoreReader::new(self.storage.clone()),
            )?;
            let name = format!("store-reader-{}", self.readers.len());
            self.readers.push(Component::spawn(name, assistant)?);
        }
        Ok(())
    }

    /// Stops up to `count` store readers, most recently created first.
    pub fn reader_remove(&mut self, count: usize) {
        for _ in 0..count {
            if self.readers.pop().is_none() {
                break;
            }
        }
    }

    /// Number of store readers currently running.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }
}

/// Forms the broker endpoint from the settings, generating a unique name
/// when no explicit address is given.
fn form_endpoint(settings: &Settings) -> Result<Endpoint, DagBoxError> {
    match settings.transport {
        TransportKind::Inprocess => {
            let name = settings
                .broker_address
                .clone()
                .unwrap_or_else(unique_name);
            Ok(Endpoint::inproc(name))
        }
        TransportKind::Ipc => {
            let name = settings
                .broker_address
                .clone()
                .unwrap_or_else(unique_name);
            let path = settings.data_dir.as_std_path().join(format!("{name}.sock"));
            Ok(Endpoint::ipc(path))
        }
        TransportKind::Tcp => match &settings.broker_address {
            // Ephemeral port by default; the effective address is
            // queryable once the broker is bound.
            None => Ok(Endpoint::tcp("127.0.0.1", 0)),
            Some(address) => {
                let (host, port) = address
                    .rsplit_once(':')
                    .ok_or_else(|| DagBoxError::InvalidBrokerAddress {
                        address: address.clone(),
                    })?;
                let port = port
                    .parse()
                    .map_err(|_| DagBoxError::InvalidBrokerAddress {
                        address: address.clone(),
                    })?;
                Ok(Endpoint::tcp(host, port))
            }
        },
    }
}

fn unique_name() -> String {
    format!("dagbox-{}", Uuid::new_v4())
}

/// Errors surfaced while starting or resizing an instance.
#[derive(Debug, Error)]
pub enum DagBoxError {
    /// The settings failed validation.
    #[error("invalid settings: {source}")]
    Settings {
        #[from]
        source: SettingsError,
    },
    /// The explicit TCP broker address is not `host:port`.
    #[error("invalid broker address '{address}', expected host:port")]
    InvalidBrokerAddress { address: String },
    /// The broker could not start.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// A worker assistant could not start.
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    /// The store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A component thread could not be spawned.
    #[error(transparent)]
    Component(#[from] ComponentError),
}
