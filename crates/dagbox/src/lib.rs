//! DagBox: an embeddable multi-worker service bus.
//!
//! Clients submit service requests to a central broker over a multipart
//! message transport. The broker routes each request to a free worker
//! registered for that service, receives the worker's reply, and fans it
//! back to the originating client. A per-worker [`Assistant`] handles the
//! protocol — registration, heartbeats, reconnection — so a worker
//! implementation only processes requests.
//!
//! Built-in workers cover a persistent key-value store (one writer, a pool
//! of readers over an embedded transactional database) and an in-memory
//! advisory lock service.
//!
//! # Embedding
//!
//! [`DagBox`] owns a whole instance: the broker, the store workers, and
//! the lock worker, each on its own thread, all wired over the transport
//! selected in [`Settings`](dagbox_config::Settings).
//!
//! ```no_run
//! use dagbox::{Client, DagBox};
//! use dagbox_config::Settings;
//! use dagbox_wire::Request;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = DagBox::open(Settings::new("/var/lib/dagbox"))?;
//! let mut client = Client::connect(bus.context(), bus.address())?;
//! let reply = client.request(
//!     Request::new("lock", vec![], vec![/* msgpack records */]),
//!     Duration::from_secs(1),
//! )?;
//! # drop(reply);
//! # Ok(())
//! # }
//! ```
//!
//! Custom workers implement [`Worker`] and run under their own
//! [`Assistant`], spawned with [`Component::spawn`]; anything able to
//! reach the broker's endpoint can join the bus.

mod assistant;
mod broker;
mod client;
mod component;
mod embed;
mod telemetry;
mod worker;
pub mod workers;

pub use assistant::{Assistant, AssistantError};
pub use broker::{Broker, BrokerError};
pub use client::{Client, ClientError};
pub use component::{Component, ComponentError, RunLoop};
pub use embed::{DagBox, DagBoxError};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use worker::Worker;
