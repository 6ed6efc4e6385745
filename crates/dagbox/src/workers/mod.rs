//! Built-in workers: the persistent key-value store and the advisory
//! lock service.
//!
//! Both speak msgpack record payloads: every data part of a request is one
//! encoded record, transformed in place into its response, and the request
//! is repackaged as the reply. Record shapes are documented per worker.

mod lock;
mod store;

pub use lock::LockWorker;
pub use store::{Storage, StoreError, StoreReader, StoreWriter};

pub(crate) const WORKERS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::workers");
