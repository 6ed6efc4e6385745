//! Persistent key-value store workers over an embedded transactional
//! database.
//!
//! The database is opened once per embedding and shared by reference:
//! exactly one [`StoreWriter`] serialises writes, while any number of
//! [`StoreReader`]s run concurrently on the store's multi-reader
//! transactional isolation.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use dagbox_wire::{Part, Reply, Request};

use crate::worker::Worker;
use crate::workers::WORKERS_TARGET;

const STORE_FILE: &str = "dagbox.redb";
const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

/// Shared handle to the embedded store.
///
/// Clones refer to the same database; hand one to each store worker.
#[derive(Clone)]
pub struct Storage {
    database: Arc<Database>,
}

impl Storage {
    /// Opens (or creates) the store under the given data directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be prepared or the database file
    /// cannot be opened.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|source| StoreError::DataDir {
            path: data_dir.display().to_string(),
            source,
        })?;
        let database = Database::create(data_dir.join(STORE_FILE))?;
        Ok(Self {
            database: Arc::new(database),
        })
    }

    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let transaction = self.database.begin_read()?;
        let table = match transaction.open_table(RECORDS) {
            Ok(table) => table,
            // Nothing has been written yet; every key is absent.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let value = table.get(key.as_bytes())?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn store(&self, records: &[Option<WriteRecord>]) -> Result<(), StoreError> {
        let transaction = self.database.begin_write()?;
        {
            let mut table = transaction.open_table(RECORDS)?;
            for record in records.iter().flatten() {
                table.insert(record.key.as_bytes(), record.value.as_slice())?;
            }
        }
        transaction.commit()?;
        Ok(())
    }
}

/// One lookup in a read request.
#[derive(Debug, Serialize, Deserialize)]
struct ReadRecord {
    key: String,
}

/// Response to one lookup. `value` is absent when the key is unknown or
/// the record could not be processed.
#[derive(Debug, Serialize, Deserialize)]
struct ReadResponse {
    key: String,
    value: Option<Vec<u8>>,
}

/// One upsert in a write request.
#[derive(Debug, Serialize, Deserialize)]
struct WriteRecord {
    key: String,
    value: Vec<u8>,
}

/// Worker answering lookups against the shared store.
pub struct StoreReader {
    storage: Storage,
}

impl StoreReader {
    /// Service name readers register under.
    pub const SERVICE: &'static str = "store-read";

    /// Creates a reader over the shared store.
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn read_record(&self, part: &[u8]) -> Vec<u8> {
        let record: ReadRecord = match rmp_serde::from_slice(part) {
            Ok(record) => record,
            Err(error) => {
                warn!(target: WORKERS_TARGET, %error, "undecodable read record");
                return encode_record(&ReadResponse {
                    key: String::new(),
                    value: None,
                });
            }
        };
        let value = match self.storage.fetch(&record.key) {
            Ok(value) => value,
            Err(error) => {
                warn!(target: WORKERS_TARGET, key = %record.key, %error, "store lookup failed");
                None
            }
        };
        encode_record(&ReadResponse {
            key: record.key,
            value,
        })
    }
}

impl Worker for StoreReader {
    fn service_name(&self) -> &str {
        Self::SERVICE
    }

    fn process(&mut self, mut request: Request) -> Reply {
        for part in request.data_mut() {
            *part = self.read_record(part);
        }
        Reply::from_request(request)
    }
}

/// Worker applying upserts to the shared store.
///
/// Run exactly one writer per store; the database serialises writers, so
/// a second one would only queue behind the first.
pub struct StoreWriter {
    storage: Storage,
}

impl StoreWriter {
    /// Service name the writer registers under.
    pub const SERVICE: &'static str = "store-write";

    /// Creates the writer over the shared store.
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl Worker for StoreWriter {
    fn service_name(&self) -> &str {
        Self::SERVICE
    }

    fn process(&mut self, mut request: Request) -> Reply {
        let records: Vec<Option<WriteRecord>> = request
            .data()
            .iter()
            .map(|part| match rmp_serde::from_slice(part) {
                Ok(record) => Some(record),
                Err(error) => {
                    warn!(target: WORKERS_TARGET, %error, "undecodable write record");
                    None
                }
            })
            .collect();

        // The batch commits as one transaction; a commit failure fails
        // every record in it.
        let committed = match self.storage.store(&records) {
            Ok(()) => true,
            Err(error) => {
                warn!(target: WORKERS_TARGET, %error, "store write failed");
                false
            }
        };

        for (part, record) in request.data_mut().iter_mut().zip(&records) {
            let status = committed && record.is_some();
            *part = encode_record(&status);
        }
        Reply::from_request(request)
    }
}

fn encode_record<T: Serialize>(value: &T) -> Vec<u8> {
    match rmp_serde::to_vec_named(value) {
        Ok(encoded) => encoded,
        Err(error) => {
            warn!(target: WORKERS_TARGET, %error, "failed to encode response record");
            Vec::new()
        }
    }
}

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The data directory could not be prepared.
    #[error("failed to prepare data directory '{path}': {source}")]
    DataDir {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The database file could not be opened.
    #[error("failed to open store database: {0}")]
    Open(#[from] redb::DatabaseError),
    /// A transaction could not be started.
    #[error("store transaction failed: {0}")]
    Transaction(#[from] redb::TransactionError),
    /// The records table could not be opened.
    #[error("store table access failed: {0}")]
    Table(#[from] redb::TableError),
    /// A read or write inside a transaction failed.
    #[error("store operation failed: {0}")]
    Storage(#[from] redb::StorageError),
    /// A write transaction failed to commit.
    #[error("store commit failed: {0}")]
    Commit(#[from] redb::CommitError),
}
