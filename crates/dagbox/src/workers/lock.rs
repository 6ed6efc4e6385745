//! In-memory advisory lock worker.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use dagbox_wire::{Reply, Request};

use crate::worker::Worker;
use crate::workers::WORKERS_TARGET;

/// One lock operation: take the key when `lock` is true, release it
/// otherwise.
#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    key: String,
    lock: bool,
}

/// Advisory lock service over a plain in-memory set.
///
/// Each record's response is a boolean: whether the lock was taken (the
/// key was previously free) or released (the key was previously held).
/// Locks are advisory and volatile; they do not survive the worker.
#[derive(Debug, Default)]
pub struct LockWorker {
    locks: HashSet<String>,
}

impl LockWorker {
    /// Service name the lock worker registers under.
    pub const SERVICE: &'static str = "lock";

    /// Creates a lock worker with no locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&mut self, part: &[u8]) -> bool {
        let record: LockRecord = match rmp_serde::from_slice(part) {
            Ok(record) => record,
            Err(error) => {
                warn!(target: WORKERS_TARGET, %error, "undecodable lock record");
                return false;
            }
        };
        if record.lock {
            self.locks.insert(record.key)
        } else {
            self.locks.remove(&record.key)
        }
    }
}

impl Worker for LockWorker {
    fn service_name(&self) -> &str {
        Self::SERVICE
    }

    fn process(&mut self, mut request: Request) -> Reply {
        for part in request.data_mut() {
            let status = self.apply(part);
            *part = rmp_serde::to_vec(&status).unwrap_or_default();
        }
        Reply::from_request(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_request(operations: &[(&str, bool)]) -> Request {
        let data = operations
            .iter()
            .map(|(key, lock)| {
                rmp_serde::to_vec_named(&LockRecord {
                    key: (*key).to_string(),
                    lock: *lock,
                })
                .expect("encode record")
            })
            .collect();
        Request::new(LockWorker::SERVICE, vec![], data)
    }

    fn statuses(reply: &Reply) -> Vec<bool> {
        reply
            .data()
            .iter()
            .map(|part| rmp_serde::from_slice(part).expect("decode status"))
            .collect()
    }

    #[test]
    fn first_lock_wins_second_loses() {
        let mut worker = LockWorker::new();
        let reply = worker.process(lock_request(&[("job-7", true), ("job-7", true)]));
        assert_eq!(statuses(&reply), vec![true, false]);
    }

    #[test]
    fn unlock_releases_a_held_key() {
        let mut worker = LockWorker::new();
        worker.process(lock_request(&[("job-7", true)]));
        let reply = worker.process(lock_request(&[("job-7", false), ("job-7", false)]));
        assert_eq!(statuses(&reply), vec![true, false]);
    }

    #[test]
    fn unlocking_a_free_key_reports_failure() {
        let mut worker = LockWorker::new();
        let reply = worker.process(lock_request(&[("never-held", false)]));
        assert_eq!(statuses(&reply), vec![false]);
    }

    #[test]
    fn undecodable_record_reports_failure() {
        let mut worker = LockWorker::new();
        let request = Request::new(LockWorker::SERVICE, vec![], vec![b"junk".to_vec()]);
        let reply = worker.process(request);
        assert_eq!(statuses(&reply), vec![false]);
    }

    #[test]
    fn keys_are_independent() {
        let mut worker = LockWorker::new();
        let reply = worker.process(lock_request(&[("a", true), ("b", true), ("a", false)]));
        assert_eq!(statuses(&reply), vec![true, true, true]);
    }
}
