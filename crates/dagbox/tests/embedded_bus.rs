//! End-to-end coverage of the embedded instance: store and lock workers
//! reached through the bus, records encoded the way clients would encode
//! them.

mod common;

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dagbox::{Client, DagBox};
use dagbox_config::Settings;
use dagbox_wire::{Part, Reply, Request};

use common::RECV_DEADLINE;

/// Record shapes from the store and lock worker contracts.
#[derive(Serialize)]
struct WriteRecord {
    key: String,
    value: Vec<u8>,
}

#[derive(Serialize)]
struct ReadRecord {
    key: String,
}

#[derive(Deserialize)]
struct ReadResponse {
    key: String,
    value: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct LockRecord {
    key: String,
    lock: bool,
}

fn open_bus(directory: &tempfile::TempDir) -> DagBox {
    let data_dir = directory
        .path()
        .to_str()
        .expect("utf-8 temp path")
        .to_string();
    let mut settings = Settings::new(data_dir);
    settings.reader_count = 2;
    let bus = DagBox::open(settings).expect("open bus");
    // Give the workers a beat to register with the broker.
    thread::sleep(Duration::from_millis(300));
    bus
}

fn encode<T: Serialize>(records: &[T]) -> Vec<Part> {
    records
        .iter()
        .map(|record| rmp_serde::to_vec_named(record).expect("encode record"))
        .collect()
}

fn expect_reply(client: &mut Client, request: Request) -> Reply {
    client
        .request(request, RECV_DEADLINE)
        .expect("request")
        .expect("reply before deadline")
}

#[test]
fn written_records_can_be_read_back_through_the_bus() {
    let directory = tempfile::tempdir().expect("tempdir");
    let bus = open_bus(&directory);
    let mut client = Client::connect(bus.context(), bus.address()).expect("connect");

    let writes = encode(&[
        WriteRecord {
            key: "alpha".to_string(),
            value: b"one".to_vec(),
        },
        WriteRecord {
            key: "beta".to_string(),
            value: b"two".to_vec(),
        },
    ]);
    let reply = expect_reply(&mut client, Request::new("store-write", vec![], writes));
    let statuses: Vec<bool> = reply
        .data()
        .iter()
        .map(|part| rmp_serde::from_slice(part).expect("decode status"))
        .collect();
    assert_eq!(statuses, vec![true, true]);

    let reads = encode(&[
        ReadRecord {
            key: "alpha".to_string(),
        },
        ReadRecord {
            key: "missing".to_string(),
        },
    ]);
    let reply = expect_reply(&mut client, Request::new("store-read", vec![], reads));
    let responses: Vec<ReadResponse> = reply
        .data()
        .iter()
        .map(|part| rmp_serde::from_slice(part).expect("decode response"))
        .collect();

    assert_eq!(responses[0].key, "alpha");
    assert_eq!(responses[0].value.as_deref(), Some(b"one".as_slice()));
    assert_eq!(responses[1].key, "missing");
    assert!(responses[1].value.is_none());
}

#[test]
fn metadata_correlates_replies() {
    let directory = tempfile::tempdir().expect("tempdir");
    let bus = open_bus(&directory);
    let mut client = Client::connect(bus.context(), bus.address()).expect("connect");

    let reads = encode(&[ReadRecord {
        key: "anything".to_string(),
    }]);
    let reply = expect_reply(
        &mut client,
        Request::new("store-read", vec![b"ticket-42".to_vec()], reads),
    );
    assert_eq!(reply.metadata(), &[b"ticket-42".to_vec()]);
}

#[test]
fn lock_service_grants_and_releases_through_the_bus() {
    let directory = tempfile::tempdir().expect("tempdir");
    let bus = open_bus(&directory);
    let mut client = Client::connect(bus.context(), bus.address()).expect("connect");

    let operations = encode(&[
        LockRecord {
            key: "resource".to_string(),
            lock: true,
        },
        LockRecord {
            key: "resource".to_string(),
            lock: true,
        },
        LockRecord {
            key: "resource".to_string(),
            lock: false,
        },
    ]);
    let reply = expect_reply(&mut client, Request::new("lock", vec![], operations));
    let statuses: Vec<bool> = reply
        .data()
        .iter()
        .map(|part| rmp_serde::from_slice(part).expect("decode status"))
        .collect();

    // Taken, contended, released.
    assert_eq!(statuses, vec![true, false, true]);
}

#[test]
fn store_survives_reopening_the_bus() {
    let directory = tempfile::tempdir().expect("tempdir");
    {
        let bus = open_bus(&directory);
        let mut client = Client::connect(bus.context(), bus.address()).expect("connect");
        let writes = encode(&[WriteRecord {
            key: "durable".to_string(),
            value: b"still here".to_vec(),
        }]);
        expect_reply(&mut client, Request::new("store-write", vec![], writes));
    }

    let bus = open_bus(&directory);
    let mut client = Client::connect(bus.context(), bus.address()).expect("connect");
    let reads = encode(&[ReadRecord {
        key: "durable".to_string(),
    }]);
    let reply = expect_reply(&mut client, Request::new("store-read", vec![], reads));
    let response: ReadResponse =
        rmp_serde::from_slice(&reply.data()[0]).expect("decode response");
    assert_eq!(response.value.as_deref(), Some(b"still here".as_slice()));
}
