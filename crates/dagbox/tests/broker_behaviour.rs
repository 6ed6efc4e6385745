//! Behavioural tests for the broker's routing engine.
//!
//! The broker runs on the test thread: each `run_once` call processes
//! exactly one inbound message, which makes the routing decisions fully
//! deterministic. Peers are driven by hand over the in-process transport.

mod common;

use std::thread;
use std::time::Duration;

use dagbox::Broker;
use dagbox_transport::{Context, Endpoint};
use dagbox_wire::{Message, Ping, Pong, Registration, Reply, Request};

use common::{parts, Peer};

const POLL: Duration = Duration::from_millis(500);

fn broker(context: &Context, worker_timeout: Duration) -> Broker {
    Broker::new(
        context,
        &Endpoint::inproc("broker-under-test"),
        worker_timeout,
        POLL,
    )
    .expect("bind broker")
}

fn register(peer: &mut Peer, broker: &mut Broker, service: &str) {
    peer.send(Message::Registration(Registration::new(service)));
    broker.run_once().expect("process registration");
    let ack = peer.recv();
    let Message::Registration(ack) = ack else {
        panic!("expected registration ack, got {ack:?}");
    };
    assert_eq!(ack.service(), service);
}

fn expect_request(peer: &mut Peer) -> Request {
    let message = peer.recv();
    let Message::Request(request) = message else {
        panic!("expected request, got {message:?}");
    };
    request
}

#[test]
fn registration_is_acknowledged_and_frees_the_worker() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut worker = Peer::connect(&context, broker.endpoint());
    let mut client = Peer::connect(&context, broker.endpoint());

    register(&mut worker, &mut broker, "search");

    client.send(Message::Request(Request::new(
        "search",
        vec![],
        parts(&[b"query"]),
    )));
    broker.run_once().expect("process request");

    let request = expect_request(&mut worker);
    assert_eq!(request.service(), "search");
    assert_eq!(request.data(), &parts(&[b"query"]));
    // The broker stamped the originating client so the reply can return.
    assert!(request.client_address().is_some());
}

#[test]
fn request_for_unknown_service_is_dropped() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut client = Peer::connect(&context, broker.endpoint());

    client.send(Message::Request(Request::new(
        "ghost",
        vec![],
        parts(&[b"x"]),
    )));
    broker.run_once().expect("process request");

    client.expect_silence();
}

#[test]
fn dropped_requests_stay_dropped_after_late_registration() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut client = Peer::connect(&context, broker.endpoint());
    let mut worker = Peer::connect(&context, broker.endpoint());

    // No workers yet: dropped, not queued.
    client.send(Message::Request(Request::new(
        "s",
        parts(&[b"first"]),
        parts(&[b"x"]),
    )));
    broker.run_once().expect("process dropped request");

    register(&mut worker, &mut broker, "s");
    // Registration must not resurrect the dropped request.
    worker.expect_silence();

    client.send(Message::Request(Request::new(
        "s",
        parts(&[b"second"]),
        parts(&[b"y"]),
    )));
    broker.run_once().expect("process second request");

    let request = expect_request(&mut worker);
    assert_eq!(request.metadata(), &parts(&[b"second"]));
}

#[test]
fn replies_reach_the_originating_client_and_free_the_worker() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut worker = Peer::connect(&context, broker.endpoint());
    let mut client = Peer::connect(&context, broker.endpoint());

    register(&mut worker, &mut broker, "echo");

    client.send(Message::Request(Request::new(
        "echo",
        parts(&[b"tag"]),
        parts(&[b"payload"]),
    )));
    broker.run_once().expect("dispatch request");
    let request = expect_request(&mut worker);

    worker.send(Message::Reply(Reply::from_request(request)));
    broker.run_once().expect("forward reply");

    let message = client.recv();
    let Message::Reply(reply) = message else {
        panic!("expected reply, got {message:?}");
    };
    assert_eq!(reply.metadata(), &parts(&[b"tag"]));
    assert_eq!(reply.data(), &parts(&[b"payload"]));

    // The worker is free again: the next request goes straight out.
    client.send(Message::Request(Request::new(
        "echo",
        vec![],
        parts(&[b"again"]),
    )));
    broker.run_once().expect("dispatch follow-up");
    expect_request(&mut worker);
}

#[test]
fn pending_requests_drain_in_fifo_order() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut worker = Peer::connect(&context, broker.endpoint());
    let mut client = Peer::connect(&context, broker.endpoint());

    register(&mut worker, &mut broker, "s");

    // Occupy the worker.
    client.send(Message::Request(Request::new(
        "s",
        parts(&[b"r0"]),
        vec![],
    )));
    broker.run_once().expect("dispatch r0");
    let outstanding = expect_request(&mut worker);

    // Two more requests arrive while the worker is busy.
    for tag in [b"r1".as_slice(), b"r2".as_slice()] {
        client.send(Message::Request(Request::new("s", parts(&[tag]), vec![])));
        broker.run_once().expect("queue request");
    }
    worker.expect_silence();

    // The reply frees the worker; the oldest queued request follows
    // immediately, the newer one stays queued.
    worker.send(Message::Reply(Reply::from_request(outstanding)));
    broker.run_once().expect("process reply");

    let next = expect_request(&mut worker);
    assert_eq!(next.metadata(), &parts(&[b"r1"]));
    worker.expect_silence();

    worker.send(Message::Reply(Reply::from_request(next)));
    broker.run_once().expect("process second reply");
    let last = expect_request(&mut worker);
    assert_eq!(last.metadata(), &parts(&[b"r2"]));
}

#[test]
fn ping_from_unknown_peer_yields_reconnect() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut stranger = Peer::connect(&context, broker.endpoint());

    stranger.send(Message::Ping(Ping::new()));
    broker.run_once().expect("process ping");

    let message = stranger.recv();
    assert!(matches!(message, Message::Reconnect(_)));
    stranger.expect_silence();
}

#[test]
fn ping_from_known_worker_yields_pong_and_refreshes_liveness() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_millis(300));
    let mut worker = Peer::connect(&context, broker.endpoint());
    let mut client = Peer::connect(&context, broker.endpoint());

    register(&mut worker, &mut broker, "s");

    // Sit idle long enough that the original registration alone would
    // have gone stale, keeping the heartbeat going meanwhile.
    for _ in 0..2 {
        thread::sleep(Duration::from_millis(200));
        worker.send(Message::Ping(Ping::new()));
        broker.run_once().expect("process ping");
        let message = worker.recv();
        assert!(matches!(message, Message::Pong(_)));
    }

    client.send(Message::Request(Request::new("s", vec![], vec![])));
    broker.run_once().expect("dispatch request");
    expect_request(&mut worker);
}

#[test]
fn stale_worker_is_evicted_at_selection() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_millis(100));
    let mut worker = Peer::connect(&context, broker.endpoint());
    let mut client = Peer::connect(&context, broker.endpoint());

    register(&mut worker, &mut broker, "s");
    thread::sleep(Duration::from_millis(150));

    // Selection finds the stale entry, evicts it, finds nothing else,
    // and drops the request.
    client.send(Message::Request(Request::new("s", vec![], vec![])));
    broker.run_once().expect("process request");

    worker.expect_silence();
    client.expect_silence();
}

#[test]
fn selection_skips_stale_workers_when_a_fresh_one_exists() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_millis(200));
    let mut stale = Peer::connect(&context, broker.endpoint());
    let mut fresh = Peer::connect(&context, broker.endpoint());
    let mut client = Peer::connect(&context, broker.endpoint());

    register(&mut stale, &mut broker, "s");
    thread::sleep(Duration::from_millis(250));
    register(&mut fresh, &mut broker, "s");

    client.send(Message::Request(Request::new("s", vec![], vec![])));
    broker.run_once().expect("dispatch request");

    expect_request(&mut fresh);
    stale.expect_silence();
}

#[test]
fn pong_from_unknown_peer_is_ignored() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut stranger = Peer::connect(&context, broker.endpoint());

    stranger.send(Message::Pong(Pong::from_ping(Ping::new())));
    broker.run_once().expect("process pong");
    stranger.expect_silence();

    // The broker is unbothered: registrations still work.
    register(&mut stranger, &mut broker, "s");
}

#[test]
fn reply_without_client_address_is_dropped() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut worker = Peer::connect(&context, broker.endpoint());

    register(&mut worker, &mut broker, "s");

    worker.send(Message::Reply(Reply::from_request(Request::new(
        "s",
        vec![],
        vec![],
    ))));
    broker.run_once().expect("process reply");
    worker.expect_silence();
}

#[test]
fn worker_submitting_its_own_request_is_freed() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut upstream = Peer::connect(&context, broker.endpoint());
    let mut downstream = Peer::connect(&context, broker.endpoint());
    let mut client = Peer::connect(&context, broker.endpoint());

    register(&mut upstream, &mut broker, "fetch");
    register(&mut downstream, &mut broker, "parse");

    // Occupy the upstream worker, then queue a second request behind it.
    client.send(Message::Request(Request::new("fetch", vec![], vec![])));
    broker.run_once().expect("dispatch first");
    expect_request(&mut upstream);
    client.send(Message::Request(Request::new(
        "fetch",
        parts(&[b"queued"]),
        vec![],
    )));
    broker.run_once().expect("queue second");
    upstream.expect_silence();

    // The upstream worker pipelines into another service, which both
    // routes its request and marks it free for the queued work.
    upstream.send(Message::Request(Request::new("parse", vec![], vec![])));
    broker.run_once().expect("process pipelined request");

    let pipelined = expect_request(&mut downstream);
    assert!(pipelined.client_address().is_some());
    let queued = expect_request(&mut upstream);
    assert_eq!(queued.metadata(), &parts(&[b"queued"]));
}

#[test]
fn malformed_input_does_not_stop_the_loop() {
    let context = Context::new();
    let mut broker = broker(&context, Duration::from_secs(5));
    let mut peer = Peer::connect(&context, broker.endpoint());

    peer.send_raw(parts(&[b"junk"]));
    broker.run_once().expect("survive junk");

    peer.send_raw(parts(&[b"", b"DGBX\x7f", b"\x02"]));
    broker.run_once().expect("survive bad version");

    register(&mut peer, &mut broker, "still-alive");
}
