mod common;
use common::*;

use bson::doc;
use rill_db::{ChainPacket, ChainReceiver, ChainSender, ReactorIo};
use std::cell::RefCell;
use std::rc::Rc;

/// Records the type tag of every packet it receives.
struct Recorder {
    seen: RefCell<Vec<&'static str>>,
    consume: bool,
}

impl Recorder {
    fn new(consume: bool) -> Rc<Self> {
        Rc::new(Self {
            seen: RefCell::new(Vec::new()),
            consume,
        })
    }

    fn labels(&self) -> Vec<&'static str> {
        self.seen.borrow().clone()
    }
}

fn label(packet: &ChainPacket) -> &'static str {
    match packet {
        ChainPacket::SetData { .. } => "setData",
        ChainPacket::Insert { .. } => "insert",
        ChainPacket::Update { .. } => "update",
        ChainPacket::Remove { .. } => "remove",
        ChainPacket::PrimaryKey { .. } => "primaryKey",
    }
}

impl ChainReceiver for Recorder {
    fn chain_receive(&self, packet: &ChainPacket) -> bool {
        self.seen.borrow_mut().push(label(packet));
        self.consume
    }
}

// ── ChainSender semantics ───────────────────────────────────────

#[test]
fn delivery_follows_registration_order() {
    let sender = ChainSender::new();
    let first = Recorder::new(false);
    let second = Recorder::new(false);
    sender.attach(&(first.clone() as Rc<dyn ChainReceiver>));
    sender.attach(&(second.clone() as Rc<dyn ChainReceiver>));

    sender.chain_send(&ChainPacket::Insert {
        docs: vec![doc! { "_id": 1 }],
        options: None,
    });
    assert_eq!(first.labels(), vec!["insert"]);
    assert_eq!(second.labels(), vec!["insert"]);
}

#[test]
fn consuming_receiver_does_not_starve_siblings() {
    // A receiver returning true cancels propagation past itself only;
    // siblings registered on the same sender still hear the packet.
    let sender = ChainSender::new();
    let greedy = Recorder::new(true);
    let after = Recorder::new(false);
    sender.attach(&(greedy.clone() as Rc<dyn ChainReceiver>));
    sender.attach(&(after.clone() as Rc<dyn ChainReceiver>));

    sender.chain_send(&ChainPacket::PrimaryKey { field: "_id".into() });
    assert_eq!(greedy.labels(), vec!["primaryKey"]);
    assert_eq!(after.labels(), vec!["primaryKey"]);
}

#[test]
fn detach_removes_by_identity() {
    let sender = ChainSender::new();
    let a = Recorder::new(false);
    let b = Recorder::new(false);
    sender.attach(&(a.clone() as Rc<dyn ChainReceiver>));
    sender.attach(&(b.clone() as Rc<dyn ChainReceiver>));
    sender.detach(&(a.clone() as Rc<dyn ChainReceiver>));

    sender.chain_send(&ChainPacket::PrimaryKey { field: "_id".into() });
    assert!(a.labels().is_empty());
    assert_eq!(b.labels(), vec!["primaryKey"]);
}

#[test]
fn dead_receivers_are_skipped() {
    let sender = ChainSender::new();
    let alive = Recorder::new(false);
    {
        let short_lived = Recorder::new(false);
        sender.attach(&(short_lived.clone() as Rc<dyn ChainReceiver>));
    }
    sender.attach(&(alive.clone() as Rc<dyn ChainReceiver>));

    sender.chain_send(&ChainPacket::PrimaryKey { field: "_id".into() });
    assert_eq!(alive.labels(), vec!["primaryKey"]);
}

/// Attaches another receiver to the sender from inside its own handler.
struct SelfExpander {
    sender: Rc<ChainSender>,
    spawned: RefCell<Vec<Rc<Recorder>>>,
}

impl ChainReceiver for SelfExpander {
    fn chain_receive(&self, _packet: &ChainPacket) -> bool {
        let recorder = Recorder::new(false);
        self.sender
            .attach(&(recorder.clone() as Rc<dyn ChainReceiver>));
        self.spawned.borrow_mut().push(recorder);
        false
    }
}

#[test]
fn downstream_list_is_snapshotted_per_send() {
    let sender = Rc::new(ChainSender::new());
    let expander = Rc::new(SelfExpander {
        sender: sender.clone(),
        spawned: RefCell::new(Vec::new()),
    });
    sender.attach(&(expander.clone() as Rc<dyn ChainReceiver>));

    let packet = ChainPacket::PrimaryKey { field: "_id".into() };
    sender.chain_send(&packet);
    // The receiver attached during dispatch saw nothing this round
    assert!(expander.spawned.borrow()[0].labels().is_empty());

    sender.chain_send(&packet);
    assert_eq!(expander.spawned.borrow()[0].labels(), vec!["primaryKey"]);
}

// ── ReactorIO interception ──────────────────────────────────────

#[test]
fn consuming_transform_starves_the_sink() {
    let (_db, source) = seeded_db();
    let sink = Recorder::new(false);
    let io = ReactorIo::new(
        &source,
        sink.clone() as Rc<dyn ChainReceiver>,
        Box::new(|_, _| true),
    );

    source.insert(doc! { "_id": 10, "age": 1 }).unwrap();
    source
        .update(&doc! { "_id": 10 }, &doc! { "age": 2 }, None)
        .unwrap();
    source.remove(&doc! { "_id": 10 }, None).unwrap();
    source.set_data(vec![doc! { "_id": 11 }], None).unwrap();

    assert!(sink.labels().is_empty());
    assert!(io.drop_io());
}

#[test]
fn passthrough_transform_forwards_everything() {
    let (_db, source) = seeded_db();
    let sink = Recorder::new(false);
    let _io = ReactorIo::new(
        &source,
        sink.clone() as Rc<dyn ChainReceiver>,
        Box::new(|_, _| false),
    );

    source.insert(doc! { "_id": 10, "age": 1 }).unwrap();
    source
        .update(&doc! { "_id": 10 }, &doc! { "age": 2 }, None)
        .unwrap();
    source.remove(&doc! { "_id": 10 }, None).unwrap();

    assert_eq!(sink.labels(), vec!["insert", "update", "remove"]);
}

#[test]
fn transform_can_rewrite_packets() {
    let (_db, source) = seeded_db();
    let sink = Recorder::new(false);
    let _io = ReactorIo::new(
        &source,
        sink.clone() as Rc<dyn ChainReceiver>,
        Box::new(|io, packet| match packet {
            ChainPacket::Insert { docs, options } => {
                // Re-emit as a full replacement
                io.chain_send(&ChainPacket::SetData {
                    docs: docs.clone(),
                    options: options.clone(),
                });
                true
            }
            _ => false,
        }),
    );

    source.insert(doc! { "_id": 10, "age": 1 }).unwrap();
    source.remove(&doc! { "_id": 10 }, None).unwrap();
    assert_eq!(sink.labels(), vec!["setData", "remove"]);
}

#[test]
fn dropped_io_ignores_traffic() {
    let (_db, source) = seeded_db();
    let sink = Recorder::new(false);
    let io = ReactorIo::new(
        &source,
        sink.clone() as Rc<dyn ChainReceiver>,
        Box::new(|_, _| false),
    );

    assert!(io.drop_io());
    assert!(!io.drop_io());
    assert!(io.is_dropped());

    source.insert(doc! { "_id": 10, "age": 1 }).unwrap();
    assert!(sink.labels().is_empty());
}
