//! The chain-reaction graph: typed change packets routed from producer
//! nodes to downstream receivers, synchronously and in registration order.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use bson::Document;

/// A tagged change notification routed through the reactor graph.
///
/// `options` is an opaque option document propagated verbatim alongside the
/// payload.
#[derive(Debug, Clone)]
pub enum ChainPacket {
    SetData {
        docs: Vec<Document>,
        options: Option<Document>,
    },
    Insert {
        docs: Vec<Document>,
        options: Option<Document>,
    },
    Update {
        query: Document,
        update: Document,
        options: Option<Document>,
    },
    Remove {
        query: Document,
        options: Option<Document>,
    },
    PrimaryKey {
        field: String,
    },
}

/// A node that can receive chain packets.
pub trait ChainReceiver {
    /// Handle a packet. Returning `true` means the packet was consumed and
    /// must not propagate past this node; anything else continues
    /// propagation.
    fn chain_receive(&self, packet: &ChainPacket) -> bool;

    /// Nodes report their liveness so senders can skip dropped receivers
    /// still present in a downstream list at dispatch time.
    fn chain_alive(&self) -> bool {
        true
    }
}

/// The downstream half of a reactor node: a weak list of receivers and the
/// synchronous dispatch loop.
///
/// Dispatch iterates a snapshot taken at send time; attaching or detaching
/// receivers from inside a handler takes effect for subsequent sends only.
/// Reentrant `chain_send` from inside a handler is permitted and delivers
/// depth-first.
#[derive(Default)]
pub struct ChainSender {
    downstream: RefCell<Vec<Weak<dyn ChainReceiver>>>,
}

impl ChainSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, receiver: &Rc<dyn ChainReceiver>) {
        self.downstream.borrow_mut().push(Rc::downgrade(receiver));
    }

    /// Remove a receiver by identity. Dead weak references are pruned on
    /// the way through.
    pub fn detach(&self, receiver: &Rc<dyn ChainReceiver>) {
        self.downstream.borrow_mut().retain(|w| match w.upgrade() {
            Some(rc) => !Rc::ptr_eq(&rc, receiver),
            None => false,
        });
    }

    pub fn clear(&self) {
        self.downstream.borrow_mut().clear();
    }

    pub fn has_downstream(&self) -> bool {
        self.downstream.borrow().iter().any(|w| w.strong_count() > 0)
    }

    /// Deliver a packet to every live downstream receiver, in registration
    /// order, before returning.
    pub fn chain_send(&self, packet: &ChainPacket) {
        let snapshot: Vec<Rc<dyn ChainReceiver>> = self
            .downstream
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for receiver in snapshot {
            if receiver.chain_alive() {
                receiver.chain_receive(packet);
            }
        }
    }
}
