use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::chain::{ChainPacket, ChainReceiver, ChainSender};
use crate::collection::Collection;

/// Transform callback interposed between a source and a sink. The IO is
/// passed back in so the callback can `chain_send` rewritten packets to the
/// sink. Returning `true` suppresses forwarding of the original packet.
pub type TransformFn = Box<dyn Fn(&ReactorIo, &ChainPacket) -> bool>;

/// An interposer node that rewrites or gates packets between a specific
/// source collection and a sink receiver.
pub struct ReactorIo {
    weak_self: Weak<ReactorIo>,
    source: RefCell<Option<Collection>>,
    chain: ChainSender,
    transform: TransformFn,
    dropped: Cell<bool>,
}

impl ReactorIo {
    /// Wire up: subscribe downstream of `source`, register `sink` as this
    /// node's downstream.
    pub fn new(source: &Collection, sink: Rc<dyn ChainReceiver>, transform: TransformFn) -> Rc<Self> {
        let io = Rc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            source: RefCell::new(Some(source.clone())),
            chain: ChainSender::new(),
            transform,
            dropped: Cell::new(false),
        });
        io.chain.attach(&sink);
        source.chain().attach(&(io.clone() as Rc<dyn ChainReceiver>));
        io
    }

    /// Emit a packet to the sink; used by transform callbacks to send
    /// rewritten packets.
    pub fn chain_send(&self, packet: &ChainPacket) {
        self.chain.chain_send(packet);
    }

    /// Unsubscribe from the source and disconnect the sink. Idempotent.
    pub fn drop_io(&self) -> bool {
        if self.dropped.replace(true) {
            return false;
        }
        let source = self.source.borrow_mut().take();
        if let (Some(source), Some(me)) = (source, self.weak_self.upgrade()) {
            source.chain().detach(&(me as Rc<dyn ChainReceiver>));
        }
        self.chain.clear();
        true
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.get()
    }
}

impl ChainReceiver for ReactorIo {
    fn chain_receive(&self, packet: &ChainPacket) -> bool {
        if self.dropped.get() {
            return false;
        }
        if (self.transform)(self, packet) {
            return true;
        }
        self.chain.chain_send(packet);
        false
    }

    fn chain_alive(&self) -> bool {
        !self.dropped.get()
    }
}
