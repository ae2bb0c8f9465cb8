//! Typed event emitters for collections and views.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bson::Document;
use rill_query::FindOptions;

pub type ListenerId = u64;

#[derive(Debug, Clone)]
pub enum CollectionEvent {
    SetData { docs: Vec<Document> },
    Insert { docs: Vec<Document> },
    /// Carries the post-mutation state of every changed document.
    Update { docs: Vec<Document> },
    Remove { docs: Vec<Document> },
    PrimaryKey { field: String },
    Drop,
}

#[derive(Debug, Clone)]
pub enum ViewEvent {
    QueryChange { query: Option<Document> },
    QueryOptionsChange { options: FindOptions },
    Drop,
}

/// Listener registry with snapshot-at-emit dispatch: handlers registered or
/// removed from inside a callback take effect for subsequent emits.
pub struct Emitter<E> {
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn(&E)>)>>,
    next_id: Cell<ListenerId>,
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn on(&self, callback: impl Fn(&E) + 'static) -> ListenerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Rc<dyn Fn(&E)>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }

    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
