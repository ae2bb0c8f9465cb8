//! In-memory document collection: ordered storage, primary-key identity,
//! find pipeline, chain-packet emission on every mutation.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use bson::{Bson, Document};
use rill_query::{
    Expression, FindOptions, OrderSpec, matches, parse_filter, parse_mutation, path, value,
};

use crate::chain::{ChainPacket, ChainReceiver, ChainSender};
use crate::cursor::Cursor;
use crate::database::DatabaseCore;
use crate::emitter::{CollectionEvent, Emitter, ListenerId};
use crate::error::DbError;
use crate::tree::MultiLevelTree;
use crate::view::{View, ViewCore};

/// Ingress/egress projection hook.
pub type TransformHook = Rc<dyn Fn(Document) -> Document>;

/// Optional projection applied on CRUD ingress (`data_in`) and read egress
/// (`data_out`) when enabled.
#[derive(Clone, Default)]
pub struct TransformConfig {
    pub enabled: bool,
    pub data_in: Option<TransformHook>,
    pub data_out: Option<TransformHook>,
}

/// What to apply to one collection to make it match another under the
/// shared primary key.
#[derive(Debug, Default)]
pub struct Diff {
    pub insert: Vec<Document>,
    pub update: Vec<Document>,
    pub remove: Vec<Document>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

struct CollectionState {
    data: Vec<Document>,
    /// pk identity → position in `data`; rebuilt after order-affecting
    /// mutations.
    primary: HashMap<String, usize>,
}

struct CollectionIndex {
    spec: OrderSpec,
    tree: MultiLevelTree,
    built_version: u64,
}

pub(crate) struct CollectionCore {
    weak_self: Weak<CollectionCore>,
    name: String,
    primary_key: RefCell<String>,
    state: RefCell<CollectionState>,
    chain: ChainSender,
    events: Emitter<CollectionEvent>,
    transform: RefCell<TransformConfig>,
    indexes: RefCell<Vec<CollectionIndex>>,
    data_version: Cell<u64>,
    dependents: RefCell<Vec<Weak<ViewCore>>>,
    db: RefCell<Option<Weak<DatabaseCore>>>,
    last_cursor: Cell<Cursor>,
    dropped: Cell<bool>,
}

/// Cheap-clone handle to a document collection. Collections are shared —
/// one may feed many views; the handle clones share one underlying store.
#[derive(Clone)]
pub struct Collection {
    core: Rc<CollectionCore>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            core: Rc::new_cyclic(|weak| CollectionCore {
                weak_self: weak.clone(),
                name,
                primary_key: RefCell::new("_id".to_string()),
                state: RefCell::new(CollectionState {
                    data: Vec::new(),
                    primary: HashMap::new(),
                }),
                chain: ChainSender::new(),
                events: Emitter::new(),
                transform: RefCell::new(TransformConfig::default()),
                indexes: RefCell::new(Vec::new()),
                data_version: Cell::new(0),
                dependents: RefCell::new(Vec::new()),
                db: RefCell::new(None),
                last_cursor: Cell::new(Cursor::default()),
                dropped: Cell::new(false),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.core.name.clone()
    }

    pub fn primary_key(&self) -> String {
        self.core.primary_key.borrow().clone()
    }

    /// Change the identity field; downstream collections follow through the
    /// emitted `PrimaryKey` packet.
    pub fn set_primary_key(&self, field: &str) {
        if *self.core.primary_key.borrow() == field {
            return;
        }
        *self.core.primary_key.borrow_mut() = field.to_string();
        {
            let pk = field.to_string();
            let mut state = self.core.state.borrow_mut();
            rebuild_primary(&mut state, &pk);
        }
        self.core.chain.chain_send(&ChainPacket::PrimaryKey {
            field: field.to_string(),
        });
        self.core.events.emit(&CollectionEvent::PrimaryKey {
            field: field.to_string(),
        });
    }

    // ── Write operations ────────────────────────────────────────

    pub fn insert(&self, doc: Document) -> Result<Document, DbError> {
        let mut inserted = self.insert_many(vec![doc])?;
        Ok(inserted.remove(0))
    }

    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>, DbError> {
        self.core.guard_dropped()?;
        let mut docs = self.core.apply_data_in(docs);
        let pk = self.primary_key();
        for doc in &mut docs {
            ensure_id(doc, &pk);
        }
        {
            let mut state = self.core.state.borrow_mut();
            let mut batch: HashSet<String> = HashSet::new();
            for doc in &docs {
                let key = doc_identity(doc, &pk)
                    .ok_or_else(|| DbError::InvalidDocument(format!("missing primary key `{pk}`")))?;
                if state.primary.contains_key(&key) || !batch.insert(key.clone()) {
                    return Err(DbError::DuplicateKey(key));
                }
            }
            for doc in &docs {
                state.data.push(doc.clone());
            }
            rebuild_primary(&mut state, &pk);
        }
        self.core.touch();
        self.core.chain.chain_send(&ChainPacket::Insert {
            docs: docs.clone(),
            options: None,
        });
        self.core
            .events
            .emit(&CollectionEvent::Insert { docs: docs.clone() });
        Ok(docs)
    }

    /// Splice a document in at a specific position and notify downstream —
    /// the placement half of ordered view maintenance.
    pub fn insert_at(&self, doc: Document, index: usize) -> Result<Document, DbError> {
        self.core.guard_dropped()?;
        let mut docs = self.core.apply_data_in(vec![doc]);
        let mut doc = docs.remove(0);
        let pk = self.primary_key();
        ensure_id(&mut doc, &pk);
        {
            let mut state = self.core.state.borrow_mut();
            let key = doc_identity(&doc, &pk)
                .ok_or_else(|| DbError::InvalidDocument(format!("missing primary key `{pk}`")))?;
            if state.primary.contains_key(&key) {
                return Err(DbError::DuplicateKey(key));
            }
            let index = index.min(state.data.len());
            state.data.insert(index, doc.clone());
            rebuild_primary(&mut state, &pk);
        }
        self.core.touch();
        self.core.chain.chain_send(&ChainPacket::Insert {
            docs: vec![doc.clone()],
            options: None,
        });
        self.core.events.emit(&CollectionEvent::Insert {
            docs: vec![doc.clone()],
        });
        Ok(doc)
    }

    /// Apply an update to every matching document. Returns the changed
    /// documents in their post-mutation state.
    pub fn update(
        &self,
        query: &Document,
        update: &Document,
        options: Option<Document>,
    ) -> Result<Vec<Document>, DbError> {
        self.core.guard_dropped()?;
        let expr = parse_filter(query)?;
        let mutation = parse_mutation(update)?;
        let pk = self.primary_key();
        let mut changed = Vec::new();
        {
            let mut state = self.core.state.borrow_mut();
            for doc in state.data.iter_mut() {
                if !matches(doc, &expr) {
                    continue;
                }
                let mut candidate = doc.clone();
                if mutation.apply(&mut candidate) {
                    *doc = candidate.clone();
                    changed.push(candidate);
                }
            }
            if !changed.is_empty() {
                rebuild_primary(&mut state, &pk);
            }
        }
        if !changed.is_empty() {
            self.core.touch();
            self.core.chain.chain_send(&ChainPacket::Update {
                query: query.clone(),
                update: update.clone(),
                options,
            });
            self.core.events.emit(&CollectionEvent::Update {
                docs: changed.clone(),
            });
        }
        Ok(changed)
    }

    pub fn update_by_id(&self, id: Bson, update: &Document) -> Result<Vec<Document>, DbError> {
        let mut query = Document::new();
        query.insert(self.primary_key(), id);
        self.update(&query, update, None)
    }

    /// Remove every matching document; returns what was removed.
    pub fn remove(
        &self,
        query: &Document,
        options: Option<Document>,
    ) -> Result<Vec<Document>, DbError> {
        self.core.guard_dropped()?;
        let expr = parse_filter(query)?;
        let pk = self.primary_key();
        let removed: Vec<Document>;
        {
            let mut state = self.core.state.borrow_mut();
            let data = std::mem::take(&mut state.data);
            let (out, kept): (Vec<Document>, Vec<Document>) =
                data.into_iter().partition(|doc| matches(doc, &expr));
            removed = out;
            state.data = kept;
            rebuild_primary(&mut state, &pk);
        }
        if !removed.is_empty() {
            self.core.touch();
            self.core.chain.chain_send(&ChainPacket::Remove {
                query: query.clone(),
                options,
            });
            self.core.events.emit(&CollectionEvent::Remove {
                docs: removed.clone(),
            });
        }
        Ok(removed)
    }

    /// Replace the entire contents.
    pub fn set_data(
        &self,
        docs: Vec<Document>,
        options: Option<Document>,
    ) -> Result<(), DbError> {
        self.core.guard_dropped()?;
        let mut docs = self.core.apply_data_in(docs);
        let pk = self.primary_key();
        for doc in &mut docs {
            ensure_id(doc, &pk);
        }
        {
            let mut state = self.core.state.borrow_mut();
            state.data = docs.clone();
            rebuild_primary(&mut state, &pk);
        }
        self.core.touch();
        self.core.chain.chain_send(&ChainPacket::SetData {
            docs: docs.clone(),
            options,
        });
        self.core.events.emit(&CollectionEvent::SetData { docs });
        Ok(())
    }

    // ── Read operations ─────────────────────────────────────────

    pub fn find(&self, query: &Document, options: &FindOptions) -> Result<Vec<Document>, DbError> {
        Ok(self.find_with_cursor(query, options)?.0)
    }

    /// The find pipeline: filter → sort → cursor → page slice → egress
    /// projection. A dropped collection reads as empty.
    pub fn find_with_cursor(
        &self,
        query: &Document,
        options: &FindOptions,
    ) -> Result<(Vec<Document>, Cursor), DbError> {
        if self.core.dropped.get() {
            return Ok((Vec::new(), Cursor::default()));
        }
        if let Some(sub) = &options.find_sub {
            let docs =
                self.resolve_sub_source(&sub.from)
                    .find_sub(query, &sub.path, &sub.query, &FindOptions::default())?;
            let cursor = Cursor::compute(docs.len(), options);
            return Ok((docs, cursor));
        }
        if let Some(sub) = &options.find_sub_one {
            let docs: Vec<Document> = self
                .resolve_sub_source(&sub.from)
                .find_sub_one(query, &sub.path, &sub.query, &FindOptions::default())?
                .into_iter()
                .collect();
            let cursor = Cursor::compute(docs.len(), options);
            return Ok((docs, cursor));
        }

        let expr = parse_filter(query)?;
        let mut results = self.core.candidates(query, &expr);
        if let Some(spec) = &options.order_by {
            results.sort_by(|a, b| spec.compare_docs(a, b));
        }
        let cursor = Cursor::compute(results.len(), options);
        if let Some(limit) = options.limit {
            let page = options.page.unwrap_or(0);
            let start = (page * limit).min(results.len());
            let end = (start + limit).min(results.len());
            results = results[start..end].to_vec();
        }
        let results = self.core.apply_data_out(results);
        self.core.last_cursor.set(cursor);
        Ok((results, cursor))
    }

    pub fn find_one(
        &self,
        query: &Document,
        options: &FindOptions,
    ) -> Result<Option<Document>, DbError> {
        Ok(self.find(query, options)?.into_iter().next())
    }

    pub fn find_by_id(&self, id: &Bson) -> Option<Document> {
        if self.core.dropped.get() {
            return None;
        }
        let key = value::pk_key(id);
        let state = self.core.state.borrow();
        let doc = state
            .primary
            .get(&key)
            .and_then(|&pos| state.data.get(pos))
            .cloned()?;
        drop(state);
        Some(self.core.apply_data_out(vec![doc]).remove(0))
    }

    /// Search sub-document arrays at `path` inside matching documents.
    pub fn find_sub(
        &self,
        query: &Document,
        sub_path: &str,
        sub_query: &Document,
        sub_options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let sub_expr = parse_filter(sub_query)?;
        let mut out = Vec::new();
        for doc in self.find(query, &FindOptions::default())? {
            let Some(Bson::Array(items)) = path::get(&doc, sub_path) else {
                continue;
            };
            for item in items {
                if let Bson::Document(sub_doc) = item {
                    if matches(sub_doc, &sub_expr) {
                        out.push(sub_doc.clone());
                    }
                }
            }
        }
        if let Some(spec) = &sub_options.order_by {
            out.sort_by(|a, b| spec.compare_docs(a, b));
        }
        if let Some(limit) = sub_options.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    pub fn find_sub_one(
        &self,
        query: &Document,
        sub_path: &str,
        sub_query: &Document,
        sub_options: &FindOptions,
    ) -> Result<Option<Document>, DbError> {
        Ok(self
            .find_sub(query, sub_path, sub_query, sub_options)?
            .into_iter()
            .next())
    }

    /// Unique values at a path across matching documents, in first-seen
    /// order.
    pub fn distinct(&self, field: &str, query: &Document) -> Result<Vec<Bson>, DbError> {
        let mut out: Vec<Bson> = Vec::new();
        for doc in self.find(query, &FindOptions::default())? {
            if let Some(v) = path::get(&doc, field) {
                if !out.iter().any(|seen| value::eq(seen, v)) {
                    out.push(v.clone());
                }
            }
        }
        Ok(out)
    }

    pub fn filter(&self, predicate: impl Fn(&Document) -> bool) -> Vec<Document> {
        let docs = self.contents();
        docs.into_iter().filter(|d| predicate(d)).collect()
    }

    pub fn count(&self, query: Option<&Document>) -> Result<usize, DbError> {
        match query {
            Some(q) => Ok(self.find(q, &FindOptions::default())?.len()),
            None => Ok(self.core.state.borrow().data.len()),
        }
    }

    /// Storage-order snapshot of the raw contents (no egress projection).
    pub fn contents(&self) -> Vec<Document> {
        self.core.state.borrow().data.clone()
    }

    /// Detached anonymous collection holding the matching documents.
    pub fn subset(&self, query: &Document, options: &FindOptions) -> Result<Collection, DbError> {
        let docs = self.find(query, options)?;
        let sub = Collection::new(format!("{}_subset", self.core.name));
        sub.set_primary_key(&self.primary_key());
        sub.set_data(docs, None)?;
        Ok(sub)
    }

    /// What to apply to `self` so it matches `other` under the shared
    /// primary key.
    pub fn diff(&self, other: &Collection) -> Diff {
        let pk = self.primary_key();
        let mut diff = Diff::default();
        let other_docs = other.contents();
        let mut other_keys: HashSet<String> = HashSet::new();

        let state = self.core.state.borrow();
        for doc in &other_docs {
            let Some(key) = doc_identity(doc, &pk) else {
                diff.insert.push(doc.clone());
                continue;
            };
            other_keys.insert(key.clone());
            match state.primary.get(&key) {
                Some(&pos) => {
                    if state.data.get(pos) != Some(doc) {
                        diff.update.push(doc.clone());
                    }
                }
                None => diff.insert.push(doc.clone()),
            }
        }
        for doc in &state.data {
            match doc_identity(doc, &pk) {
                Some(key) if other_keys.contains(&key) => {}
                _ => diff.remove.push(doc.clone()),
            }
        }
        diff
    }

    /// Pagination summary of the most recent `find`.
    pub fn last_cursor(&self) -> Cursor {
        self.core.last_cursor.get()
    }

    // ── Indexing ────────────────────────────────────────────────

    /// Build a multi-level tree index over the spec. Indexes rebuild lazily
    /// after mutation and accelerate finds whose query directly constrains
    /// the leading index field.
    pub fn ensure_index(&self, spec: OrderSpec) -> Result<(), DbError> {
        self.core.guard_dropped()?;
        if spec.is_empty() {
            return Err(DbError::InvalidQuery("empty index spec".into()));
        }
        let mut indexes = self.core.indexes.borrow_mut();
        if indexes.iter().any(|ix| ix.spec == spec) {
            return Ok(());
        }
        let mut tree = MultiLevelTree::new(spec.clone());
        for doc in &self.core.state.borrow().data {
            tree.insert(doc.clone());
        }
        indexes.push(CollectionIndex {
            spec,
            tree,
            built_version: self.core.data_version.get(),
        });
        Ok(())
    }

    // ── Transform / events / lifecycle ──────────────────────────

    /// Configure the ingress/egress projection for this collection's own
    /// CRUD surface.
    pub fn transform(&self, config: TransformConfig) {
        *self.core.transform.borrow_mut() = config;
    }

    pub fn on(&self, callback: impl Fn(&CollectionEvent) + 'static) -> ListenerId {
        self.core.events.on(callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.core.events.off(id)
    }

    /// Tear down: notify dependents, unregister from the owning database,
    /// clear contents. Idempotent; returns whether this call dropped it.
    pub fn drop(&self) -> bool {
        if self.core.dropped.replace(true) {
            return false;
        }
        self.core.events.emit(&CollectionEvent::Drop);
        self.core.dependents.borrow_mut().clear();
        if let Some(db) = self.core.db.borrow().clone().and_then(|w| w.upgrade()) {
            db.remove_collection(&self.core.name);
        }
        {
            let mut state = self.core.state.borrow_mut();
            state.data.clear();
            state.primary.clear();
        }
        self.core.indexes.borrow_mut().clear();
        self.core.chain.clear();
        self.core.events.clear();
        true
    }

    pub fn is_dropped(&self) -> bool {
        self.core.dropped.get()
    }

    /// Construct a view named `name`, register it with the owning database,
    /// and bind it to this collection. Fails loudly on a name conflict.
    pub fn view(
        &self,
        name: &str,
        query: Option<Document>,
        options: Option<FindOptions>,
    ) -> Result<View, DbError> {
        let db = self.core.db.borrow().clone();
        if let Some(db) = db.as_ref().and_then(|w| w.upgrade()) {
            if db.view_exists(name) {
                return Err(DbError::NameConflict(name.to_string()));
            }
        }
        let view = View::new(name, query, options);
        if let Some(db) = db.as_ref() {
            view.attach_db(db.clone());
        }
        // A failed bind must not occupy the name in the registry
        view.from(self)?;
        if let Some(db) = db.and_then(|w| w.upgrade()) {
            db.register_view(name, &view);
        }
        Ok(view)
    }

    /// Names of the views currently fed by this collection.
    pub fn dependent_views(&self) -> Vec<String> {
        self.core
            .dependents
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|v| v.view_name())
            .collect()
    }

    // ── Crate-internal surface ──────────────────────────────────

    pub(crate) fn chain(&self) -> &ChainSender {
        &self.core.chain
    }

    pub(crate) fn as_receiver(&self) -> Rc<dyn ChainReceiver> {
        self.core.clone()
    }

    pub(crate) fn set_db(&self, db: Weak<DatabaseCore>) {
        *self.core.db.borrow_mut() = Some(db);
    }

    pub(crate) fn register_view(&self, view: Weak<ViewCore>) {
        self.core.dependents.borrow_mut().push(view);
    }

    pub(crate) fn unregister_view(&self, view: &Weak<ViewCore>) {
        self.core.dependents.borrow_mut().retain(|w| {
            w.strong_count() > 0 && !Weak::ptr_eq(w, view)
        });
    }

    pub(crate) fn position_of(&self, doc: &Document) -> Option<usize> {
        let pk = self.primary_key();
        let key = doc_identity(doc, &pk)?;
        self.core.state.borrow().primary.get(&key).copied()
    }

    /// Move a document between storage positions without emitting packets;
    /// content is unchanged, only order shifts.
    pub(crate) fn relocate(&self, from: usize, to: usize) {
        let pk = self.primary_key();
        let mut state = self.core.state.borrow_mut();
        if from >= state.data.len() {
            return;
        }
        let doc = state.data.remove(from);
        let to = to.min(state.data.len());
        state.data.insert(to, doc);
        rebuild_primary(&mut state, &pk);
    }

    fn resolve_sub_source(&self, from: &Option<String>) -> Collection {
        if let Some(from) = from {
            if *from != self.core.name {
                if let Some(db) = self.core.db.borrow().clone().and_then(|w| w.upgrade()) {
                    if let Some(other) = db.collection_if_exists(from) {
                        return other;
                    }
                }
            }
        }
        self.clone()
    }
}

impl CollectionCore {
    fn guard_dropped(&self) -> Result<(), DbError> {
        if self.dropped.get() {
            return Err(DbError::Dropped(format!("collection `{}`", self.name)));
        }
        Ok(())
    }

    fn touch(&self) {
        self.data_version.set(self.data_version.get() + 1);
    }

    fn apply_data_in(&self, docs: Vec<Document>) -> Vec<Document> {
        let transform = self.transform.borrow();
        if !transform.enabled {
            return docs;
        }
        match &transform.data_in {
            Some(hook) => docs.into_iter().map(|d| hook(d)).collect(),
            None => docs,
        }
    }

    fn apply_data_out(&self, docs: Vec<Document>) -> Vec<Document> {
        let transform = self.transform.borrow();
        if !transform.enabled {
            return docs;
        }
        match &transform.data_out {
            Some(hook) => docs.into_iter().map(|d| hook(d)).collect(),
            None => docs,
        }
    }

    /// Match-filtered candidate documents, served from a tree index when
    /// the query directly constrains one's leading field.
    fn candidates(&self, query: &Document, expr: &Expression) -> Vec<Document> {
        if let Some(candidates) = self.index_lookup(query) {
            return candidates
                .into_iter()
                .filter(|d| matches(d, expr))
                .collect();
        }
        let state = self.state.borrow();
        state
            .data
            .iter()
            .filter(|d| matches(d, expr))
            .cloned()
            .collect()
    }

    fn index_lookup(&self, query: &Document) -> Option<Vec<Document>> {
        let mut indexes = self.indexes.borrow_mut();
        let version = self.data_version.get();
        let index = indexes.iter_mut().find(|ix| {
            ix.spec
                .head()
                .is_some_and(|lead| {
                    query
                        .get(&lead.path)
                        .is_some_and(|v| !matches!(v, Bson::Document(_)))
                })
        })?;
        if index.built_version != version {
            let mut tree = MultiLevelTree::new(index.spec.clone());
            for doc in &self.state.borrow().data {
                tree.insert(doc.clone());
            }
            index.tree = tree;
            index.built_version = version;
        }
        Some(index.tree.lookup(query))
    }
}

/// A collection is also a chain sink: the transform pipeline mirrors
/// packets into the public collection by delivering them here. Unrecognised
/// shapes are ignored; handler failures do not tear down the graph.
impl ChainReceiver for CollectionCore {
    fn chain_receive(&self, packet: &ChainPacket) -> bool {
        if self.dropped.get() {
            return false;
        }
        let Some(core) = self.weak_self.upgrade() else {
            return false;
        };
        let handle = Collection { core };
        match packet {
            ChainPacket::SetData { docs, options } => {
                let _ = handle.set_data(docs.clone(), options.clone());
            }
            ChainPacket::Insert { docs, options } => {
                let _ = options;
                let _ = handle.insert_many(docs.clone());
            }
            ChainPacket::Update {
                query,
                update,
                options,
            } => {
                let _ = handle.update(query, update, options.clone());
            }
            ChainPacket::Remove { query, options } => {
                let _ = handle.remove(query, options.clone());
            }
            ChainPacket::PrimaryKey { field } => {
                handle.set_primary_key(field);
            }
        }
        false
    }

    fn chain_alive(&self) -> bool {
        !self.dropped.get()
    }
}

fn rebuild_primary(state: &mut CollectionState, pk: &str) {
    state.primary.clear();
    for (pos, doc) in state.data.iter().enumerate() {
        if let Some(key) = doc_identity(doc, pk) {
            state.primary.insert(key, pos);
        }
    }
}

fn doc_identity(doc: &Document, pk: &str) -> Option<String> {
    doc.get(pk).map(value::pk_key)
}

/// Documents arriving without an identity get one assigned.
fn ensure_id(doc: &mut Document, pk: &str) {
    if !doc.contains_key(pk) {
        doc.insert(pk.to_string(), uuid::Uuid::new_v4().to_string());
    }
}
