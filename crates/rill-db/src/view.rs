//! Materialized views: query-filtered, optionally transformed, optionally
//! ordered projections of a source collection, kept live by intercepting
//! the source's chain packets.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bson::{Bson, Document};
use rill_query::{FindOptions, OrderSpec, matches, parse_filter};

use crate::bucket::ActiveBucket;
use crate::chain::{ChainPacket, ChainReceiver};
use crate::collection::{Collection, TransformConfig, TransformHook};
use crate::cursor::Cursor;
use crate::database::DatabaseCore;
use crate::emitter::{CollectionEvent, Emitter, ListenerId, ViewEvent};
use crate::error::DbError;
use crate::reactor::{ReactorIo, TransformFn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewState {
    Initialised,
    Bound,
    Dropped,
}

/// Transform pipeline settings. `enabled: None` keeps the current state;
/// the hooks given replace the configured ones wholesale.
#[derive(Clone, Default)]
pub struct TransformSettings {
    pub enabled: Option<bool>,
    pub data_in: Option<TransformHook>,
    pub data_out: Option<TransformHook>,
}

pub(crate) struct ViewCore {
    weak_self: Weak<ViewCore>,
    name: String,
    state: Cell<ViewState>,
    db: RefCell<Option<Weak<DatabaseCore>>>,
    query: RefCell<Option<Document>>,
    options: RefCell<FindOptions>,
    source: RefCell<Option<Collection>>,
    io: RefCell<Option<Rc<ReactorIo>>>,
    source_listener: Cell<Option<ListenerId>>,
    private_data: Collection,
    public_data: RefCell<Option<Collection>>,
    public_io: RefCell<Option<Rc<ReactorIo>>>,
    bucket: RefCell<Option<ActiveBucket>>,
    cursor: Cell<Cursor>,
    events: Emitter<ViewEvent>,
}

/// Cheap-clone handle to a materialized view.
#[derive(Clone)]
pub struct View {
    core: Rc<ViewCore>,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View").field("name", &self.core.name).finish()
    }
}

impl View {
    pub fn new(name: &str, query: Option<Document>, options: Option<FindOptions>) -> Self {
        let core = Rc::new_cyclic(|weak| ViewCore {
            weak_self: weak.clone(),
            name: name.to_string(),
            state: Cell::new(ViewState::Initialised),
            db: RefCell::new(None),
            query: RefCell::new(query),
            options: RefCell::new(options.unwrap_or_default()),
            source: RefCell::new(None),
            io: RefCell::new(None),
            source_listener: Cell::new(None),
            private_data: Collection::new(format!("{name}_internalPrivate")),
            public_data: RefCell::new(None),
            public_io: RefCell::new(None),
            bucket: RefCell::new(None),
            cursor: Cell::new(Cursor::default()),
            events: Emitter::new(),
        });
        Self { core }
    }

    pub fn name(&self) -> String {
        self.core.name.clone()
    }

    // ── Binding ─────────────────────────────────────────────────

    /// Bind to a source collection: dispose any previous wiring, subscribe
    /// to the source's drop notification, interpose the query-gating
    /// reactor, then seed from `source.find(query, options)`.
    pub fn from(&self, source: &Collection) -> Result<(), DbError> {
        let core = &self.core;
        if core.state.get() == ViewState::Dropped {
            return Err(DbError::Dropped(format!("view `{}`", core.name)));
        }
        self.detach_source();

        *core.source.borrow_mut() = Some(source.clone());
        source.register_view(core.weak_self.clone());

        let weak = core.weak_self.clone();
        let listener = source.on(move |event| {
            if matches!(event, CollectionEvent::Drop) {
                if let Some(view) = weak.upgrade() {
                    view.handle_source_drop();
                }
            }
        });
        core.source_listener.set(Some(listener));

        let weak = core.weak_self.clone();
        let transform: TransformFn = Box::new(move |io, packet| match weak.upgrade() {
            Some(view) => view.gate_packet(io, packet),
            None => false,
        });
        let sink: Rc<dyn ChainReceiver> = core.clone();
        *core.io.borrow_mut() = Some(ReactorIo::new(source, sink, transform));

        core.private_data.set_primary_key(&source.primary_key());
        self.pull(source)?;
        core.state.set(ViewState::Bound);
        Ok(())
    }

    /// Bind to another view: its private collection becomes the upstream,
    /// bypassing that view's transform layer.
    pub fn from_view(&self, source: &View) -> Result<(), DbError> {
        self.from(&source.core.private_data)
    }

    /// Bind by collection name, resolved through the owning database.
    pub fn from_named(&self, name: &str) -> Result<(), DbError> {
        let db = self.core.db.borrow().clone().and_then(|w| w.upgrade());
        let source = db
            .and_then(|db| db.collection_if_exists(name))
            .ok_or_else(|| DbError::CollectionNotFound(name.to_string()))?;
        self.from(&source)
    }

    fn detach_source(&self) {
        let core = &self.core;
        if let Some(io) = core.io.borrow_mut().take() {
            io.drop_io();
        }
        if let Some(source) = core.source.borrow_mut().take() {
            if let Some(id) = core.source_listener.take() {
                source.off(id);
            }
            source.unregister_view(&core.weak_self);
        }
    }

    /// Re-pull the full result set from the source and rebuild the order
    /// index.
    pub fn refresh(&self) -> Result<(), DbError> {
        if self.core.state.get() == ViewState::Dropped {
            return Ok(());
        }
        let Some(source) = self.core.source.borrow().clone() else {
            return Ok(());
        };
        self.pull(&source)
    }

    fn pull(&self, source: &Collection) -> Result<(), DbError> {
        let core = &self.core;
        let query = core.query.borrow().clone().unwrap_or_default();
        let options = core.options.borrow().clone();
        let (docs, cursor) = source.find_with_cursor(&query, &options)?;
        core.cursor.set(cursor);
        core.private_data.set_data(docs, None)?;
        core.rebuild_bucket();
        Ok(())
    }

    // ── Query settings ──────────────────────────────────────────

    pub fn query(
        &self,
        query: Option<Document>,
        options: Option<FindOptions>,
        refresh: bool,
    ) -> Result<(), DbError> {
        let core = &self.core;
        if core.state.get() == ViewState::Dropped {
            return Ok(());
        }
        if let Some(query) = query {
            *core.query.borrow_mut() = Some(query);
            let event = ViewEvent::QueryChange {
                query: core.query.borrow().clone(),
            };
            core.events.emit(&event);
        }
        if let Some(options) = options {
            *core.options.borrow_mut() = options;
            let event = ViewEvent::QueryOptionsChange {
                options: core.options.borrow().clone(),
            };
            core.events.emit(&event);
        }
        if refresh {
            self.refresh()?;
        }
        Ok(())
    }

    pub fn query_get(&self) -> Option<Document> {
        self.core.query.borrow().clone()
    }

    /// Merge keys into the current query. With `overwrite` false, existing
    /// keys keep their values.
    pub fn query_add(
        &self,
        patch: Document,
        overwrite: bool,
        refresh: bool,
    ) -> Result<(), DbError> {
        {
            let mut slot = self.core.query.borrow_mut();
            let query = slot.get_or_insert_with(Document::new);
            for (key, val) in patch {
                if overwrite || !query.contains_key(&key) {
                    query.insert(key, val);
                }
            }
        }
        let event = ViewEvent::QueryChange {
            query: self.core.query.borrow().clone(),
        };
        self.core.events.emit(&event);
        if refresh {
            self.refresh()?;
        }
        Ok(())
    }

    /// Delete the keys named in `patch` from the current query.
    pub fn query_remove(&self, patch: Document, refresh: bool) -> Result<(), DbError> {
        {
            let mut slot = self.core.query.borrow_mut();
            if let Some(query) = slot.as_mut() {
                for key in patch.keys() {
                    query.remove(key);
                }
            }
        }
        let event = ViewEvent::QueryChange {
            query: self.core.query.borrow().clone(),
        };
        self.core.events.emit(&event);
        if refresh {
            self.refresh()?;
        }
        Ok(())
    }

    pub fn query_options(&self, options: FindOptions, refresh: bool) -> Result<(), DbError> {
        *self.core.options.borrow_mut() = options;
        let event = ViewEvent::QueryOptionsChange {
            options: self.core.options.borrow().clone(),
        };
        self.core.events.emit(&event);
        if refresh {
            self.refresh()?;
        }
        Ok(())
    }

    pub fn query_options_get(&self) -> FindOptions {
        self.core.options.borrow().clone()
    }

    pub fn order_by(&self, spec: Option<OrderSpec>) -> Result<(), DbError> {
        self.core.options.borrow_mut().order_by = spec;
        let event = ViewEvent::QueryOptionsChange {
            options: self.core.options.borrow().clone(),
        };
        self.core.events.emit(&event);
        self.refresh()
    }

    // ── Paging ──────────────────────────────────────────────────

    pub fn page(&self, page: usize) -> Result<(), DbError> {
        {
            let mut options = self.core.options.borrow_mut();
            if options.page == Some(page) {
                return Ok(());
            }
            options.page = Some(page);
        }
        let event = ViewEvent::QueryOptionsChange {
            options: self.core.options.borrow().clone(),
        };
        self.core.events.emit(&event);
        self.refresh()
    }

    pub fn page_first(&self) -> Result<(), DbError> {
        self.page(0)
    }

    pub fn page_last(&self) -> Result<(), DbError> {
        let pages = self.cursor().pages;
        self.page(pages.saturating_sub(1))
    }

    /// Move `delta` pages from the current one, clamped to the cursor's
    /// page range.
    pub fn page_scan(&self, delta: i64) -> Result<(), DbError> {
        let cursor = self.cursor();
        let current = self.core.options.borrow().page.unwrap_or(cursor.page) as i64;
        let last = cursor.pages.saturating_sub(1) as i64;
        let next = (current + delta).clamp(0, last.max(0));
        self.page(next as usize)
    }

    /// Pagination summary recorded at the last refresh.
    pub fn cursor(&self) -> Cursor {
        self.core.cursor.get()
    }

    // ── Reads (delegate to the public surface) ──────────────────

    /// The collection reads are served from: the transformed public
    /// projection when transforms are enabled, else the private data.
    pub fn public_data(&self) -> Collection {
        self.core
            .public_data
            .borrow()
            .clone()
            .unwrap_or_else(|| self.core.private_data.clone())
    }

    pub fn private_data(&self) -> Collection {
        self.core.private_data.clone()
    }

    pub fn find(&self, query: &Document, options: &FindOptions) -> Result<Vec<Document>, DbError> {
        let options = self.inject_sub_from(options.clone());
        self.public_data().find(query, &options)
    }

    pub fn find_one(
        &self,
        query: &Document,
        options: &FindOptions,
    ) -> Result<Option<Document>, DbError> {
        let options = self.inject_sub_from(options.clone());
        self.public_data().find_one(query, &options)
    }

    pub fn find_by_id(&self, id: &Bson) -> Option<Document> {
        self.public_data().find_by_id(id)
    }

    pub fn find_sub(
        &self,
        query: &Document,
        sub_path: &str,
        sub_query: &Document,
        sub_options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        self.public_data()
            .find_sub(query, sub_path, sub_query, sub_options)
    }

    pub fn find_sub_one(
        &self,
        query: &Document,
        sub_path: &str,
        sub_query: &Document,
        sub_options: &FindOptions,
    ) -> Result<Option<Document>, DbError> {
        self.public_data()
            .find_sub_one(query, sub_path, sub_query, sub_options)
    }

    pub fn distinct(&self, field: &str, query: &Document) -> Result<Vec<Bson>, DbError> {
        self.public_data().distinct(field, query)
    }

    pub fn filter(&self, predicate: impl Fn(&Document) -> bool) -> Vec<Document> {
        self.public_data().filter(predicate)
    }

    pub fn count(&self, query: Option<&Document>) -> Result<usize, DbError> {
        self.public_data().count(query)
    }

    pub fn subset(&self, query: &Document, options: &FindOptions) -> Result<Collection, DbError> {
        self.public_data().subset(query, options)
    }

    /// Views inject their private collection's name into sub-queries that
    /// don't say where to search.
    fn inject_sub_from(&self, mut options: FindOptions) -> FindOptions {
        let name = self.core.private_data.name();
        if let Some(sub) = options.find_sub.as_mut() {
            if sub.from.is_none() {
                sub.from = Some(name.clone());
            }
        }
        if let Some(sub) = options.find_sub_one.as_mut() {
            if sub.from.is_none() {
                sub.from = Some(name);
            }
        }
        options
    }

    // ── Writes (pass through to the source) ─────────────────────

    pub fn insert(&self, doc: Document) -> Result<Document, DbError> {
        self.source_or_err()?.insert(doc)
    }

    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>, DbError> {
        self.source_or_err()?.insert_many(docs)
    }

    pub fn update(
        &self,
        query: &Document,
        update: &Document,
        options: Option<Document>,
    ) -> Result<Vec<Document>, DbError> {
        self.source_or_err()?.update(query, update, options)
    }

    pub fn update_by_id(&self, id: Bson, update: &Document) -> Result<Vec<Document>, DbError> {
        self.source_or_err()?.update_by_id(id, update)
    }

    pub fn remove(
        &self,
        query: &Document,
        options: Option<Document>,
    ) -> Result<Vec<Document>, DbError> {
        self.source_or_err()?.remove(query, options)
    }

    /// Writes are never applied to the view's own data; they route to the
    /// bound source and re-enter through the chain.
    fn source_or_err(&self) -> Result<Collection, DbError> {
        if self.core.state.get() == ViewState::Dropped {
            return Err(DbError::Dropped(format!("view `{}`", self.core.name)));
        }
        self.core
            .source
            .borrow()
            .clone()
            .ok_or_else(|| DbError::NotBound(self.core.name.clone()))
    }

    // ── Indexing / transforms ───────────────────────────────────

    pub fn ensure_index(&self, spec: OrderSpec) -> Result<(), DbError> {
        self.core.private_data.ensure_index(spec)
    }

    /// Enable, reconfigure, or disable the public projection.
    ///
    /// Enabling allocates the public collection, mirrors every private
    /// chain packet into it, and seeds it from the private contents (so
    /// `data_in` runs over the existing documents too). Disabling drops the
    /// public collection and its mirror.
    pub fn transform(&self, settings: TransformSettings) -> Result<(), DbError> {
        let core = &self.core;
        if core.state.get() == ViewState::Dropped {
            return Err(DbError::Dropped(format!("view `{}`", core.name)));
        }
        let currently_enabled = core.public_data.borrow().is_some();
        let enable = settings.enabled.unwrap_or(currently_enabled);

        if !enable {
            if let Some(io) = core.public_io.borrow_mut().take() {
                io.drop_io();
            }
            if let Some(public) = core.public_data.borrow_mut().take() {
                public.drop();
            }
            return Ok(());
        }

        let config = TransformConfig {
            enabled: true,
            data_in: settings.data_in,
            data_out: settings.data_out,
        };
        let seed = core
            .private_data
            .find(&Document::new(), &FindOptions::default())?;

        if currently_enabled {
            let public = core.public_data.borrow().clone();
            if let Some(public) = public {
                public.transform(config);
                public.set_data(seed, None)?;
            }
            return Ok(());
        }

        let public = Collection::new(format!("{}_internalPublic", core.name));
        public.set_primary_key(&core.private_data.primary_key());
        public.transform(config);
        let mirror = ReactorIo::new(
            &core.private_data,
            public.as_receiver(),
            Box::new(|_, _| false),
        );
        public.set_data(seed, None)?;
        *core.public_io.borrow_mut() = Some(mirror);
        *core.public_data.borrow_mut() = Some(public);
        Ok(())
    }

    // ── Events / lifecycle ──────────────────────────────────────

    pub fn on(&self, callback: impl Fn(&ViewEvent) + 'static) -> ListenerId {
        self.core.events.on(callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.core.events.off(id)
    }

    /// Tear down: detach from the source, dispose both reactors, drop the
    /// private (and public) collections, unregister from the database.
    /// Idempotent; returns whether this call dropped it.
    pub fn drop(&self) -> bool {
        let core = &self.core;
        if core.state.get() == ViewState::Dropped {
            return false;
        }
        core.state.set(ViewState::Dropped);
        self.detach_source();
        if let Some(io) = core.public_io.borrow_mut().take() {
            io.drop_io();
        }
        if let Some(public) = core.public_data.borrow_mut().take() {
            public.drop();
        }
        core.private_data.drop();
        if let Some(db) = core.db.borrow().clone().and_then(|w| w.upgrade()) {
            db.remove_view(&core.name);
        }
        core.events.emit(&ViewEvent::Drop);
        core.events.clear();
        true
    }

    pub fn is_dropped(&self) -> bool {
        self.core.state.get() == ViewState::Dropped
    }

    pub fn is_bound(&self) -> bool {
        self.core.state.get() == ViewState::Bound
    }

    pub(crate) fn attach_db(&self, db: Weak<DatabaseCore>) {
        *self.core.db.borrow_mut() = Some(db);
    }
}

impl ViewCore {
    pub(crate) fn view_name(&self) -> String {
        self.name.clone()
    }

    /// The query-gated transform interposed between the source and this
    /// view's handler.
    ///
    /// No query set: packets flow through verbatim. With a query, inserts
    /// are filtered down to matching documents (suppressed entirely when
    /// none survive) and updates are re-expressed as the insert/update/
    /// remove difference between the view's contents and the source's
    /// current matching subset. Everything else falls through.
    fn gate_packet(&self, io: &ReactorIo, packet: &ChainPacket) -> bool {
        if self.state.get() == ViewState::Dropped {
            return false;
        }
        let Some(query) = self.query.borrow().clone() else {
            return false;
        };
        let Ok(expr) = parse_filter(&query) else {
            return false;
        };

        match packet {
            ChainPacket::Insert { docs, options } => {
                let survivors: Vec<Document> =
                    docs.iter().filter(|d| matches(d, &expr)).cloned().collect();
                if !survivors.is_empty() {
                    io.chain_send(&ChainPacket::Insert {
                        docs: survivors,
                        options: options.clone(),
                    });
                }
                true
            }
            ChainPacket::Update { .. } => {
                let Some(source) = self.source.borrow().clone() else {
                    return false;
                };
                let options = self.options.borrow().clone();
                let Ok(subset) = source.subset(&query, &options) else {
                    return false;
                };
                let diff = self.private_data.diff(&subset);
                if diff.is_empty() {
                    return false;
                }
                let pk = self.private_data.primary_key();
                if !diff.insert.is_empty() {
                    io.chain_send(&ChainPacket::Insert {
                        docs: diff.insert,
                        options: None,
                    });
                }
                for doc in &diff.update {
                    let mut query = Document::new();
                    query.insert(pk.clone(), doc.get(&pk).cloned().unwrap_or(Bson::Null));
                    io.chain_send(&ChainPacket::Update {
                        query,
                        update: doc.clone(),
                        options: None,
                    });
                }
                if !diff.remove.is_empty() {
                    let branches: Vec<Bson> = diff
                        .remove
                        .iter()
                        .map(|doc| {
                            let mut branch = Document::new();
                            branch
                                .insert(pk.clone(), doc.get(&pk).cloned().unwrap_or(Bson::Null));
                            Bson::Document(branch)
                        })
                        .collect();
                    let mut query = Document::new();
                    query.insert("$or".to_string(), Bson::Array(branches));
                    io.chain_send(&ChainPacket::Remove {
                        query,
                        options: None,
                    });
                }
                true
            }
            _ => false,
        }
    }

    fn handle_insert(&self, docs: &[Document]) {
        let ordered = self.options.borrow().order_by.is_some();
        if !ordered {
            let _ = self.private_data.insert_many(docs.to_vec());
            return;
        }
        for doc in docs {
            let index = {
                let mut bucket = self.bucket.borrow_mut();
                match bucket.as_mut() {
                    Some(bucket) => bucket.insert(doc),
                    None => usize::MAX,
                }
            };
            let _ = self.private_data.insert_at(doc.clone(), index);
        }
    }

    fn handle_update(&self, query: &Document, update: &Document, options: Option<Document>) {
        let Ok(changed) = self.private_data.update(query, update, options) else {
            return;
        };
        if self.options.borrow().order_by.is_none() {
            return;
        }
        for doc in &changed {
            let from = self.private_data.position_of(doc);
            let to = {
                let mut bucket = self.bucket.borrow_mut();
                match bucket.as_mut() {
                    Some(bucket) => {
                        bucket.remove(doc);
                        Some(bucket.insert(doc))
                    }
                    None => None,
                }
            };
            // The two structures can disagree after external interference;
            // a no-op move is legal.
            if let (Some(from), Some(to)) = (from, to) {
                if from != to {
                    self.private_data.relocate(from, to);
                }
            }
        }
    }

    fn rebuild_bucket(&self) {
        let spec = self.options.borrow().order_by.clone();
        let mut slot = self.bucket.borrow_mut();
        match spec {
            Some(spec) => {
                let mut bucket = ActiveBucket::new(spec);
                bucket.set_primary_key(&self.private_data.primary_key());
                for doc in self.private_data.contents() {
                    bucket.insert(&doc);
                }
                *slot = Some(bucket);
            }
            None => *slot = None,
        }
    }

    /// Upstream drop: forget the source without dropping this view; its
    /// contents keep reflecting the last known state.
    fn handle_source_drop(&self) {
        if let Some(io) = self.io.borrow_mut().take() {
            io.drop_io();
        }
        *self.source.borrow_mut() = None;
        self.source_listener.set(None);
        if self.state.get() == ViewState::Bound {
            self.state.set(ViewState::Initialised);
        }
    }
}

/// The view is the sink of its own reactor: gated packets land here and
/// mutate the private collection, keeping the order index in step.
impl ChainReceiver for ViewCore {
    fn chain_receive(&self, packet: &ChainPacket) -> bool {
        if self.state.get() == ViewState::Dropped {
            return false;
        }
        match packet {
            ChainPacket::SetData { .. } => {
                if let Some(source) = self.source.borrow().clone() {
                    let query = self.query.borrow().clone().unwrap_or_default();
                    let options = self.options.borrow().clone();
                    if let Ok(docs) = source.find(&query, &options) {
                        let _ = self.private_data.set_data(docs, None);
                        self.rebuild_bucket();
                    }
                }
            }
            ChainPacket::Insert { docs, .. } => self.handle_insert(docs),
            ChainPacket::Update {
                query,
                update,
                options,
            } => self.handle_update(query, update, options.clone()),
            ChainPacket::Remove { query, options } => {
                if let Ok(removed) = self.private_data.remove(query, options.clone()) {
                    if let Some(bucket) = self.bucket.borrow_mut().as_mut() {
                        for doc in &removed {
                            bucket.remove(doc);
                        }
                    }
                }
            }
            ChainPacket::PrimaryKey { field } => {
                self.private_data.set_primary_key(field);
                if let Some(bucket) = self.bucket.borrow_mut().as_mut() {
                    bucket.set_primary_key(field);
                }
            }
        }
        false
    }

    fn chain_alive(&self) -> bool {
        self.state.get() != ViewState::Dropped
    }
}
