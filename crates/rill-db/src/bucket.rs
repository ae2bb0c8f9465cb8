//! Order-maintenance index for sorted views: given the current tracked
//! population, report where a document belongs so the containing sequence
//! stays sorted under an [`OrderSpec`].

use std::cmp::Ordering;

use bson::{Bson, Document};
use rill_query::{OrderSpec, value};

struct BucketEntry {
    key: Vec<Option<Bson>>,
    id: String,
}

pub struct ActiveBucket {
    spec: OrderSpec,
    primary_key: String,
    entries: Vec<BucketEntry>,
}

impl ActiveBucket {
    pub fn new(spec: OrderSpec) -> Self {
        Self {
            spec,
            primary_key: "_id".to_string(),
            entries: Vec::new(),
        }
    }

    /// Identity field used to locate prior placements on `remove`.
    pub fn set_primary_key(&mut self, field: &str) {
        self.primary_key = field.to_string();
    }

    /// Record the document and return the index at which it should be
    /// placed so the maintained sequence stays sorted. Ties break by
    /// insertion order (new entries land after existing equals).
    pub fn insert(&mut self, doc: &Document) -> usize {
        let key = self.spec.key_of(doc);
        let spec = &self.spec;
        let index = self
            .entries
            .partition_point(|entry| spec.compare_keys(&entry.key, &key) != Ordering::Greater);
        let id = self.identity(doc);
        self.entries.insert(index, BucketEntry { key, id });
        index
    }

    /// Unplace the document, identified by primary key.
    pub fn remove(&mut self, doc: &Document) -> bool {
        let id = self.identity(doc);
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn identity(&self, doc: &Document) -> String {
        doc.get(&self.primary_key)
            .map(value::pk_key)
            .unwrap_or_default()
    }
}
