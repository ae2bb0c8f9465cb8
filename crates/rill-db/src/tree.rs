//! Multi-level ternary index tree.
//!
//! One tree level per field of its [`OrderSpec`]. Within a level, documents
//! ordering below the node key go left, above go right; documents equal on
//! this level's field join the node's `store` bag and, when deeper levels
//! remain, are also indexed into the `middle` subtree on the tail of the
//! spec. In-order traversal therefore yields the full compound-key order,
//! with ties on earlier fields resolved by deeper levels.

use bson::{Bson, Document};
use rill_query::{OrderSpec, SortDirection, path, value};

/// Outcome of a batch insert: each item is placed independently; only
/// non-document values fail.
#[derive(Debug, Default)]
pub struct TreeInsertResult {
    pub inserted: Vec<Document>,
    pub failed: Vec<Bson>,
}

pub struct MultiLevelTree {
    spec: OrderSpec,
    data: Option<Document>,
    store: Vec<Document>,
    left: Option<Box<MultiLevelTree>>,
    middle: Option<Box<MultiLevelTree>>,
    right: Option<Box<MultiLevelTree>>,
}

impl MultiLevelTree {
    pub fn new(spec: OrderSpec) -> Self {
        Self {
            spec,
            data: None,
            store: Vec::new(),
            left: None,
            middle: None,
            right: None,
        }
    }

    pub fn insert(&mut self, doc: Document) {
        let Some(field) = self.spec.head().cloned() else {
            // Past the last level every document is a tie; keep the bag.
            self.store.push(doc);
            return;
        };

        let Some(node_key) = self.data.clone() else {
            self.data = Some(doc.clone());
            self.store.push(doc.clone());
            if self.spec.len() > 1 {
                let tail = self.spec.tail();
                self.middle
                    .get_or_insert_with(|| Box::new(Self::new(tail)))
                    .insert(doc);
            }
            return;
        };

        let ord = compare_on(&doc, &node_key, &field);
        match ord {
            std::cmp::Ordering::Less => {
                let spec = self.spec.clone();
                self.left
                    .get_or_insert_with(|| Box::new(Self::new(spec)))
                    .insert(doc);
            }
            std::cmp::Ordering::Greater => {
                let spec = self.spec.clone();
                self.right
                    .get_or_insert_with(|| Box::new(Self::new(spec)))
                    .insert(doc);
            }
            std::cmp::Ordering::Equal => {
                self.store.push(doc.clone());
                if self.spec.len() > 1 {
                    let tail = self.spec.tail();
                    self.middle
                        .get_or_insert_with(|| Box::new(Self::new(tail)))
                        .insert(doc);
                }
            }
        }
    }

    /// Insert a batch sequentially; each item is placed independently.
    pub fn insert_many(&mut self, values: Vec<Bson>) -> TreeInsertResult {
        let mut result = TreeInsertResult::default();
        for item in values {
            match item {
                Bson::Document(doc) => {
                    self.insert(doc.clone());
                    result.inserted.push(doc);
                }
                other => result.failed.push(other),
            }
        }
        result
    }

    /// Full in-order traversal: left, then middle (which resolves deeper
    /// ties) or the leaf bag in insertion order, then right.
    pub fn in_order(&self) -> Vec<Document> {
        let mut out = Vec::new();
        self.walk(&mut out);
        out
    }

    fn walk(&self, out: &mut Vec<Document>) {
        if let Some(left) = &self.left {
            left.walk(out);
        }
        if let Some(middle) = &self.middle {
            middle.walk(out);
        } else {
            out.extend(self.store.iter().cloned());
        }
        if let Some(right) = &self.right {
            right.walk(out);
        }
    }

    /// Search by equality constraints. At each level, a query that
    /// constrains this level's field with a direct value narrows to one
    /// subtree; an equal key strips the field from a decoupled query copy
    /// and descends into the middle level. An unconstrained level gathers
    /// everything beneath it.
    pub fn lookup(&self, query: &Document) -> Vec<Document> {
        let mut out = Vec::new();
        self.lookup_into(query, &mut out);
        out
    }

    fn lookup_into(&self, query: &Document, out: &mut Vec<Document>) {
        let Some(field) = self.spec.head().cloned() else {
            out.extend(self.store.iter().cloned());
            return;
        };

        let constraint = query
            .get(&field.path)
            .filter(|v| !matches!(v, Bson::Document(_)));

        let Some(constraint) = constraint else {
            if let Some(left) = &self.left {
                left.lookup_into(query, out);
            }
            if let Some(middle) = &self.middle {
                middle.lookup_into(query, out);
            } else {
                out.extend(self.store.iter().cloned());
            }
            if let Some(right) = &self.right {
                right.lookup_into(query, out);
            }
            return;
        };

        let Some(node_key) = &self.data else {
            return;
        };
        let node_value = path::get(node_key, &field.path);
        let ord = directional(value::compare(Some(constraint), node_value), &field);
        match ord {
            std::cmp::Ordering::Less => {
                if let Some(left) = &self.left {
                    left.lookup_into(query, out);
                }
            }
            std::cmp::Ordering::Greater => {
                if let Some(right) = &self.right {
                    right.lookup_into(query, out);
                }
            }
            std::cmp::Ordering::Equal => {
                let mut stripped = query.clone();
                stripped.remove(&field.path);
                if let Some(middle) = &self.middle {
                    middle.lookup_into(&stripped, out);
                } else {
                    out.extend(self.store.iter().cloned());
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.store.is_empty()
    }
}

fn compare_on(a: &Document, b: &Document, field: &rill_query::SortField) -> std::cmp::Ordering {
    directional(
        value::compare(path::get(a, &field.path), path::get(b, &field.path)),
        field,
    )
}

fn directional(
    ord: std::cmp::Ordering,
    field: &rill_query::SortField,
) -> std::cmp::Ordering {
    match field.direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn ids(docs: &[Document]) -> Vec<i32> {
        docs.iter()
            .map(|d| match d.get("_id") {
                Some(Bson::Int32(n)) => *n,
                other => panic!("unexpected id {other:?}"),
            })
            .collect()
    }

    #[test]
    fn single_level_in_order() {
        let mut tree = MultiLevelTree::new(OrderSpec::from_doc(&doc! { "n": 1 }));
        for (id, n) in [(1, 3), (2, 1), (3, 2), (4, 1)] {
            tree.insert(doc! { "_id": id, "n": n });
        }
        let out = tree.in_order();
        assert_eq!(ids(&out), vec![2, 4, 3, 1]); // ties keep insertion order
    }

    #[test]
    fn descending_level_reverses() {
        let mut tree = MultiLevelTree::new(OrderSpec::from_doc(&doc! { "n": -1 }));
        for (id, n) in [(1, 1), (2, 3), (3, 2)] {
            tree.insert(doc! { "_id": id, "n": n });
        }
        assert_eq!(ids(&tree.in_order()), vec![2, 3, 1]);
    }

    #[test]
    fn compound_key_resolves_ties_on_deeper_level() {
        let mut tree = MultiLevelTree::new(OrderSpec::from_doc(&doc! { "a": 1, "b": 1 }));
        tree.insert(doc! { "_id": 1, "a": 1, "b": 2 });
        tree.insert(doc! { "_id": 2, "a": 1, "b": 1 });
        tree.insert(doc! { "_id": 3, "a": 0, "b": 9 });
        assert_eq!(ids(&tree.in_order()), vec![3, 2, 1]);
    }

    #[test]
    fn insert_many_reports_failures() {
        let mut tree = MultiLevelTree::new(OrderSpec::from_doc(&doc! { "n": 1 }));
        let result = tree.insert_many(vec![
            Bson::Document(doc! { "_id": 1, "n": 1 }),
            Bson::Int32(9),
        ]);
        assert_eq!(result.inserted.len(), 1);
        assert_eq!(result.failed, vec![Bson::Int32(9)]);
    }

    #[test]
    fn lookup_prefix_and_exact() {
        let mut tree = MultiLevelTree::new(OrderSpec::from_doc(&doc! { "a": 1, "b": 1 }));
        tree.insert(doc! { "_id": 1, "a": 1, "b": 1 });
        tree.insert(doc! { "_id": 2, "a": 1, "b": 2 });
        tree.insert(doc! { "_id": 3, "a": 2, "b": 1 });

        let prefix = tree.lookup(&doc! { "a": 1 });
        assert_eq!(ids(&prefix), vec![1, 2]); // sorted by b

        let exact = tree.lookup(&doc! { "a": 1, "b": 2 });
        assert_eq!(ids(&exact), vec![2]);

        let all = tree.lookup(&doc! {});
        assert_eq!(all.len(), 3);

        assert!(tree.lookup(&doc! { "a": 9 }).is_empty());
    }
}
