use std::cmp::Ordering;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::path;
use crate::value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub path: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// An ordered, directional compound sort key — the index specification for
/// ordered views, the order index, and the multi-level tree. Field order is
/// significant: ties on earlier fields fall to later ones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderSpec {
    fields: Vec<SortField>,
}

impl OrderSpec {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    /// Parse the `{ "field": 1 | -1 }` form; entry order is preserved.
    pub fn from_doc(doc: &Document) -> Self {
        let fields = doc
            .iter()
            .map(|(key, dir)| {
                let descending = match dir {
                    Bson::Int32(n) => *n < 0,
                    Bson::Int64(n) => *n < 0,
                    Bson::Double(n) => *n < 0.0,
                    _ => false,
                };
                SortField {
                    path: key.clone(),
                    direction: if descending {
                        SortDirection::Desc
                    } else {
                        SortDirection::Asc
                    },
                }
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn head(&self) -> Option<&SortField> {
        self.fields.first()
    }

    /// The spec minus its first field — the deeper levels of a tree.
    pub fn tail(&self) -> OrderSpec {
        Self {
            fields: self.fields.iter().skip(1).cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Extract the sort-key vector for a document, one slot per field.
    pub fn key_of(&self, doc: &Document) -> Vec<Option<Bson>> {
        self.fields
            .iter()
            .map(|f| path::get(doc, &f.path).cloned())
            .collect()
    }

    /// Compare two pre-extracted key vectors; first non-equal field wins,
    /// descending fields reverse.
    pub fn compare_keys(&self, a: &[Option<Bson>], b: &[Option<Bson>]) -> Ordering {
        for (i, field) in self.fields.iter().enumerate() {
            let ord = value::compare(
                a.get(i).and_then(Option::as_ref),
                b.get(i).and_then(Option::as_ref),
            );
            let ord = match field.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub fn compare_docs(&self, a: &Document, b: &Document) -> Ordering {
        for field in &self.fields {
            let ord = value::compare(path::get(a, &field.path), path::get(b, &field.path));
            let ord = match field.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn from_doc_preserves_order_and_direction() {
        let spec = OrderSpec::from_doc(&doc! { "a": 1, "b": -1 });
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.fields()[0].path, "a");
        assert_eq!(spec.fields()[0].direction, SortDirection::Asc);
        assert_eq!(spec.fields()[1].direction, SortDirection::Desc);
    }

    #[test]
    fn compare_docs_multi_field() {
        let spec = OrderSpec::from_doc(&doc! { "a": 1, "b": -1 });
        let x = doc! { "a": 1, "b": 5 };
        let y = doc! { "a": 1, "b": 9 };
        // Equal on a, descending on b: y sorts first
        assert_eq!(spec.compare_docs(&x, &y), Ordering::Greater);
    }

    #[test]
    fn missing_field_sorts_first_ascending() {
        let spec = OrderSpec::from_doc(&doc! { "n": 1 });
        let missing = doc! { "x": 1 };
        let present = doc! { "n": 0 };
        assert_eq!(spec.compare_docs(&missing, &present), Ordering::Less);
    }

    #[test]
    fn tail_strips_one_level() {
        let spec = OrderSpec::from_doc(&doc! { "a": 1, "b": 1 });
        let tail = spec.tail();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail.fields()[0].path, "b");
    }
}
