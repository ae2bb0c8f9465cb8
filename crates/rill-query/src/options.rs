use bson::{Bson, Document};

use crate::sort::OrderSpec;

/// Typed counterpart of the query-option document recognised by `find`.
///
/// | Field | Source key |
/// |-------|-----------|
/// | `order_by` | `$orderBy` |
/// | `page` | `$page` |
/// | `limit` | `$limit` |
/// | `decouple` | `$decouple` |
/// | `find_sub` / `find_sub_one` | `$findSub` / `$findSubOne` |
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub order_by: Option<OrderSpec>,
    /// Zero-based page index, applied together with `limit`.
    pub page: Option<usize>,
    pub limit: Option<usize>,
    /// Callers receive deep copies. Defaults to true; with owned document
    /// storage every read is a deep copy regardless, so this is recorded
    /// for contract fidelity rather than behavior.
    pub decouple: bool,
    pub find_sub: Option<SubQuery>,
    pub find_sub_one: Option<SubQuery>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            order_by: None,
            page: None,
            limit: None,
            decouple: true,
            find_sub: None,
            find_sub_one: None,
        }
    }
}

impl FindOptions {
    /// Parse the `$`-keyed option document form.
    pub fn from_doc(doc: &Document) -> Self {
        let mut options = Self::default();
        for (key, val) in doc.iter() {
            match (key.as_str(), val) {
                ("$orderBy", Bson::Document(spec)) => {
                    options.order_by = Some(OrderSpec::from_doc(spec));
                }
                ("$page", v) => options.page = as_usize(v),
                ("$limit", v) => options.limit = as_usize(v),
                ("$decouple", Bson::Boolean(b)) => options.decouple = *b,
                ("$findSub", Bson::Document(sub)) => {
                    options.find_sub = SubQuery::from_doc(sub);
                }
                ("$findSubOne", Bson::Document(sub)) => {
                    options.find_sub_one = SubQuery::from_doc(sub);
                }
                _ => {}
            }
        }
        options
    }

    pub fn ordered(spec: OrderSpec) -> Self {
        Self {
            order_by: Some(spec),
            ..Self::default()
        }
    }
}

/// A sub-document query: search documents at `path` inside the documents of
/// the `from` collection. A view injects its private collection's name when
/// `from` is unset.
#[derive(Debug, Clone)]
pub struct SubQuery {
    pub from: Option<String>,
    pub path: String,
    pub query: Document,
}

impl SubQuery {
    fn from_doc(doc: &Document) -> Option<Self> {
        let path = match doc.get("$path") {
            Some(Bson::String(p)) => p.clone(),
            _ => return None,
        };
        let from = match doc.get("$from") {
            Some(Bson::String(f)) => Some(f.clone()),
            _ => None,
        };
        let query = match doc.get("$query") {
            Some(Bson::Document(q)) => q.clone(),
            _ => Document::new(),
        };
        Some(Self { from, path, query })
    }
}

fn as_usize(v: &Bson) -> Option<usize> {
    match v {
        Bson::Int32(n) if *n >= 0 => Some(*n as usize),
        Bson::Int64(n) if *n >= 0 => Some(*n as usize),
        _ => None,
    }
}
