//! Value comparison and identity encoding shared by matching, sorting,
//! the order index, and the multi-level tree.

use std::cmp::Ordering;

use bson::Bson;

/// Total order used for sorting: a missing value sorts before any present
/// value; incomparable type pairs compare equal (the query layer handles
/// type coercion, the ordering layer does not).
pub fn compare(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => try_compare(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Compare two present values, returning `None` for incomparable type
/// pairs. Numbers compare numerically across Int32/Int64/Double. Strings
/// compare by Unicode code point — this function is the collation hook;
/// a locale-aware collator replaces it wholesale.
pub fn try_compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (numeric(a), numeric(b)) {
        return a.partial_cmp(&b);
    }
    match (a, b) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => {
            Some(a.timestamp_millis().cmp(&b.timestamp_millis()))
        }
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Equality with numeric unification; non-scalar values fall back to
/// structural equality.
pub fn eq(a: &Bson, b: &Bson) -> bool {
    if let (Some(a), Some(b)) = (numeric(a), numeric(b)) {
        return a == b;
    }
    match (a, b) {
        (Bson::String(a), Bson::String(b)) => a == b,
        (Bson::Boolean(a), Bson::Boolean(b)) => a == b,
        (Bson::DateTime(a), Bson::DateTime(b)) => a.timestamp_millis() == b.timestamp_millis(),
        (Bson::Null, Bson::Null) => true,
        _ => a == b,
    }
}

/// Canonical identity encoding for primary-key values. Unifies the three
/// numeric representations so `Int32(1)`, `Int64(1)` and `Double(1.0)`
/// identify the same document.
pub fn pk_key(value: &Bson) -> String {
    if let Some(n) = numeric(value) {
        return format!("n:{n}");
    }
    match value {
        Bson::String(s) => format!("s:{s}"),
        Bson::Boolean(b) => format!("b:{b}"),
        Bson::DateTime(d) => format!("d:{}", d.timestamp_millis()),
        Bson::Null => "null".to_string(),
        other => format!("x:{other:?}"),
    }
}

fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}
