use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::expression::Expression;
use crate::path;
use crate::value;

/// Evaluate whether a document matches the given expression.
pub fn matches(doc: &Document, expr: &Expression) -> bool {
    match expr {
        Expression::And(children) => children.iter().all(|c| matches(doc, c)),
        Expression::Or(children) => children.iter().any(|c| matches(doc, c)),
        Expression::Eq(field, val) => eq_matches(doc, field, val),
        Expression::Ne(field, val) => !eq_matches(doc, field, val),
        Expression::Gt(..) | Expression::Gte(..) | Expression::Lt(..) | Expression::Lte(..) => {
            let (field, val, predicate): (&str, &Bson, fn(Ordering) -> bool) = match expr {
                Expression::Gt(f, v) => (f.as_str(), v, |o| o == Ordering::Greater),
                Expression::Gte(f, v) => (f.as_str(), v, |o| o != Ordering::Less),
                Expression::Lt(f, v) => (f.as_str(), v, |o| o == Ordering::Less),
                Expression::Lte(f, v) => (f.as_str(), v, |o| o != Ordering::Greater),
                _ => unreachable!(),
            };
            match path::get(doc, field) {
                Some(Bson::Array(arr)) => arr.iter().any(|elem| cmp_matches(elem, val, predicate)),
                Some(v) => cmp_matches(v, val, predicate),
                None => false,
            }
        }
        Expression::In(field, list) => in_matches(doc, field, list),
        Expression::Nin(field, list) => !in_matches(doc, field, list),
        Expression::Exists(field, expected) => path::get(doc, field).is_some() == *expected,
        Expression::Regex(field, re) => match path::get(doc, field) {
            Some(Bson::String(s)) => re.is_match(s),
            _ => false,
        },
    }
}

/// `$eq` with null accepts an absent field as well as a stored null; an
/// array field matches when any element does.
fn eq_matches(doc: &Document, field: &str, val: &Bson) -> bool {
    let field_value = path::get(doc, field);
    if matches!(val, Bson::Null) {
        return matches!(field_value, None | Some(Bson::Null));
    }
    match field_value {
        Some(Bson::Array(arr)) => arr.iter().any(|elem| value::eq(elem, val)),
        Some(v) => value::eq(v, val),
        None => false,
    }
}

fn cmp_matches(stored: &Bson, query: &Bson, predicate: fn(Ordering) -> bool) -> bool {
    match value::try_compare(stored, query) {
        Some(ord) => predicate(ord),
        None => false,
    }
}

/// $in: an array field matches when any element is listed; a missing field
/// matches when the list contains null.
fn in_matches(doc: &Document, field: &str, list: &[Bson]) -> bool {
    match path::get(doc, field) {
        Some(Bson::Array(arr)) => arr
            .iter()
            .any(|elem| list.iter().any(|cand| value::eq(elem, cand))),
        Some(v) => list.iter().any(|cand| value::eq(v, cand)),
        None => list.iter().any(|cand| matches!(cand, Bson::Null)),
    }
}
