use bson::{Bson, Document};
use regex::RegexBuilder;

use crate::expression::Expression;

/// Error raised when a filter document fails to parse.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParseError(pub String);

impl std::fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "filter parse error: {}", self.0)
    }
}

impl std::error::Error for FilterParseError {}

/// Parse a BSON filter document into an [`Expression`] tree.
///
/// The accepted grammar is MongoDB's: every top-level entry must hold
/// (implicit AND), a bare value means `$eq`, comparison conditions sit in
/// `$`-keyed sub-documents (`{ "age": { "$gt": 21 } }`), and `$and`/`$or`
/// take arrays of nested filters. `$regex` honours a sibling
/// `$options: "i"`; `$exists` tests field presence. The empty filter `{}`
/// parses to an expression matching every document.
pub fn parse_filter(doc: &Document) -> Result<Expression, FilterParseError> {
    let mut children = Vec::new();

    for (key, value) in doc.iter() {
        match key.as_str() {
            "$and" => children.push(parse_logical_array(value, Expression::And)?),
            "$or" => children.push(parse_logical_array(value, Expression::Or)?),
            k if k.starts_with('$') => {
                return Err(FilterParseError(format!(
                    "unrecognised top-level operator: {k}"
                )));
            }
            _ => children.push(parse_field_condition(key, value)?),
        }
    }

    if children.len() == 1 {
        Ok(children.pop().unwrap())
    } else {
        Ok(Expression::And(children))
    }
}

/// Turn a `$and`/`$or` array into the corresponding logical node.
fn parse_logical_array(
    value: &Bson,
    make: fn(Vec<Expression>) -> Expression,
) -> Result<Expression, FilterParseError> {
    let arr = match value {
        Bson::Array(a) => a,
        _ => return Err(FilterParseError("$and/$or expects an array".into())),
    };

    let mut children = Vec::new();
    for elem in arr {
        match elem {
            Bson::Document(sub_doc) => children.push(parse_filter(sub_doc)?),
            _ => {
                return Err(FilterParseError(
                    "$and/$or entries must be documents".into(),
                ));
            }
        }
    }

    if children.is_empty() {
        return Err(FilterParseError("empty $and/$or array".into()));
    }

    Ok(make(children))
}

/// A field entry carries either a bare `$eq` value or a `$`-operator
/// sub-document.
fn parse_field_condition(field: &str, value: &Bson) -> Result<Expression, FilterParseError> {
    // A document value whose first key starts with $ is an operator doc
    if let Bson::Document(sub_doc) = value {
        if let Some(first_key) = sub_doc.keys().next() {
            if first_key.starts_with('$') {
                return parse_operator_doc(field, sub_doc);
            }
        }
    }

    Ok(Expression::Eq(field.to_string(), value.clone()))
}

/// Operator sub-document such as `{ "$gt": 21, "$lte": 100 }`; multiple
/// entries AND together.
fn parse_operator_doc(field: &str, doc: &Document) -> Result<Expression, FilterParseError> {
    let mut conditions: Vec<Expression> = Vec::new();

    for (op_key, op_value) in doc.iter() {
        let field = field.to_string();
        match op_key.as_str() {
            "$eq" => conditions.push(Expression::Eq(field, op_value.clone())),
            "$ne" => conditions.push(Expression::Ne(field, op_value.clone())),
            "$gt" => conditions.push(Expression::Gt(field, op_value.clone())),
            "$gte" => conditions.push(Expression::Gte(field, op_value.clone())),
            "$lt" => conditions.push(Expression::Lt(field, op_value.clone())),
            "$lte" => conditions.push(Expression::Lte(field, op_value.clone())),
            "$in" => conditions.push(Expression::In(field, parse_value_array(op_value)?)),
            "$nin" => conditions.push(Expression::Nin(field, parse_value_array(op_value)?)),
            "$exists" => match op_value {
                Bson::Boolean(expected) => conditions.push(Expression::Exists(field, *expected)),
                _ => return Err(FilterParseError("$exists value must be a boolean".into())),
            },
            "$regex" => {
                let pattern = match op_value {
                    Bson::String(s) => s,
                    _ => return Err(FilterParseError("$regex value must be a string".into())),
                };
                let case_insensitive = matches!(
                    doc.get("$options"),
                    Some(Bson::String(opts)) if opts.contains('i')
                );
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| FilterParseError(format!("invalid $regex: {e}")))?;
                conditions.push(Expression::Regex(field, re));
            }
            // Consumed alongside $regex above
            "$options" => {}
            other => {
                return Err(FilterParseError(format!("unrecognised operator: {other}")));
            }
        }
    }

    if conditions.is_empty() {
        return Err(FilterParseError(format!(
            "operator document for `{field}` has no conditions"
        )));
    }

    if conditions.len() == 1 {
        Ok(conditions.pop().unwrap())
    } else {
        Ok(Expression::And(conditions))
    }
}

fn parse_value_array(value: &Bson) -> Result<Vec<Bson>, FilterParseError> {
    match value {
        Bson::Array(a) => Ok(a.clone()),
        _ => Err(FilterParseError("$in/$nin value must be an array".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn empty_filter_matches_everything() {
        let expr = parse_filter(&doc! {}).unwrap();
        assert!(matches!(expr, Expression::And(children) if children.is_empty()));
    }

    #[test]
    fn implicit_eq() {
        let expr = parse_filter(&doc! { "name": "Acme" }).unwrap();
        match expr {
            Expression::Eq(field, Bson::String(v)) => {
                assert_eq!(field, "name");
                assert_eq!(v, "Acme");
            }
            other => panic!("expected Eq, got {other:?}"),
        }
    }

    #[test]
    fn operator_doc_with_two_conditions_is_and() {
        let expr = parse_filter(&doc! { "age": { "$gte": 18, "$lt": 65 } }).unwrap();
        match expr {
            Expression::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn or_array() {
        let expr = parse_filter(&doc! { "$or": [{ "a": 1 }, { "b": 2 }] }).unwrap();
        match expr {
            Expression::Or(children) => assert_eq!(children.len(), 2),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn unknown_operator_rejected() {
        assert!(parse_filter(&doc! { "a": { "$near": 1 } }).is_err());
        assert!(parse_filter(&doc! { "$nor": [{ "a": 1 }] }).is_err());
    }

    #[test]
    fn regex_with_options() {
        let expr = parse_filter(&doc! { "name": { "$regex": "^acme", "$options": "i" } }).unwrap();
        match expr {
            Expression::Regex(_, re) => assert!(re.is_match("ACME Corp")),
            other => panic!("expected Regex, got {other:?}"),
        }
    }
}
