use bson::Bson;
use regex::Regex;

/// A parsed filter condition tree.
///
/// Field paths are dotted (`"address.city"`) and resolve through nested
/// sub-documents; see [`crate::path::get`].
#[derive(Debug, Clone)]
pub enum Expression {
    /// All children must match. An empty `And` matches every document —
    /// it is what the empty filter `{}` parses to.
    And(Vec<Expression>),
    /// At least one child must match.
    Or(Vec<Expression>),
    Eq(String, Bson),
    Ne(String, Bson),
    Gt(String, Bson),
    Gte(String, Bson),
    Lt(String, Bson),
    Lte(String, Bson),
    In(String, Vec<Bson>),
    Nin(String, Vec<Bson>),
    /// `$exists` — physical presence; an explicit null still exists.
    Exists(String, bool),
    Regex(String, Regex),
}
