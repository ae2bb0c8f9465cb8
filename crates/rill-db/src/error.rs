use std::fmt;

use rill_query::{FilterParseError, MutationParseError};

#[derive(Debug)]
pub enum DbError {
    NameConflict(String),
    CollectionNotFound(String),
    Dropped(String),
    NotBound(String),
    DuplicateKey(String),
    InvalidQuery(String),
    InvalidDocument(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::NameConflict(name) => write!(f, "name already in use: {name}"),
            DbError::CollectionNotFound(name) => write!(f, "collection not found: {name}"),
            DbError::Dropped(what) => write!(f, "operation on dropped {what}"),
            DbError::NotBound(view) => write!(f, "view not bound to a source: {view}"),
            DbError::DuplicateKey(id) => write!(f, "duplicate key: {id}"),
            DbError::InvalidQuery(msg) => write!(f, "invalid query: {msg}"),
            DbError::InvalidDocument(msg) => write!(f, "invalid document: {msg}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<FilterParseError> for DbError {
    fn from(e: FilterParseError) -> Self {
        DbError::InvalidQuery(e.to_string())
    }
}

impl From<MutationParseError> for DbError {
    fn from(e: MutationParseError) -> Self {
        DbError::InvalidQuery(e.to_string())
    }
}
