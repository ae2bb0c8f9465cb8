//! Dotted field-path resolution against documents.

use bson::{Bson, Document};

/// Resolve a dotted path (`"address.city"`) through nested sub-documents.
/// Arrays terminate traversal; a non-leaf segment landing on anything but a
/// sub-document resolves to `None`.
pub fn get<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let value = current.get(part)?;
        if parts.peek().is_none() {
            return Some(value);
        }
        match value {
            Bson::Document(sub) => current = sub,
            _ => return None,
        }
    }
    None
}
