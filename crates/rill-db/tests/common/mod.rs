use bson::{Bson, Document, doc};
use rill_db::{Collection, Database};

pub const SOURCE: &str = "accounts";

/// Database with a seeded source collection: three people with ascending
/// ages.
pub fn seeded_db() -> (Database, Collection) {
    let db = Database::new("test");
    let source = db.collection(SOURCE);
    source
        .insert_many(vec![
            doc! { "_id": 1, "age": 20, "name": "amy" },
            doc! { "_id": 2, "age": 30, "name": "bob" },
            doc! { "_id": 3, "age": 40, "name": "cal" },
        ])
        .unwrap();
    (db, source)
}

pub fn ids(docs: &[Document]) -> Vec<i32> {
    docs.iter()
        .map(|d| match d.get("_id") {
            Some(Bson::Int32(n)) => *n,
            other => panic!("unexpected _id {other:?}"),
        })
        .collect()
}

pub fn sorted_ids(docs: &[Document]) -> Vec<i32> {
    let mut out = ids(docs);
    out.sort_unstable();
    out
}

pub fn i32_field(doc: &Document, field: &str) -> i32 {
    match doc.get(field) {
        Some(Bson::Int32(n)) => *n,
        other => panic!("unexpected {field} {other:?}"),
    }
}

pub fn str_field(doc: &Document, field: &str) -> String {
    match doc.get(field) {
        Some(Bson::String(s)) => s.clone(),
        other => panic!("unexpected {field} {other:?}"),
    }
}
