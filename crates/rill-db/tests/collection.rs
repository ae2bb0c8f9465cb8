mod common;
use common::*;

use bson::{Bson, doc};
use rill_db::{CollectionEvent, Database, DbError};
use rill_query::{FindOptions, OrderSpec};
use std::cell::RefCell;
use std::rc::Rc;

// ── CRUD ────────────────────────────────────────────────────────

#[test]
fn insert_rejects_duplicate_keys() {
    let (_db, source) = seeded_db();
    let err = source.insert(doc! { "_id": 1, "age": 99 }).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey(_)));
    assert_eq!(source.count(None).unwrap(), 3);
}

#[test]
fn numeric_id_forms_share_identity() {
    let (_db, source) = seeded_db();
    // 1i64 identifies the same document as 1i32
    let err = source.insert(doc! { "_id": 1i64, "age": 99 }).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey(_)));
}

#[test]
fn missing_id_gets_generated() {
    let db = Database::new("test");
    let coll = db.collection("auto");
    let inserted = coll.insert(doc! { "n": 1 }).unwrap();
    assert!(matches!(inserted.get("_id"), Some(Bson::String(_))));
    assert_eq!(coll.count(None).unwrap(), 1);
}

#[test]
fn update_returns_only_changed_documents() {
    let (_db, source) = seeded_db();
    // age 30 stays 30: no change reported for id 2
    let changed = source
        .update(
            &doc! { "age": { "$gte": 30 } },
            &doc! { "$set": { "age": 30 } },
            None,
        )
        .unwrap();
    assert_eq!(ids(&changed), vec![3]);
}

#[test]
fn update_operators_apply() {
    let (_db, source) = seeded_db();
    source
        .update(&doc! { "_id": 1 }, &doc! { "$inc": { "age": 5 } }, None)
        .unwrap();
    source
        .update(&doc! { "_id": 1 }, &doc! { "$unset": { "name": 1 } }, None)
        .unwrap();
    let doc = source.find_by_id(&Bson::Int32(1)).unwrap();
    assert_eq!(i32_field(&doc, "age"), 25);
    assert!(doc.get("name").is_none());
}

#[test]
fn remove_returns_removed_documents() {
    let (_db, source) = seeded_db();
    let removed = source.remove(&doc! { "age": { "$lt": 35 } }, None).unwrap();
    assert_eq!(sorted_ids(&removed), vec![1, 2]);
    assert_eq!(source.count(None).unwrap(), 1);
}

#[test]
fn use_after_drop_is_an_error_for_writes_and_empty_for_reads() {
    let (_db, source) = seeded_db();
    assert!(source.drop());
    assert!(!source.drop());

    let err = source.insert(doc! { "_id": 9 }).unwrap_err();
    assert!(matches!(err, DbError::Dropped(_)));
    assert!(source.find(&doc! {}, &FindOptions::default()).unwrap().is_empty());
    assert!(source.find_by_id(&Bson::Int32(1)).is_none());
}

// ── Find pipeline ───────────────────────────────────────────────

#[test]
fn find_sorts_and_pages() {
    let db = Database::new("test");
    let coll = db.collection("numbers");
    let docs: Vec<_> = (0..7).map(|i| doc! { "_id": i, "n": 6 - i }).collect();
    coll.insert_many(docs).unwrap();

    let options = FindOptions {
        order_by: Some(OrderSpec::from_doc(&doc! { "n": 1 })),
        page: Some(1),
        limit: Some(3),
        ..FindOptions::default()
    };
    let (results, cursor) = coll.find_with_cursor(&doc! {}, &options).unwrap();
    let ns: Vec<i32> = results.iter().map(|d| i32_field(d, "n")).collect();
    assert_eq!(ns, vec![3, 4, 5]);
    assert_eq!(cursor.records, 7);
    assert_eq!(cursor.pages, 3);
    assert_eq!(cursor.page, 1);
    assert_eq!(coll.last_cursor(), cursor);
}

#[test]
fn find_one_and_filter() {
    let (_db, source) = seeded_db();
    let one = source
        .find_one(&doc! { "age": { "$gt": 25 } }, &FindOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(i32_field(&one, "_id"), 2);

    let heavy = source.filter(|d| i32_field(d, "age") > 25);
    assert_eq!(sorted_ids(&heavy), vec![2, 3]);
}

#[test]
fn distinct_collects_unique_values() {
    let db = Database::new("test");
    let coll = db.collection("tags");
    coll.insert_many(vec![
        doc! { "_id": 1, "color": "red" },
        doc! { "_id": 2, "color": "blue" },
        doc! { "_id": 3, "color": "red" },
        doc! { "_id": 4 },
    ])
    .unwrap();
    let colors = coll.distinct("color", &doc! {}).unwrap();
    assert_eq!(colors, vec![Bson::String("red".into()), Bson::String("blue".into())]);
}

#[test]
fn find_sub_searches_nested_arrays() {
    let db = Database::new("test");
    let coll = db.collection("orders");
    coll.insert_many(vec![
        doc! { "_id": 1, "lines": [ { "sku": "a", "qty": 2 }, { "sku": "b", "qty": 9 } ] },
        doc! { "_id": 2, "lines": [ { "sku": "c", "qty": 7 } ] },
        doc! { "_id": 3 },
    ])
    .unwrap();

    let heavy = coll
        .find_sub(
            &doc! {},
            "lines",
            &doc! { "qty": { "$gte": 7 } },
            &FindOptions::default(),
        )
        .unwrap();
    assert_eq!(heavy.len(), 2);
    assert_eq!(str_field(&heavy[0], "sku"), "b");

    let first = coll
        .find_sub_one(&doc! { "_id": 2 }, "lines", &doc! {}, &FindOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(str_field(&first, "sku"), "c");
}

// ── Decoupling ──────────────────────────────────────────────────

#[test]
fn returned_documents_are_decoupled() {
    let (_db, source) = seeded_db();
    let mut results = source.find(&doc! {}, &FindOptions::default()).unwrap();
    results[0].insert("age", 999);
    results[0].insert("injected", true);

    let reread = source.find_by_id(&Bson::Int32(1)).unwrap();
    assert_eq!(i32_field(&reread, "age"), 20);
    assert!(reread.get("injected").is_none());
}

// ── Subset / diff ───────────────────────────────────────────────

#[test]
fn subset_is_detached_from_the_original() {
    let (_db, source) = seeded_db();
    let sub = source
        .subset(&doc! { "age": { "$gte": 25 } }, &FindOptions::default())
        .unwrap();
    assert_eq!(sub.count(None).unwrap(), 2);
    assert_eq!(sub.primary_key(), source.primary_key());

    sub.remove(&doc! {}, None).unwrap();
    assert_eq!(sub.count(None).unwrap(), 0);
    assert_eq!(source.count(None).unwrap(), 3);
}

#[test]
fn diff_computes_the_three_way_difference() {
    let db = Database::new("test");
    let left = db.collection("left");
    left.insert_many(vec![
        doc! { "_id": 1, "n": 1 },
        doc! { "_id": 2, "n": 2 },
        doc! { "_id": 3, "n": 3 },
    ])
    .unwrap();
    let right = db.collection("right");
    right
        .insert_many(vec![
            doc! { "_id": 2, "n": 2 },   // unchanged
            doc! { "_id": 3, "n": 30 },  // changed
            doc! { "_id": 4, "n": 4 },   // new
        ])
        .unwrap();

    let diff = left.diff(&right);
    assert_eq!(ids(&diff.insert), vec![4]);
    assert_eq!(ids(&diff.update), vec![3]);
    assert_eq!(ids(&diff.remove), vec![1]);
    assert!(!diff.is_empty());

    let no_change = left.diff(&left.subset(&doc! {}, &FindOptions::default()).unwrap());
    assert!(no_change.is_empty());
}

// ── Indexes ─────────────────────────────────────────────────────

#[test]
fn indexed_find_matches_scan_results() {
    let db = Database::new("test");
    let coll = db.collection("people");
    let docs: Vec<_> = (0..20)
        .map(|i| doc! { "_id": i, "group": i % 4, "n": i })
        .collect();
    coll.insert_many(docs).unwrap();

    coll.ensure_index(OrderSpec::from_doc(&doc! { "group": 1, "n": 1 }))
        .unwrap();

    let indexed = coll.find(&doc! { "group": 2 }, &FindOptions::default()).unwrap();
    assert_eq!(sorted_ids(&indexed), vec![2, 6, 10, 14, 18]);

    // The index rebuilds lazily after a mutation
    coll.update(&doc! { "_id": 2 }, &doc! { "group": 3 }, None)
        .unwrap();
    let indexed = coll.find(&doc! { "group": 2 }, &FindOptions::default()).unwrap();
    assert_eq!(sorted_ids(&indexed), vec![6, 10, 14, 18]);

    coll.remove(&doc! { "group": 2 }, None).unwrap();
    assert!(coll
        .find(&doc! { "group": 2 }, &FindOptions::default())
        .unwrap()
        .is_empty());
}

// ── Events ──────────────────────────────────────────────────────

#[test]
fn collection_events_report_mutations() {
    let (_db, source) = seeded_db();
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let id = source.on(move |event| {
        let entry = match event {
            CollectionEvent::SetData { docs } => format!("setData:{}", docs.len()),
            CollectionEvent::Insert { docs } => format!("insert:{}", docs.len()),
            CollectionEvent::Update { docs } => format!("update:{}", docs.len()),
            CollectionEvent::Remove { docs } => format!("remove:{}", docs.len()),
            CollectionEvent::PrimaryKey { field } => format!("primaryKey:{field}"),
            CollectionEvent::Drop => "drop".to_string(),
        };
        sink.borrow_mut().push(entry);
    });

    source.insert(doc! { "_id": 8, "age": 8 }).unwrap();
    source
        .update(&doc! { "_id": 8 }, &doc! { "age": 9 }, None)
        .unwrap();
    source.remove(&doc! { "_id": 8 }, None).unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["insert:1", "update:1", "remove:1"]
    );

    assert!(source.off(id));
    source.insert(doc! { "_id": 8, "age": 8 }).unwrap();
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn primary_key_change_reindexes() {
    let db = Database::new("test");
    let coll = db.collection("keyed");
    coll.insert_many(vec![
        doc! { "_id": 1, "code": "x" },
        doc! { "_id": 2, "code": "y" },
    ])
    .unwrap();

    coll.set_primary_key("code");
    assert_eq!(coll.primary_key(), "code");
    let found = coll.find_by_id(&Bson::String("y".into())).unwrap();
    assert_eq!(i32_field(&found, "_id"), 2);
}
