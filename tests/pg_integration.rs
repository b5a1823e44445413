//! PostgreSQL backend tests.
//! Skipped unless `PGCOUCH_TEST_DATABASE_URL` points at a scratch database.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pgcouch::api::{
    Check, ErrorKind, HistoryTable, PgStore, Query, Revision, StoreConfig, Table,
};
use serde_json::{Value, json};

fn store() -> Option<PgStore> {
    let Ok(url) = std::env::var("PGCOUCH_TEST_DATABASE_URL") else {
        eprintln!("PGCOUCH_TEST_DATABASE_URL not set; skipping");
        return None;
    };
    let config = StoreConfig::default()
        .with_url(url)
        .with_max_connections(4)
        .unwrap()
        .with_acquire_timeout(Duration::from_secs(5));
    Some(PgStore::new(&config).unwrap())
}

fn unique(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix} {nanos}")
}

#[tokio::test]
async fn init_is_idempotent() {
    let Some(store) = store() else { return };
    let table: Table<Value, _> = Table::new(store, unique("init"), Check::serde()).unwrap();
    assert!(!table.init().await.unwrap());
    assert!(table.init().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_init_has_one_creator() {
    let Some(store) = store() else { return };
    let name = unique("race");
    let mut handles = Vec::new();
    for _ in 0..4 {
        let table: Table<Value, _> = Table::new(store.clone(), &name, Check::serde()).unwrap();
        handles.push(tokio::spawn(async move { table.init().await }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }
    outcomes.sort();
    assert_eq!(outcomes, [false, true, true, true]);

    let table: Table<Value, _> = Table::new(store.clone(), &name, Check::serde()).unwrap();
    table.put(&json!({"_id": "after-race"})).await.unwrap();
    assert_eq!(store.pool().available(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_history_init_has_one_creator() {
    let Some(store) = store() else { return };
    let name = unique("hrace");
    let mut handles = Vec::new();
    for _ in 0..4 {
        let table: HistoryTable<Value, _> =
            HistoryTable::new(store.clone(), &name, Check::serde()).unwrap();
        handles.push(tokio::spawn(async move { table.init().await }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }
    outcomes.sort();
    assert_eq!(outcomes, [false, true, true, true]);

    let table: HistoryTable<Value, _> =
        HistoryTable::new(store, &name, Check::serde()).unwrap();
    let v1 = table.put(&json!({"_id": "x", "n": 1})).await.unwrap();
    assert_eq!(table.revisions("x").await.unwrap(), vec![v1]);
}

#[tokio::test]
async fn revisioned_writes_round_trip() {
    let Some(store) = store() else { return };
    let table: Table<Value, _> = Table::new(store.clone(), unique("rt"), Check::serde()).unwrap();
    table.init().await.unwrap();

    let v1 = table
        .put(&json!({"_id": "human:bob", "name": "Bob", "tags": ["a", "b"]}))
        .await
        .unwrap();
    assert_eq!(table.get("human:bob").await.unwrap(), Some(v1.clone()));

    let err = table
        .put(&json!({"_id": "human:bob", "name": "Other"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut edit = v1.clone();
    edit["name"] = json!("Robert");
    let v2 = table.put(&edit).await.unwrap();
    assert_ne!(v1["_rev"], v2["_rev"]);

    let err = table.put(&v1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingOnUpdate);

    let err = table.delete(&v1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingOnDelete);
    table.delete(&v2).await.unwrap();
    assert!(table.get("human:bob").await.unwrap().is_none());
    assert_eq!(store.pool().available(), 4);
}

#[tokio::test]
async fn queries_use_containment_and_jsonpath() {
    let Some(store) = store() else { return };
    let table: Table<Value, _> = Table::new(store, unique("q"), Check::serde()).unwrap();
    table.init().await.unwrap();
    for (id, year) in [("a", 1980), ("b", 1990), ("c", 1990), ("d", 2000)] {
        table.put(&json!({"_id": id, "year": year})).await.unwrap();
    }

    let hits = table
        .query(Query::contains(json!({"year": 1990})).unwrap())
        .await
        .unwrap()
        .collect_documents()
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);

    let hits = table
        .query("$.year > 1985")
        .await
        .unwrap()
        .collect_documents()
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);

    table.put(&json!({"_id": "e", "year": "unknown", "tags": "red"})).await.unwrap();
    table.put(&json!({"_id": "f", "year": null})).await.unwrap();
    for (expr, expected) in [
        ("$.year > 1989", 3),
        ("$.year < 1989", 1),
        ("$.tags[*] == \"red\"", 1),
        ("$.missing == 1 || $.year == 2000", 1),
    ] {
        let hits = table
            .query(expr)
            .await
            .unwrap()
            .collect_documents()
            .await
            .unwrap();
        assert_eq!(hits.len(), expected, "{expr}");
    }

    // The cast may fail at plan time or on the first fetch.
    let err = match table.query("$.year >").await {
        Err(err) => err,
        Ok(stream) => stream.collect_documents().await.unwrap_err(),
    };
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[tokio::test]
async fn history_survives_updates_and_deletes() {
    let Some(store) = store() else { return };
    let table: HistoryTable<Value, _> =
        HistoryTable::new(store, unique("h"), Check::serde()).unwrap();
    assert!(!table.init().await.unwrap());
    assert!(table.init().await.unwrap());

    let v1 = table.put(&json!({"_id": "x", "n": 1})).await.unwrap();
    let mut edit = v1.clone();
    edit["n"] = json!(2);
    let v2 = table.put(&edit).await.unwrap();
    table.delete(&v2).await.unwrap();

    let r1 = Revision::new(v1["_rev"].as_str().unwrap()).unwrap();
    assert_eq!(table.get("x", Some(&r1)).await.unwrap(), Some(v1));
    assert!(table.get("x", None).await.unwrap().is_none());
    assert_eq!(table.revisions("x").await.unwrap().len(), 2);
}
