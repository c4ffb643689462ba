use schemata::{
    AccessContext, AccessLevel, DocumentStore, MemoryStore, Principal, SchemaConfig, SchemaEngine,
    Selection,
};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn admin() -> AccessContext {
    AccessContext::new(Principal::new("admin", "org"), "object").with_resolved(AccessLevel::Delete)
}

async fn seeded_engine(store: Arc<MemoryStore>) -> (SchemaEngine, String) {
    let engine = SchemaEngine::new(SchemaConfig::default(), store).expect("engine");
    engine
        .define_object(
            &mut admin(),
            json!({"name": "c_book", "properties": [
                {"type": "String", "name": "c_isbn", "indexed": true, "unique": true},
                {"type": "String", "name": "c_title"},
            ]}),
        )
        .await
        .expect("define");
    let created = engine
        .create(&mut admin(), "c_book", json!({"c_isbn": "978-0", "c_title": "Dune"}))
        .await
        .expect("create");
    let id = created["_id"].as_str().expect("id").to_string();
    (engine, id)
}

#[tokio::test]
async fn snapshots_restore_definitions_instances_and_unique_keys() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("store.snap");
    let store = Arc::new(MemoryStore::new());
    let (_engine, id) = seeded_engine(store.clone()).await;

    let meta = store.write_snapshot(&path).expect("write snapshot");
    assert_eq!(meta.sha256_hex.len(), 64);
    assert!(meta.bytes > 0);

    let restored = Arc::new(MemoryStore::load_snapshot(&path).expect("load snapshot"));
    assert_eq!(restored.count("c_book"), 1);
    assert!(restored.get_definition("c_book").expect("get").is_some());

    let engine = SchemaEngine::new(SchemaConfig::default(), restored).expect("engine");
    let book = engine
        .read(&mut admin(), "c_book", &id, &Selection::all())
        .expect("read restored");
    assert_eq!(book["c_title"], json!("Dune"));

    let err = engine
        .create(&mut admin(), "c_book", json!({"c_isbn": "978-0"}))
        .await
        .expect_err("unique key survives the snapshot");
    assert!(err.is_conflict(), "unexpected error: {err}");
}

#[tokio::test]
async fn corrupted_snapshots_are_rejected() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("store.snap");
    let store = Arc::new(MemoryStore::new());
    seeded_engine(store.clone()).await;
    store.write_snapshot(&path).expect("write snapshot");

    let mut bytes = fs::read(&path).expect("read snapshot");
    bytes[0] ^= 0xff;
    fs::write(&path, bytes).expect("rewrite snapshot");
    let err = MemoryStore::load_snapshot(&path).expect_err("corruption detected");
    assert_eq!(err.code_str(), "decode");
}

#[tokio::test]
async fn concurrent_creates_of_one_unique_value_admit_exactly_one() {
    let store = Arc::new(MemoryStore::new());
    let (engine, _) = seeded_engine(store.clone()).await;
    let engine = Arc::new(engine);
    let mut tasks = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            engine
                .create(&mut admin(), "c_book", json!({"c_isbn": "978-1", "c_title": format!("copy {i}")}))
                .await
        }));
    }
    let mut created = 0;
    for task in tasks {
        match task.await.expect("join") {
            Ok(_) => created += 1,
            Err(err) => assert!(err.is_conflict(), "unexpected error: {err}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(store.count("c_book"), 2);
}
