use super::{
    AccessContext, AccessLevel, ChannelDispatcher, MemoryStore, Principal, SchemaConfig,
    SchemaEngine, Selection, WriteOptions,
};
use crate::effects::HistoryOp;
use crate::jobs::{IndexerReport, Job};
use crate::meta::DEFINITION_OBJECT;
use crate::store::DocumentStore;
use serde_json::{Value, json};
use std::sync::Arc;

fn engine() -> (SchemaEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = SchemaConfig::default().with_randomized_slots(false);
    let engine = SchemaEngine::new(config, store.clone()).unwrap().with_rng_seed(7);
    (engine, store)
}

fn admin() -> AccessContext {
    AccessContext::new(Principal::new("admin", "org"), DEFINITION_OBJECT).with_resolved(AccessLevel::Delete)
}

fn property_id(definition: &Value, name: &str) -> String {
    definition["properties"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == json!(name))
        .and_then(|p| p["_id"].as_str())
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn defining_an_existing_name_conflicts() {
    let (engine, _) = engine();
    let payload = json!({"name": "c_car", "properties": [{"type": "String", "name": "c_vin"}]});
    engine.define_object(&mut admin(), payload.clone()).await.unwrap();
    let err = engine.define_object(&mut admin(), payload).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
}

#[tokio::test]
async fn new_indexed_properties_claim_slots_without_reindex() {
    let (engine, _) = engine();
    let (dispatcher, mut rx) = ChannelDispatcher::channel();
    let engine = engine.with_dispatcher(Arc::new(dispatcher));
    let defined = engine
        .define_object(
            &mut admin(),
            json!({"name": "c_car", "properties": [
                {"type": "String", "name": "c_vin", "indexed": true, "unique": true},
                {"type": "String", "name": "c_color", "indexed": true},
            ]}),
        )
        .await
        .unwrap();
    let slots = defined["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 2);
    let vin = property_id(&defined, "c_vin");
    assert!(slots.iter().any(|s| s["_id"] == json!(vin) && s["name"] == json!("u1")));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn indexing_a_stored_property_dispatches_a_reindex() {
    let (engine, store) = engine();
    let (dispatcher, mut rx) = ChannelDispatcher::channel();
    let engine = engine.with_dispatcher(Arc::new(dispatcher));
    let defined = engine
        .define_object(
            &mut admin(),
            json!({"name": "c_car", "defaultAcl": [{"type": "account", "target": "admin", "allow": 7}],
                   "properties": [{"type": "String", "name": "c_color"}]}),
        )
        .await
        .unwrap();
    let created = engine
        .create(&mut admin(), "c_car", json!({"c_color": "red"}))
        .await
        .unwrap();
    let id = created["_id"].as_str().unwrap().to_string();

    let color = property_id(&defined, "c_color");
    engine
        .update_object(
            &mut admin(),
            "c_car",
            json!({"properties": [{"_id": color, "indexed": true}]}),
            &WriteOptions::merge(),
        )
        .await
        .unwrap();

    let job: Job = rx.try_recv().unwrap();
    assert_eq!(job.queue, "work");
    assert_eq!(job.payload["object"], json!("c_car"));
    assert!(rx.try_recv().is_err());

    let report = engine.run_job(&job).await.unwrap();
    assert_eq!(report, IndexerReport { processed: 1, failed: 0 });
    let stored = store.find_one("c_car", &id).unwrap().unwrap();
    assert_eq!(stored["idx"]["d"]["i1"], json!("red"));
}

#[tokio::test]
async fn failed_writes_leave_the_store_untouched() {
    let (engine, store) = engine();
    engine
        .define_object(
            &mut admin(),
            json!({"name": "c_car", "properties": [
                {"type": "String", "name": "c_vin", "indexed": true, "unique": true},
            ]}),
        )
        .await
        .unwrap();
    engine.create(&mut admin(), "c_car", json!({"c_vin": "a"})).await.unwrap();
    let mut ac = admin();
    let err = engine.create(&mut ac, "c_car", json!({"c_vin": "a"})).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
    assert!(ac.effects.is_empty());
    assert_eq!(store.count("c_car"), 1);
}

#[tokio::test]
async fn history_is_kept_for_history_properties() {
    let (engine, _) = engine();
    engine
        .define_object(
            &mut admin(),
            json!({"name": "c_note", "properties": [{"type": "String", "name": "c_body", "history": true}]}),
        )
        .await
        .unwrap();
    let created = engine
        .create(&mut admin(), "c_note", json!({"c_body": "one"}))
        .await
        .unwrap();
    let id = created["_id"].as_str().unwrap();
    engine
        .update(&mut admin(), "c_note", id, json!({"c_body": "two"}), &WriteOptions::default())
        .await
        .unwrap();
    let history = engine.history("c_note", id).unwrap();
    let values: Vec<&Value> = history
        .iter()
        .filter(|h| h.op == HistoryOp::Set)
        .map(|h| &h.value)
        .collect();
    assert_eq!(values, vec![&json!("one"), &json!("two")]);
}

#[tokio::test]
async fn unknown_jobs_and_objects_are_rejected() {
    let (engine, _) = engine();
    let err = engine
        .run_job(&Job::new("work", "mailer", Value::Null))
        .await
        .unwrap_err();
    assert_eq!(err.code_str(), "unsupported");
    let err = engine
        .read(&mut admin(), "c_missing", "x", &Selection::all())
        .unwrap_err();
    assert_eq!(err.code_str(), "object_not_found");
}

#[tokio::test]
async fn one_context_stores_defaults_for_every_instance_it_creates() {
    let (engine, store) = engine();
    engine
        .define_object(
            &mut admin(),
            json!({"name": "c_counter", "properties": [
                {"type": "String", "name": "c_label"},
                {"type": "Number", "name": "c_n", "default": 3},
            ]}),
        )
        .await
        .unwrap();
    let mut ac = admin();
    for label in ["a", "b"] {
        let created = engine
            .create(&mut ac, "c_counter", json!({"c_label": label}))
            .await
            .unwrap();
        let stored = store
            .find_one("c_counter", created["_id"].as_str().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored["c_n"], json!(3), "instance {label}");
    }
}

#[tokio::test]
async fn a_failed_commit_leaves_nothing_for_the_next_write() {
    let (engine, _) = engine();
    engine
        .define_object(
            &mut admin(),
            json!({"name": "c_tag", "properties": [
                {"type": "String", "name": "c_code", "indexed": true, "unique": true, "history": true},
            ]}),
        )
        .await
        .unwrap();
    engine.create(&mut admin(), "c_tag", json!({"c_code": "x"})).await.unwrap();

    let mut ac = admin();
    let err = engine.create(&mut ac, "c_tag", json!({"c_code": "x"})).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
    assert!(ac.effects.is_empty());
    assert!(!ac.is_modified());
    assert!(ac.history.is_empty());
    assert!(ac.index_rebuilds.is_empty());

    let created = engine.create(&mut ac, "c_tag", json!({"c_code": "y"})).await.unwrap();
    let history = engine.history("c_tag", created["_id"].as_str().unwrap()).unwrap();
    let values: Vec<&Value> = history
        .iter()
        .filter(|h| h.op == HistoryOp::Set)
        .map(|h| &h.value)
        .collect();
    assert_eq!(values, vec![&json!("y")]);
}
