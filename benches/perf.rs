use criterion::{Criterion, black_box, criterion_group, criterion_main};
use schemata::index::instance::rebuild_indexes;
use schemata::{
    AccessContext, AccessLevel, MemoryStore, Principal, SchemaConfig, SchemaEngine, Selection,
    WriteOptions,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::runtime::Runtime;

const OBJECT: &str = "c_order";
const SEEDED_INSTANCES: usize = 1_000;

fn admin() -> AccessContext {
    AccessContext::new(Principal::new("bench", "org"), OBJECT).with_resolved(AccessLevel::Delete)
}

async fn setup_engine() -> (SchemaEngine, Vec<String>) {
    let store = Arc::new(MemoryStore::new());
    let engine = SchemaEngine::new(SchemaConfig::default(), store)
        .expect("engine")
        .with_rng_seed(1);
    engine
        .define_object(
            &mut admin(),
            json!({"name": OBJECT, "properties": [
                {"type": "String", "name": "c_ref", "indexed": true, "unique": true},
                {"type": "String", "name": "c_status", "indexed": true},
                {"type": "Number", "name": "c_total"},
                {"type": "Document", "name": "c_lines", "array": true, "uniqueKey": "sku", "properties": [
                    {"type": "String", "name": "sku", "indexed": true},
                    {"type": "Number", "name": "qty"},
                ]},
            ]}),
        )
        .await
        .expect("define");
    let mut ids = Vec::with_capacity(SEEDED_INSTANCES);
    for i in 0..SEEDED_INSTANCES {
        let created = engine
            .create(&mut admin(), OBJECT, order(i))
            .await
            .expect("seed");
        ids.push(created["_id"].as_str().expect("id").to_string());
    }
    (engine, ids)
}

fn order(i: usize) -> Value {
    json!({
        "c_ref": format!("ord-{i}"),
        "c_status": "open",
        "c_total": i,
        "c_lines": [{"sku": "a", "qty": 1}, {"sku": "b", "qty": 2}],
    })
}

fn bench_engine_hot_paths(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (engine, ids) = rt.block_on(setup_engine());

    let mut next = SEEDED_INSTANCES;
    c.bench_function("create_with_unique_and_array_indexes", |b| {
        b.iter(|| {
            rt.block_on(async {
                next += 1;
                engine
                    .create(&mut admin(), OBJECT, black_box(order(next)))
                    .await
                    .expect("create");
            });
        })
    });

    let mut cursor = 0;
    c.bench_function("merge_update_by_unique_key", |b| {
        b.iter(|| {
            rt.block_on(async {
                cursor = (cursor + 1) % ids.len();
                engine
                    .update(
                        &mut admin(),
                        OBJECT,
                        &ids[cursor],
                        black_box(json!({"c_lines": [{"sku": "a", "qty": cursor}]})),
                        &WriteOptions::merge(),
                    )
                    .await
                    .expect("update");
            });
        })
    });

    c.bench_function("read_whole_instance", |b| {
        b.iter(|| {
            cursor = (cursor + 1) % ids.len();
            black_box(
                engine
                    .read(&mut admin(), OBJECT, &ids[cursor], &Selection::all())
                    .expect("read"),
            );
        })
    });

    let compiled = engine.compiled(OBJECT).expect("compiled");
    let mut instance = order(7);
    c.bench_function("rebuild_all_slots", |b| {
        b.iter(|| {
            black_box(rebuild_indexes(compiled.tree(), &mut instance, None).expect("rebuild"));
        })
    });

    c.bench_function("reindex_object", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(engine.reindex(OBJECT).await.expect("reindex"));
            });
        })
    });
}

criterion_group!(benches, bench_engine_hot_paths);
criterion_main!(benches);
