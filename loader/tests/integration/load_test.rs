use futures::TryStreamExt;
use loader::message::Message;
use loader::pipeline::StreamStats;
use loader::test_utils::{
    TEST_SCHEMA, TestTarget, orders_schema, record_line, schema_line, state_line, test_config,
};
use loader::warehouse::Statement;
use object_store::ObjectStore;
use serde_json::{Value, json};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn records_are_upserted_by_primary_key_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let state = json!({"bookmarks": {"orders": {"position": 3}}});

    let states = target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": "first"})),
            record_line("orders", json!({"id": 2, "name": "second"})),
            record_line("orders", json!({"id": 1, "name": "updated"})),
            state_line(state.clone()),
        ])
        .await
        .unwrap();

    assert_eq!(states, vec![state]);

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.rows.len(), 2);
    assert_eq!(
        table.row_by("id", &json!(1)).unwrap()["name"],
        json!("updated")
    );
    assert_eq!(
        table.row_by("id", &json!(2)).unwrap()["name"],
        json!("second")
    );

    let copies = target
        .warehouse
        .statements()
        .await
        .into_iter()
        .filter(|statement| matches!(statement, Statement::Copy { .. }))
        .count();
    assert_eq!(copies, 1);

    // Staged objects are removed once loaded.
    let objects: Vec<_> = target.store.list(None).try_collect().await.unwrap();
    assert!(objects.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn later_loads_update_existing_rows_test() {
    init_test_tracing();
    let config = test_config(json!({"batch_size_rows": 1}));
    let mut target = TestTarget::new(config);

    target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": "first"})),
            record_line("orders", json!({"id": 1, "name": "second"})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0]["name"], json!("second"));
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_updates_only_inserts_new_keys_test() {
    init_test_tracing();
    let config = test_config(json!({"batch_size_rows": 1, "skip_updates": true}));
    let mut target = TestTarget::new(config);

    target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": "first"})),
            record_line("orders", json!({"id": 1, "name": "second"})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0]["name"], json!("first"));
    assert!(
        !target
            .warehouse
            .statements()
            .await
            .iter()
            .any(|statement| matches!(statement, Statement::MergeUpdate { .. }))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_keys_are_counted_once_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let mut output = Vec::new();

    for line in [
        schema_line("orders", orders_schema(), &["id"]),
        record_line("orders", json!({"id": 1, "name": "a"})),
        record_line("orders", json!({"id": 2, "name": "b"})),
        record_line("orders", json!({"id": 1, "name": "c"})),
    ] {
        let message = Message::parse(&line).unwrap();
        target
            .loader
            .process_message(message, &mut output)
            .await
            .unwrap();
    }

    assert_eq!(
        target.loader.stream_stats("orders"),
        Some(StreamStats {
            row_count: 2,
            total_row_count: 2,
            buffered: 2,
        })
    );
    assert!(output.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_size_triggers_flushes_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({"batch_size_rows": 2})));

    let mut lines = vec![
        schema_line("orders", orders_schema(), &["id"]),
        state_line(json!({"bookmarks": {"orders": {"position": 0}}})),
    ];
    lines.extend((1..=5).map(|id| record_line("orders", json!({"id": id, "name": "n"}))));

    let states = target.run(&lines).await.unwrap();

    // Two threshold flushes and the final one.
    assert_eq!(states.len(), 3);

    let copies = target
        .warehouse
        .statements()
        .await
        .into_iter()
        .filter(|statement| matches!(statement, Statement::Copy { .. }))
        .count();
    assert_eq!(copies, 3);

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.rows.len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn compressed_slices_are_loaded_test() {
    init_test_tracing();
    for compression in ["gzip", "bzip2"] {
        let config = test_config(json!({"compression": compression, "slices": 3}));
        let mut target = TestTarget::new(config);

        let mut lines = vec![schema_line("orders", orders_schema(), &["id"])];
        lines.extend((1..=5).map(|id| record_line("orders", json!({"id": id, "name": "n"}))));

        target.run(&lines).await.unwrap();

        let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
        assert_eq!(table.rows.len(), 5, "{compression}");

        let sql = target.warehouse.executed_sql().await;
        let copy = sql.iter().find(|sql| sql.starts_with("COPY")).unwrap();
        assert!(copy.contains(&compression.to_uppercase()), "{copy}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_without_primary_key_are_appended_test() {
    init_test_tracing();
    let config = test_config(json!({"primary_key_required": false}));
    let mut target = TestTarget::new(config);

    target
        .run(&[
            schema_line("events", orders_schema(), &[]),
            record_line("events", json!({"id": 1, "name": "a"})),
            record_line("events", json!({"id": 1, "name": "a"})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "events").await.unwrap();
    assert_eq!(table.rows.len(), 2);
    assert!(
        target
            .warehouse
            .statements()
            .await
            .iter()
            .any(|statement| matches!(statement, Statement::Insert { .. }))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn hard_delete_purges_soft_deleted_rows_test() {
    init_test_tracing();
    let config = test_config(json!({"hard_delete": true}));
    let mut target = TestTarget::new(config);

    target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": "kept"})),
            record_line(
                "orders",
                json!({"id": 2, "name": "gone", "_sdc_deleted_at": "2026-01-01T00:00:00Z"}),
            ),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert!(table.column_type("_sdc_batched_at").is_some());
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0]["id"], json!(1));
    assert_eq!(table.rows[0]["_sdc_deleted_at"], Value::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn nested_objects_stay_whole_without_flattening_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let schema = json!({
        "properties": {
            "id": {"type": "integer"},
            "details": {
                "type": ["null", "object"],
                "properties": {"color": {"type": "string"}}
            }
        }
    });

    target
        .run(&[
            schema_line("items", schema, &["id"]),
            record_line("items", json!({"id": 1, "details": {"color": "red"}})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "items").await.unwrap();
    assert_eq!(table.column_type("details"), Some("character varying"));
    assert_eq!(table.rows[0]["details"], json!(r#"{"color":"red"}"#));
}

#[tokio::test(flavor = "multi_thread")]
async fn nested_objects_are_flattened_into_columns_test() {
    init_test_tracing();
    let config = test_config(json!({"data_flattening_max_level": 1}));
    let mut target = TestTarget::new(config);
    let schema = json!({
        "properties": {
            "id": {"type": "integer"},
            "details": {
                "type": ["null", "object"],
                "properties": {"color": {"type": "string"}}
            }
        }
    });

    target
        .run(&[
            schema_line("items", schema, &["id"]),
            record_line("items", json!({"id": 1, "details": {"color": "red"}})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "items").await.unwrap();
    assert_eq!(table.rows[0]["details__color"], json!("red"));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_load_is_fatal_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    target.warehouse.fail_statements_containing("COPY").await;

    let err = target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": "a"})),
            state_line(json!({"bookmarks": {"orders": {"position": 1}}})),
        ])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), loader::error::ErrorKind::WarehouseQueryFailed);
    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert!(table.rows.is_empty());
}

fn two_stream_input() -> String {
    [
        schema_line("bad", orders_schema(), &["id"]),
        schema_line("good", orders_schema(), &["id"]),
        record_line("bad", json!({"id": 1})),
        record_line("good", json!({"id": 1})),
        state_line(json!({"bookmarks": {"bad": {"p": 1}, "good": {"p": 1}}})),
    ]
    .join("\n")
}

#[tokio::test]
async fn failed_stream_stops_pending_flushes_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({"parallelism": 1})));
    target.warehouse.fail_statements_containing("\"STG_BAD\"").await;

    let mut output = Vec::new();
    let err = target
        .loader
        .run(two_stream_input().as_bytes(), &mut output)
        .await
        .unwrap_err();

    assert_eq!(
        err.kinds(),
        vec![loader::error::ErrorKind::WarehouseQueryFailed]
    );
    assert!(output.is_empty());

    // The second stream waits for a permit and is cancelled once the first one fails.
    for stream in ["bad", "good"] {
        let table = target.warehouse.table(TEST_SCHEMA, stream).await.unwrap();
        assert!(table.rows.is_empty());
    }
    assert!(
        !target
            .warehouse
            .statements()
            .await
            .iter()
            .any(|statement| matches!(statement, Statement::Copy { .. }))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_flush_failures_are_aggregated_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({"parallelism": 2})));
    target.warehouse.fail_statements_containing("COPY").await;

    let mut output = Vec::new();
    let err = target
        .loader
        .run(two_stream_input().as_bytes(), &mut output)
        .await
        .unwrap_err();

    // The second stream either fails on its own or is cancelled by the first failure.
    let kinds = err.kinds();
    assert!((1..=2).contains(&kinds.len()));
    assert!(
        kinds
            .iter()
            .all(|kind| *kind == loader::error::ErrorKind::WarehouseQueryFailed)
    );
    assert!(output.is_empty());

    for stream in ["bad", "good"] {
        let table = target.warehouse.table(TEST_SCHEMA, stream).await.unwrap();
        assert!(table.rows.is_empty());
    }
}
