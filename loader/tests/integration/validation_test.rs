use loader::error::ErrorKind;
use loader::test_utils::{TEST_SCHEMA, TestTarget, record_line, schema_line, test_config};
use serde_json::json;
use telemetry::init_test_tracing;

fn strict_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "id": {"type": "integer"},
            "name": {"type": ["null", "string"]}
        }
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_record_is_rejected_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({"validate_records": true})));

    let err = target
        .run(&[
            schema_line("orders", strict_schema(), &["id"]),
            record_line("orders", json!({"id": "not a number"})),
        ])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RecordValidationFailed);
    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert!(table.rows.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn records_are_validated_before_metadata_is_added_test() {
    init_test_tracing();
    let config = test_config(json!({"validate_records": true, "add_metadata_columns": true}));
    let mut target = TestTarget::new(config);

    target
        .run(&[
            schema_line("orders", strict_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": "a"})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.rows.len(), 1);
    assert!(table.rows[0]["_sdc_batched_at"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_records_pass_without_validation_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));

    target
        .run(&[
            schema_line("orders", strict_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": 7})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.rows[0]["name"], json!(7));
}
