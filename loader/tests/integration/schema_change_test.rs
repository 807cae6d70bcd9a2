use loader::error::ErrorKind;
use loader::message::Message;
use loader::test_utils::{
    TEST_SCHEMA, TestTarget, orders_schema, parse_states, record_line, schema_line, state_line,
    test_config,
};
use loader::warehouse::Statement;
use serde_json::{Value, json};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn new_columns_are_added_between_batches_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let extended_schema = json!({
        "properties": {
            "id": {"type": "integer"},
            "name": {"type": ["null", "string"]},
            "price": {"type": ["null", "number"]}
        }
    });

    target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": "a"})),
            schema_line("orders", extended_schema, &["id"]),
            record_line("orders", json!({"id": 2, "name": "b", "price": 9.5})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.column_type("price"), Some("double precision"));
    assert_eq!(table.row_by("id", &json!(1)).unwrap()["price"], Value::Null);
    assert_eq!(table.row_by("id", &json!(2)).unwrap()["price"], json!(9.5));
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_column_types_are_versioned_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let retyped_schema = json!({
        "properties": {
            "id": {"type": "integer"},
            "name": {"type": ["null", "integer"]}
        }
    });

    target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            record_line("orders", json!({"id": 1, "name": "a"})),
            schema_line("orders", retyped_schema, &["id"]),
            record_line("orders", json!({"id": 2, "name": 5})),
        ])
        .await
        .unwrap();

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.column_type("name"), Some("bigint"));

    let (versioned, data_type) = table
        .columns
        .iter()
        .find(|(name, _)| name.starts_with("name_"))
        .unwrap();
    assert_eq!(data_type, "character varying");

    let first = table.row_by("id", &json!(1)).unwrap();
    assert_eq!(first[versioned.as_str()], json!("a"));
    assert_eq!(first["name"], Value::Null);
    assert_eq!(table.row_by("id", &json!(2)).unwrap()["name"], json!(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_schema_changes_nothing_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));

    target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            schema_line("orders", orders_schema(), &["id"]),
        ])
        .await
        .unwrap();

    let statements = target.warehouse.statements().await;
    assert_eq!(statements.len(), 2);
    assert!(matches!(statements[0], Statement::CreateSchema { .. }));
    assert!(matches!(statements[1], Statement::CreateTable { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn colliding_flattened_names_are_rejected_before_ddl_test() {
    init_test_tracing();
    let config = test_config(json!({"data_flattening_max_level": 1}));
    let mut target = TestTarget::new(config);
    let schema = json!({
        "properties": {
            "a__b": {"type": "string"},
            "a": {"type": "object", "properties": {"b": {"type": "string"}}}
        }
    });

    let err = target
        .run(&[schema_line("items", schema, &["a__b"])])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SchemaConflict);
    assert!(target.warehouse.statements().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_without_key_properties_is_rejected_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let line = json!({"type": "SCHEMA", "stream": "orders", "schema": orders_schema()}).to_string();

    let err = target.run(&[line]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingKeyProperties);
}

#[tokio::test(flavor = "multi_thread")]
async fn primary_key_is_required_by_default_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));

    let err = target
        .run(&[schema_line("orders", orders_schema(), &[])])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PrimaryKeyRequired);
    assert!(target.warehouse.statements().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn record_before_schema_is_rejected_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));

    let err = target
        .run(&[record_line("orders", json!({"id": 1}))])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownStream);
}

#[tokio::test(flavor = "multi_thread")]
async fn unparsable_line_is_rejected_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));

    let err = target.run(&["not json".to_string()]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MessageParseFailed);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_utf8_line_is_rejected_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));

    let mut input = schema_line("orders", orders_schema(), &["id"]).into_bytes();
    input.extend_from_slice(b"\n{\"type\": \"RECORD\", \"stream\": \"orders\", ");
    input.extend_from_slice(b"\"record\": {\"id\": 1, \"name\": \"\xff\"}}\n");
    let mut output = Vec::new();

    let err = target
        .loader
        .run(input.as_slice(), &mut output)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MessageParseFailed);
    let detail = err.detail().unwrap();
    assert!(detail.contains(r#""stream": "orders""#));
    assert!(detail.contains('\u{FFFD}'));
    assert!(output.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_change_reports_state_before_adopting_new_schema_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let extended_schema = json!({
        "properties": {
            "id": {"type": "integer"},
            "name": {"type": ["null", "string"]},
            "note": {"type": ["null", "string"]}
        }
    });

    let mut output = Vec::new();
    for line in [
        schema_line("orders", orders_schema(), &["id"]),
        record_line("orders", json!({"id": 1, "name": "a"})),
        state_line(json!({"bookmarks": {"orders": {"p": 1}}})),
        schema_line("orders", extended_schema, &["id"]),
    ] {
        let message = Message::parse(&line).unwrap();
        target
            .loader
            .process_message(message, &mut output)
            .await
            .unwrap();
    }

    // The state covering the first record is written by the schema message itself.
    assert_eq!(
        parse_states(&output),
        vec![json!({"bookmarks": {"orders": {"p": 1}}})]
    );

    // The first record was loaded with the previous columns, before `note` was added.
    let statements = target.warehouse.statements().await;
    let copy = statements
        .iter()
        .position(|statement| matches!(statement, Statement::Copy { .. }))
        .unwrap();
    let add_note = statements
        .iter()
        .position(|statement| {
            matches!(statement, Statement::AddColumn { column, .. } if column.name == "note")
        })
        .unwrap();
    assert!(copy < add_note);

    let table = target.warehouse.table(TEST_SCHEMA, "orders").await.unwrap();
    assert_eq!(table.row_by("id", &json!(1)).unwrap()["note"], Value::Null);
    assert_eq!(target.loader.stream_stats("orders").unwrap().row_count, 0);
}
