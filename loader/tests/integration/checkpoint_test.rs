use loader::test_utils::{
    TestTarget, orders_schema, record_line, schema_line, state_line, test_config,
};
use serde_json::{Value, json};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn partial_flush_only_advances_flushed_streams_test() {
    init_test_tracing();
    let config = test_config(json!({"batch_size_rows": 2, "flush_all_streams": false}));
    let mut target = TestTarget::new(config);

    let states = target
        .run(&[
            schema_line("a", orders_schema(), &["id"]),
            schema_line("b", orders_schema(), &["id"]),
            state_line(json!({"bookmarks": {"a": {"p": 0}, "b": {"p": 0}}})),
            record_line("a", json!({"id": 1})),
            record_line("b", json!({"id": 1})),
            state_line(json!({"bookmarks": {"a": {"p": 1}, "b": {"p": 1}}})),
            record_line("a", json!({"id": 2})),
        ])
        .await
        .unwrap();

    assert_eq!(
        states,
        vec![
            json!({"bookmarks": {"a": {"p": 1}, "b": {"p": 0}}}),
            json!({"bookmarks": {"a": {"p": 1}, "b": {"p": 1}}}),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn flush_all_streams_reports_latest_state_test() {
    init_test_tracing();
    let config = test_config(json!({"batch_size_rows": 2, "flush_all_streams": true}));
    let mut target = TestTarget::new(config);

    let states = target
        .run(&[
            schema_line("a", orders_schema(), &["id"]),
            schema_line("b", orders_schema(), &["id"]),
            state_line(json!({"bookmarks": {"a": {"p": 0}, "b": {"p": 0}}})),
            record_line("a", json!({"id": 1})),
            record_line("b", json!({"id": 1})),
            state_line(json!({"bookmarks": {"a": {"p": 1}, "b": {"p": 1}}})),
            record_line("a", json!({"id": 2})),
        ])
        .await
        .unwrap();

    // The state is written again at the end even with nothing left to load.
    assert_eq!(
        states,
        vec![
            json!({"bookmarks": {"a": {"p": 1}, "b": {"p": 1}}}),
            json!({"bookmarks": {"a": {"p": 1}, "b": {"p": 1}}}),
        ]
    );
    assert_eq!(target.loader.stream_stats("b").unwrap().row_count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn state_without_records_is_reported_at_end_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let state = json!({"bookmarks": {"orders": {"p": 9}}});

    let states = target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            state_line(state.clone()),
        ])
        .await
        .unwrap();

    assert_eq!(states, vec![state]);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_state_is_reported_without_upstream_state_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));

    let states = target
        .run(&[
            schema_line("orders", orders_schema(), &["id"]),
            record_line("orders", json!({"id": 1})),
        ])
        .await
        .unwrap();

    assert!(states.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn null_state_is_never_written_test() {
    init_test_tracing();
    let mut target = TestTarget::new(test_config(json!({})));
    let input = [
        schema_line("orders", orders_schema(), &["id"]),
        record_line("orders", json!({"id": 1})),
        state_line(Value::Null),
    ]
    .join("\n");

    let mut output = Vec::new();
    target
        .loader
        .run(input.as_bytes(), &mut output)
        .await
        .unwrap();

    assert!(output.is_empty());
    assert!(target.loader.flushed_state().is_none());
}
