//! Helpers shared by unit and integration tests.

use std::sync::Arc;

use config::shared::TargetConfig;
use object_store::ObjectStore;
use object_store::memory::InMemory;
use serde_json::{Value, json};

use crate::pipeline::Loader;
use crate::test_utils::warehouse::MemoryWarehouse;

pub mod warehouse;

/// Target schema every test stream is routed to.
pub const TEST_SCHEMA: &str = "dummy_schema";

/// Returns a valid configuration with `overrides` applied on top.
pub fn test_config(overrides: Value) -> TargetConfig {
    let mut value = json!({
        "host": "localhost",
        "port": 5439,
        "user": "loader",
        "password": "secret",
        "dbname": "dev",
        "aws_access_key_id": "dummy-key-id",
        "aws_secret_access_key": "dummy-secret",
        "s3_bucket": "dummy-bucket",
        "s3_key_prefix": "staging/",
        "default_target_schema": TEST_SCHEMA,
    });

    if let (Some(base), Value::Object(overrides)) = (value.as_object_mut(), overrides) {
        base.extend(overrides);
    }

    serde_json::from_value(value).expect("test config must deserialize")
}

/// Loader wired to an in-memory warehouse and object store.
pub struct TestTarget {
    pub loader: Loader<MemoryWarehouse>,
    pub warehouse: MemoryWarehouse,
    pub store: Arc<InMemory>,
}

impl TestTarget {
    /// Builds a target without table cache.
    pub fn new(config: TargetConfig) -> TestTarget {
        let store = Arc::new(InMemory::new());
        let warehouse = MemoryWarehouse::with_store(store.clone() as Arc<dyn ObjectStore>);
        TestTarget::with_warehouse(config, warehouse, store)
    }

    /// Builds a target on top of an existing warehouse and store.
    pub fn with_warehouse(
        config: TargetConfig,
        warehouse: MemoryWarehouse,
        store: Arc<InMemory>,
    ) -> TestTarget {
        let loader = Loader::new(config, warehouse.clone(), store.clone(), None)
            .expect("test loader must build");

        TestTarget {
            loader,
            warehouse,
            store,
        }
    }

    /// Runs the loader over `lines` and returns the states it wrote.
    pub async fn run(&mut self, lines: &[String]) -> crate::error::LoadResult<Vec<Value>> {
        let input = lines.join("\n");
        let mut output = Vec::new();
        self.loader.run(input.as_bytes(), &mut output).await?;

        Ok(parse_states(&output))
    }
}

/// Parses the states written by a loader, one JSON document per line.
pub fn parse_states(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).expect("state line must be JSON"))
        .collect()
}

pub fn schema_line(stream: &str, schema: Value, key_properties: &[&str]) -> String {
    json!({
        "type": "SCHEMA",
        "stream": stream,
        "schema": schema,
        "key_properties": key_properties,
    })
    .to_string()
}

pub fn record_line(stream: &str, record: Value) -> String {
    json!({
        "type": "RECORD",
        "stream": stream,
        "record": record,
    })
    .to_string()
}

pub fn state_line(value: Value) -> String {
    json!({"type": "STATE", "value": value}).to_string()
}

/// Schema with an integer `id` and a string `name`.
pub fn orders_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {"type": "integer"},
            "name": {"type": ["null", "string"]}
        }
    })
}
