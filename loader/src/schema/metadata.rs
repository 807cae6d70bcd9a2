//! `_sdc_*` metadata columns describing when and how a row was loaded.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};

/// Extraction timestamp reported by the source.
pub const EXTRACTED_AT_COLUMN: &str = "_sdc_extracted_at";

/// Time the row was buffered by the loader.
pub const BATCHED_AT_COLUMN: &str = "_sdc_batched_at";

/// Soft delete marker. Rows with a value are purged when hard delete is enabled.
pub const DELETED_AT_COLUMN: &str = "_sdc_deleted_at";

/// Adds the metadata column definitions to a stream's JSON schema.
///
/// A schema without a `properties` object gets one.
pub fn add_metadata_columns_to_schema(schema: &mut Value) {
    let Value::Object(schema) = schema else {
        return;
    };

    let properties = schema
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if !properties.is_object() {
        *properties = Value::Object(Map::new());
    }

    if let Value::Object(properties) = properties {
        properties.insert(
            EXTRACTED_AT_COLUMN.to_string(),
            json!({"type": ["null", "string"], "format": "date-time"}),
        );
        properties.insert(
            BATCHED_AT_COLUMN.to_string(),
            json!({"type": ["null", "string"], "format": "date-time"}),
        );
        properties.insert(
            DELETED_AT_COLUMN.to_string(),
            json!({"type": ["null", "string"]}),
        );
    }
}

/// Fills the metadata columns of a record.
///
/// `_sdc_deleted_at` keeps the value sent by the source, if any.
pub fn add_metadata_values_to_record(
    record: &mut Map<String, Value>,
    time_extracted: Option<&str>,
) {
    let deleted_at = record.get(DELETED_AT_COLUMN).cloned().unwrap_or(Value::Null);

    record.insert(
        EXTRACTED_AT_COLUMN.to_string(),
        time_extracted.map_or(Value::Null, |time| Value::String(time.to_string())),
    );
    record.insert(
        BATCHED_AT_COLUMN.to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    record.insert(DELETED_AT_COLUMN.to_string(), deleted_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_gains_metadata_columns() {
        let mut schema = json!({"properties": {"id": {"type": "integer"}}});

        add_metadata_columns_to_schema(&mut schema);

        let properties = schema["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 4);
        assert_eq!(properties[EXTRACTED_AT_COLUMN]["format"], "date-time");
        assert_eq!(properties[DELETED_AT_COLUMN]["type"], json!(["null", "string"]));
    }

    #[test]
    fn test_schema_without_properties_gains_them() {
        let mut schema = json!({"type": "object"});

        add_metadata_columns_to_schema(&mut schema);

        assert_eq!(schema["properties"].as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_record_gains_metadata_values() {
        let mut record = Map::new();
        record.insert("id".to_string(), json!(1));
        record.insert(DELETED_AT_COLUMN.to_string(), json!("2024-01-02T00:00:00Z"));

        add_metadata_values_to_record(&mut record, Some("2024-01-01T00:00:00Z"));

        assert_eq!(record[EXTRACTED_AT_COLUMN], json!("2024-01-01T00:00:00Z"));
        assert_eq!(record[DELETED_AT_COLUMN], json!("2024-01-02T00:00:00Z"));
        assert!(record[BATCHED_AT_COLUMN].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_missing_values_are_null() {
        let mut record = Map::new();

        add_metadata_values_to_record(&mut record, None);

        assert_eq!(record[EXTRACTED_AT_COLUMN], Value::Null);
        assert_eq!(record[DELETED_AT_COLUMN], Value::Null);
    }
}
