//! Flattening of nested records and schemas into column names.
//!
//! Records and schemas share the naming algorithm so that a nested path always maps to the same
//! column on both sides.

use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::schema::property::{JsonType, JsonTypes, SchemaProperty, parse_properties};

/// Separator between the path segments of a flattened column name.
pub const KEY_SEPARATOR: &str = "__";

/// Column names at or above this length get their segments abbreviated.
const MAX_KEY_LENGTH: usize = 127;

/// Flattened column name to property mapping, sorted by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenedSchema {
    columns: Vec<(String, SchemaProperty)>,
}

impl FlattenedSchema {
    /// Returns the columns in name order.
    pub fn columns(&self) -> &[(String, SchemaProperty)] {
        &self.columns
    }

    /// Returns the column names in name order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Looks up a column by its flattened name.
    pub fn get(&self, name: &str) -> Option<&SchemaProperty> {
        self.columns
            .binary_search_by(|(column, _)| column.as_str().cmp(name))
            .ok()
            .map(|index| &self.columns[index].1)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Composes the column name of `key` nested below `parent`.
///
/// While the joined name is 127 characters or longer, segments are abbreviated from the first one
/// onwards: a segment is camelized and stripped of lowercase letters, or cut to its first three
/// characters when that leaves a single character or less.
pub fn flatten_key(key: &str, parent: &[String]) -> String {
    let mut segments: Vec<String> = parent.to_vec();
    segments.push(key.to_string());

    let mut reducer_index = 0;
    while segments.join(KEY_SEPARATOR).chars().count() >= MAX_KEY_LENGTH
        && reducer_index < segments.len()
    {
        let segment = &segments[reducer_index];
        let reduced: String = camelize(segment)
            .chars()
            .filter(|c| !c.is_ascii_lowercase())
            .collect();

        let abbreviated = if reduced.chars().count() > 1 {
            reduced
        } else {
            segment.chars().take(3).collect()
        };
        segments[reducer_index] = abbreviated.to_lowercase();
        reducer_index += 1;
    }

    segments.join(KEY_SEPARATOR)
}

/// Upper-cases the first character and every character following an underscore, dropping
/// those underscores.
fn camelize(segment: &str) -> String {
    let mut camelized = String::with_capacity(segment.len());
    let mut upper_next = true;
    let mut pending_underscore = false;

    for c in segment.chars() {
        if upper_next {
            camelized.extend(c.to_uppercase());
            upper_next = false;
            pending_underscore = false;
        } else if c == '_' {
            upper_next = true;
            pending_underscore = true;
        } else {
            camelized.push(c);
        }
    }

    if pending_underscore {
        camelized.push('_');
    }

    camelized
}

/// Flattens the `properties` of a JSON schema document.
///
/// Objects with described members are expanded into separate columns while the nesting level is
/// below `max_level`; every other property becomes a single column. Fails with
/// [`ErrorKind::SchemaConflict`] when two paths produce the same column name.
pub fn flatten_schema(schema: &Value, max_level: usize) -> LoadResult<FlattenedSchema> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(FlattenedSchema::default());
    };

    let mut columns = Vec::new();
    collect_columns(
        &parse_properties(properties),
        &[],
        0,
        max_level,
        &mut columns,
    );

    columns.sort_by(|(a, _), (b, _)| a.cmp(b));
    if let Some(window) = columns.windows(2).find(|window| window[0].0 == window[1].0) {
        bail!(
            ErrorKind::SchemaConflict,
            "Duplicate column name produced in schema",
            window[0].0.clone()
        );
    }

    Ok(FlattenedSchema { columns })
}

fn collect_columns(
    properties: &[(String, SchemaProperty)],
    parent: &[String],
    level: usize,
    max_level: usize,
    columns: &mut Vec<(String, SchemaProperty)>,
) {
    for (key, property) in properties {
        match property.nested_properties() {
            Some(nested) if level < max_level => {
                let mut path = parent.to_vec();
                path.push(key.clone());
                collect_columns(nested, &path, level + 1, max_level, columns);
            }
            _ => columns.push((flatten_key(key, parent), property.clone())),
        }
    }
}

/// Flattens a record the same way [`flatten_schema`] flattens its schema.
///
/// Objects are expanded while the nesting level is below `max_level`. Objects and arrays that
/// stay whole are serialized to JSON text, as is any value of a column declared exactly as
/// `["null", "object", "array"]`.
pub fn flatten_record(
    record: &Map<String, Value>,
    schema: Option<&FlattenedSchema>,
    max_level: usize,
) -> Map<String, Value> {
    let mut flattened = Map::new();
    flatten_record_into(record, schema, &[], 0, max_level, &mut flattened);
    flattened
}

fn flatten_record_into(
    record: &Map<String, Value>,
    schema: Option<&FlattenedSchema>,
    parent: &[String],
    level: usize,
    max_level: usize,
    flattened: &mut Map<String, Value>,
) {
    for (key, value) in record {
        match value {
            Value::Object(nested) if level < max_level => {
                let mut path = parent.to_vec();
                path.push(key.clone());
                flatten_record_into(nested, schema, &path, level + 1, max_level, flattened);
            }
            _ => {
                let column = flatten_key(key, parent);
                let value = if should_serialize(&column, value, schema) {
                    Value::String(value.to_string())
                } else {
                    value.clone()
                };
                flattened.insert(column, value);
            }
        }
    }
}

fn should_serialize(column: &str, value: &Value, schema: Option<&FlattenedSchema>) -> bool {
    if matches!(value, Value::Object(_) | Value::Array(_)) {
        return true;
    }

    let composite = JsonTypes::from([JsonType::Null, JsonType::Object, JsonType::Array]);
    schema
        .and_then(|schema| schema.get(column))
        .is_some_and(|property| property.types() == &composite)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_short_keys_are_joined() {
        assert_eq!(flatten_key("c", &["a".to_string(), "b".to_string()]), "a__b__c");
    }

    #[test]
    fn test_long_keys_are_abbreviated() {
        let parent = vec!["this_is_a_very_long_parent_segment".repeat(3)];
        let key = "x".repeat(40);

        let flattened = flatten_key(&key, &parent);

        assert!(flattened.chars().count() < MAX_KEY_LENGTH);
        assert_eq!(flattened, format!("{}__{}", "tiavlpsiavlpsiavlps", key));
    }

    #[test]
    fn test_segments_without_capitals_fall_back_to_prefix() {
        let parent = vec!["a".repeat(130)];

        assert_eq!(flatten_key("b", &parent), "aaa__b");
    }

    #[test]
    fn test_camelize() {
        assert_eq!(camelize("very_long_name"), "VeryLongName");
        assert_eq!(camelize("a__b"), "A_b");
        assert_eq!(camelize("trailing_"), "Trailing_");
    }

    #[test]
    fn test_schema_without_properties_is_empty() {
        assert!(flatten_schema(&json!({"type": "object"}), 0).unwrap().is_empty());
    }

    #[test]
    fn test_schema_is_flattened_up_to_max_level() {
        let schema = json!({
            "properties": {
                "id": {"type": "integer"},
                "nested": {
                    "type": ["null", "object"],
                    "properties": {
                        "leaf": {"type": "string"},
                        "deeper": {"type": "object", "properties": {"x": {"type": "number"}}}
                    }
                }
            }
        });

        let level_0 = flatten_schema(&schema, 0).unwrap();
        assert_eq!(level_0.names().collect::<Vec<_>>(), vec!["id", "nested"]);

        let level_1 = flatten_schema(&schema, 1).unwrap();
        assert_eq!(
            level_1.names().collect::<Vec<_>>(),
            vec!["id", "nested__deeper", "nested__leaf"]
        );

        let level_2 = flatten_schema(&schema, 2).unwrap();
        assert_eq!(
            level_2.names().collect::<Vec<_>>(),
            vec!["id", "nested__deeper__x", "nested__leaf"]
        );
    }

    #[test]
    fn test_flattening_twice_is_stable() {
        let schema = json!({
            "properties": {
                "b": {"type": "string"},
                "a": {
                    "type": "object",
                    "properties": {"z": {"type": "string"}, "y": {"type": "integer"}}
                }
            }
        });

        let first = flatten_schema(&schema, 1).unwrap();
        let second = flatten_schema(&schema, 1).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.names().collect::<Vec<_>>(), vec!["a__y", "a__z", "b"]);
    }

    #[test]
    fn test_duplicate_column_names_are_rejected() {
        let schema = json!({
            "properties": {
                "a__b": {"type": "string"},
                "a": {"type": "object", "properties": {"b": {"type": "string"}}}
            }
        });

        assert!(flatten_schema(&schema, 0).is_ok());

        let err = flatten_schema(&schema, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaConflict);
        assert_eq!(err.detail(), Some("a__b"));
    }

    #[test]
    fn test_record_round_trip_at_level_zero() {
        let record = object(json!({
            "id": 1,
            "name": "x",
            "obj": {"a": [1, 2], "b": {"c": null}},
            "list": [{"k": "v"}]
        }));

        let flattened = flatten_record(&record, None, 0);

        assert_eq!(
            flattened.keys().collect::<Vec<_>>(),
            vec!["id", "name", "obj", "list"]
        );
        for key in ["obj", "list"] {
            let text = flattened[key].as_str().unwrap();
            let parsed: Value = serde_json::from_str(text).unwrap();
            assert_eq!(parsed, record[key]);
        }
        assert_eq!(flattened["id"], json!(1));
    }

    #[test]
    fn test_record_is_flattened_up_to_max_level() {
        let record = object(json!({"a": {"b": {"c": 1}, "d": "x"}}));

        let flattened = flatten_record(&record, None, 1);

        assert_eq!(flattened["a__b"], json!(r#"{"c":1}"#));
        assert_eq!(flattened["a__d"], json!("x"));
    }

    #[test]
    fn test_composite_column_values_are_serialized() {
        let schema = flatten_schema(
            &json!({"properties": {"v": {"type": ["null", "object", "array"]}}}),
            0,
        )
        .unwrap();
        let record = object(json!({"v": "text"}));

        let flattened = flatten_record(&record, Some(&schema), 0);

        assert_eq!(flattened["v"], json!("\"text\""));
    }
}
