use std::collections::BTreeSet;

use serde_json::{Map, Value};

/// JSON schema primitive type names understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Object,
    Array,
}

impl JsonType {
    fn from_name(name: &str) -> Option<JsonType> {
        match name {
            "null" => Some(JsonType::Null),
            "boolean" => Some(JsonType::Boolean),
            "integer" => Some(JsonType::Integer),
            "number" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            "object" => Some(JsonType::Object),
            "array" => Some(JsonType::Array),
            _ => None,
        }
    }
}

/// Set of types declared by a schema property.
pub type JsonTypes = BTreeSet<JsonType>;

/// Shape of a single schema property.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaProperty {
    /// Anything that is neither an object nor an array.
    Scalar {
        types: JsonTypes,
        format: Option<String>,
        max_length: Option<u64>,
    },
    /// A property declaring the `object` type. `properties` is `None` when the schema does not
    /// describe the object's members.
    Object {
        types: JsonTypes,
        properties: Option<Vec<(String, SchemaProperty)>>,
    },
    /// A property declaring the `array` type but not `object`.
    Array {
        types: JsonTypes,
        items: Option<Box<SchemaProperty>>,
    },
}

impl SchemaProperty {
    /// Reads a property from its JSON schema document.
    ///
    /// Properties without a `type` key go through the legacy alternative shim: when the first
    /// value of the property is a non-empty array whose first element declares exactly `string`,
    /// `array` or `object` as its type, that element is used with `null` added to its types.
    /// This covers `{"anyOf": [{"type": "string", ...}, ...]}` shaped properties. Any other untyped
    /// property yields `None` and is dropped by the callers.
    pub fn from_json(value: &Value) -> Option<SchemaProperty> {
        let object = value.as_object()?;

        match object.get("type") {
            Some(declared) => Some(Self::from_typed(object, parse_types(declared))),
            None => Self::from_first_alternative(object),
        }
    }

    fn from_first_alternative(object: &Map<String, Value>) -> Option<SchemaProperty> {
        let alternative = object.values().next()?.as_array()?.first()?.as_object()?;

        let widened = match alternative.get("type")?.as_str()? {
            "string" => JsonType::String,
            "array" => JsonType::Array,
            "object" => JsonType::Object,
            _ => return None,
        };

        Some(Self::from_typed(
            alternative,
            JsonTypes::from([JsonType::Null, widened]),
        ))
    }

    fn from_typed(object: &Map<String, Value>, types: JsonTypes) -> SchemaProperty {
        if types.contains(&JsonType::Object) {
            let properties = object
                .get("properties")
                .and_then(Value::as_object)
                .map(parse_properties);

            return SchemaProperty::Object { types, properties };
        }

        if types.contains(&JsonType::Array) {
            let items = object
                .get("items")
                .and_then(SchemaProperty::from_json)
                .map(Box::new);

            return SchemaProperty::Array { types, items };
        }

        SchemaProperty::Scalar {
            types,
            format: object
                .get("format")
                .and_then(Value::as_str)
                .map(str::to_string),
            max_length: object.get("maxLength").and_then(Value::as_u64),
        }
    }

    /// Returns the declared types.
    pub fn types(&self) -> &JsonTypes {
        match self {
            SchemaProperty::Scalar { types, .. }
            | SchemaProperty::Object { types, .. }
            | SchemaProperty::Array { types, .. } => types,
        }
    }

    /// Returns whether the property declares `json_type`.
    pub fn has_type(&self, json_type: JsonType) -> bool {
        self.types().contains(&json_type)
    }

    /// Returns the declared `format`, only scalars carry one.
    pub fn format(&self) -> Option<&str> {
        match self {
            SchemaProperty::Scalar { format, .. } => format.as_deref(),
            _ => None,
        }
    }

    /// Returns the declared `maxLength`, only scalars carry one.
    pub fn max_length(&self) -> Option<u64> {
        match self {
            SchemaProperty::Scalar { max_length, .. } => *max_length,
            _ => None,
        }
    }

    /// Returns the nested properties of an object whose members are described.
    pub fn nested_properties(&self) -> Option<&[(String, SchemaProperty)]> {
        match self {
            SchemaProperty::Object {
                properties: Some(properties),
                ..
            } => Some(properties.as_slice()),
            _ => None,
        }
    }
}

/// Reads the `properties` member of a schema document, dropping entries that cannot be read.
pub fn parse_properties(properties: &Map<String, Value>) -> Vec<(String, SchemaProperty)> {
    properties
        .iter()
        .filter_map(|(name, value)| {
            SchemaProperty::from_json(value).map(|property| (name.clone(), property))
        })
        .collect()
}

fn parse_types(declared: &Value) -> JsonTypes {
    match declared {
        Value::String(name) => JsonType::from_name(name).into_iter().collect(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .filter_map(JsonType::from_name)
            .collect(),
        _ => JsonTypes::new(),
    }
}
