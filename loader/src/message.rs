//! Parsing of the newline-delimited message protocol read from standard input.

use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};

/// Schema announcement for a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMessage {
    pub stream: String,
    /// JSON schema of the stream's records.
    pub schema: Value,
    /// Declared primary key columns. `None` when the message omits the field entirely.
    pub key_properties: Option<Vec<String>>,
}

/// One row of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Map<String, Value>,
    /// Extraction timestamp reported by the source.
    pub time_extracted: Option<String>,
}

/// Opaque checkpoint emitted by the source.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMessage {
    pub value: Value,
}

/// Table version activation. Carries no data for this loader.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivateVersionMessage {
    pub stream: String,
    pub version: Option<i64>,
}

/// A single parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Schema(SchemaMessage),
    Record(RecordMessage),
    State(StateMessage),
    ActivateVersion(ActivateVersionMessage),
}

impl Message {
    /// Parses one input line.
    ///
    /// Every error carries the offending line as detail.
    pub fn parse(line: &str) -> LoadResult<Message> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => bail!(
                ErrorKind::MessageParseFailed,
                "Unable to parse message",
                format!("{err}: {line}"),
                source: err
            ),
        };

        let Value::Object(mut object) = value else {
            bail!(
                ErrorKind::MessageParseFailed,
                "Message is not a JSON object",
                line
            );
        };

        let message_type = match object.get("type") {
            Some(Value::String(message_type)) => message_type.clone(),
            _ => bail!(
                ErrorKind::MissingMessageField,
                "Line is missing required key 'type'",
                line
            ),
        };

        let message = match message_type.as_str() {
            "SCHEMA" => {
                let stream = required_stream(&object, line)?;
                let Some(schema) = object.remove("schema") else {
                    bail!(
                        ErrorKind::MissingMessageField,
                        "Line is missing required key 'schema'",
                        line
                    );
                };
                let key_properties = match object.remove("key_properties") {
                    None => None,
                    Some(value) => Some(parse_key_properties(value, line)?),
                };

                Message::Schema(SchemaMessage {
                    stream,
                    schema,
                    key_properties,
                })
            }
            "RECORD" => {
                let stream = required_stream(&object, line)?;
                let record = match object.remove("record") {
                    Some(Value::Object(record)) => record,
                    _ => bail!(
                        ErrorKind::MissingMessageField,
                        "Line is missing required key 'record'",
                        line
                    ),
                };
                let time_extracted = match object.remove("time_extracted") {
                    Some(Value::String(time_extracted)) => Some(time_extracted),
                    _ => None,
                };

                Message::Record(RecordMessage {
                    stream,
                    record,
                    time_extracted,
                })
            }
            "STATE" => {
                let Some(value) = object.remove("value") else {
                    bail!(
                        ErrorKind::MissingMessageField,
                        "Line is missing required key 'value'",
                        line
                    );
                };

                Message::State(StateMessage { value })
            }
            "ACTIVATE_VERSION" => Message::ActivateVersion(ActivateVersionMessage {
                stream: required_stream(&object, line)?,
                version: object.get("version").and_then(Value::as_i64),
            }),
            other => bail!(
                ErrorKind::UnknownMessageType,
                "Unknown message type",
                format!("{other} in message {line}")
            ),
        };

        Ok(message)
    }
}

fn required_stream(object: &Map<String, Value>, line: &str) -> LoadResult<String> {
    match object.get("stream") {
        Some(Value::String(stream)) => Ok(stream.clone()),
        _ => bail!(
            ErrorKind::MissingMessageField,
            "Line is missing required key 'stream'",
            line
        ),
    }
}

fn parse_key_properties(value: Value, line: &str) -> LoadResult<Vec<String>> {
    let Value::Array(items) = value else {
        bail!(
            ErrorKind::MessageParseFailed,
            "'key_properties' must be an array of strings",
            line
        );
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(key) => Ok(key),
            _ => bail!(
                ErrorKind::MessageParseFailed,
                "'key_properties' must be an array of strings",
                line
            ),
        })
        .collect()
}
