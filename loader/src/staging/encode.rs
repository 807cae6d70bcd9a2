use std::io::{BufWriter, Write};

use bzip2::write::BzEncoder;
use config::shared::Compression;
use flate2::write::GzEncoder;
use serde_json::{Map, Value};

use crate::error::LoadResult;

/// Renders a flattened record as one delimited line, without the line terminator.
///
/// Every column becomes one field, in the given order. Missing values, nulls and empty strings
/// become empty fields; every other value is written as JSON, so strings are quoted and escaped.
pub fn encode_line(record: &Map<String, Value>, columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| match record.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(value)) if value.is_empty() => String::new(),
            Some(value) => value.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Writes `records` as newline terminated lines to `writer`, compressing them when asked.
pub fn write_lines<W>(
    writer: W,
    records: &[Map<String, Value>],
    columns: &[String],
    compression: Option<Compression>,
) -> LoadResult<()>
where
    W: Write,
{
    match compression {
        None => {
            let mut writer = BufWriter::new(writer);
            write_records(&mut writer, records, columns)?;
            writer.flush()?;
        }
        Some(Compression::Gzip) => {
            let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
            write_records(&mut encoder, records, columns)?;
            encoder.finish()?;
        }
        Some(Compression::Bzip2) => {
            let mut encoder = BzEncoder::new(writer, bzip2::Compression::default());
            write_records(&mut encoder, records, columns)?;
            encoder.finish()?;
        }
    }

    Ok(())
}

fn write_records<W>(
    writer: &mut W,
    records: &[Map<String, Value>],
    columns: &[String],
) -> LoadResult<()>
where
    W: Write,
{
    for record in records {
        writer.write_all(encode_line(record, columns).as_bytes())?;
        writer.write_all(b"\n")?;
    }

    Ok(())
}
