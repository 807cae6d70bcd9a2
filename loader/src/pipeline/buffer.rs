use std::collections::HashMap;

use serde_json::{Map, Value};

/// Records of one stream waiting to be flushed, keyed by primary key.
///
/// A record replaces the buffered record with the same key but keeps its position, so the batch
/// holds the last version of every key in order of first appearance.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    positions: HashMap<String, usize>,
    records: Vec<Map<String, Value>>,
}

impl RecordBuffer {
    pub fn new() -> RecordBuffer {
        RecordBuffer::default()
    }

    /// Buffers `record` under `key`. Returns `true` when the key was not buffered yet.
    pub fn insert(&mut self, key: String, record: Map<String, Value>) -> bool {
        match self.positions.get(&key) {
            Some(&position) => {
                self.records[position] = record;
                false
            }
            None => {
                self.positions.insert(key, self.records.len());
                self.records.push(record);
                true
            }
        }
    }

    #[cfg(test)]
    fn contains_key(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    #[cfg(test)]
    fn get(&self, key: &str) -> Option<&Map<String, Value>> {
        self.positions
            .get(key)
            .map(|&position| &self.records[position])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes and returns every buffered record, releasing the buffer's memory.
    pub fn take(&mut self) -> Vec<Map<String, Value>> {
        self.positions = HashMap::new();
        std::mem::take(&mut self.records)
    }
}
