use serde_json::{Map, Value};

/// Key of the per-stream positions inside a state value.
const BOOKMARKS_KEY: &str = "bookmarks";

/// Tracks which upstream state is safe to report.
///
/// The latest state received from upstream may cover records that are still buffered. The
/// flushed state only advances for streams whose records reached the warehouse.
#[derive(Debug, Default)]
pub struct CheckpointTracker {
    latest: Option<Value>,
    flushed: Option<Value>,
}

impl CheckpointTracker {
    pub fn new() -> CheckpointTracker {
        CheckpointTracker::default()
    }

    /// Records a state received from upstream.
    ///
    /// The first state received becomes the flushed state as is. A `null` state counts as no
    /// state at all.
    pub fn observe(&mut self, state: Value) {
        let state = (!state.is_null()).then_some(state);
        if self.flushed.is_none() {
            self.flushed.clone_from(&state);
        }
        self.latest = state;
    }

    /// Advances the flushed state after a flush.
    ///
    /// With `streams`, only the bookmarks of those streams are copied from the latest state.
    /// Without, the latest state becomes the flushed state.
    pub fn mark_flushed(&mut self, streams: Option<&[String]>) {
        let Some(streams) = streams else {
            self.flushed = self.latest.clone();
            return;
        };

        let Some(latest_bookmarks) = self
            .latest
            .as_ref()
            .and_then(|latest| latest.get(BOOKMARKS_KEY))
            .and_then(Value::as_object)
        else {
            return;
        };

        for stream in streams {
            let Some(bookmark) = latest_bookmarks.get(stream) else {
                continue;
            };

            let flushed = self
                .flushed
                .get_or_insert_with(|| Value::Object(Map::new()));
            let Some(flushed) = flushed.as_object_mut() else {
                continue;
            };

            let bookmarks = flushed
                .entry(BOOKMARKS_KEY)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(bookmarks) = bookmarks.as_object_mut() {
                bookmarks.insert(stream.clone(), bookmark.clone());
            }
        }
    }

    /// Returns the state to report, if any.
    pub fn flushed(&self) -> Option<&Value> {
        self.flushed.as_ref()
    }

    #[cfg(test)]
    fn latest(&self) -> Option<&Value> {
        self.latest.as_ref()
    }
}
