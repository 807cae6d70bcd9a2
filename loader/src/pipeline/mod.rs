//! The message loop: buffering, flushing and state reporting.

mod buffer;
mod checkpoint;
mod flush;
mod loader;

pub use buffer::RecordBuffer;
pub use checkpoint::CheckpointTracker;
pub use flush::{StreamBatch, flush_batches, flush_parallelism};
pub use loader::{Loader, StreamStats, load_table_cache};
