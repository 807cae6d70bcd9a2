//! Staging of batches as delimited files in object storage.

mod encode;
mod stager;
mod store;

pub use encode::{encode_line, write_lines};
pub use stager::{StagedBatch, Stager};
pub use store::build_s3_store;
