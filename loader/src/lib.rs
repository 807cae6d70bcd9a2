//! Loader of newline-delimited extraction messages into an Amazon Redshift warehouse.
//!
//! Records are buffered per stream, keyed by primary key, and flushed in batches: every batch is
//! written as delimited files, staged in S3, bulk-loaded into a staging table with `COPY` and
//! merged into the target table. Tables follow schema drift by adding new columns and versioning
//! columns whose type changed. Checkpoints received from upstream are echoed back once the data
//! they cover has been loaded.

pub mod error;
mod macros;
pub mod message;
pub mod pipeline;
pub mod schema;
pub mod staging;
pub mod validation;
pub mod warehouse;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
