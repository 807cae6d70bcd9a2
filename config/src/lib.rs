//! Configuration types shared by the loader library and the `target-redshift` binary.
//!
//! The run configuration is a single flat JSON (or YAML) document. [`load_config`] reads it and
//! applies `TARGET_`-prefixed environment overrides; [`shared::TargetConfig::validate`] checks it
//! eagerly so that a broken configuration fails before any message is read.

mod load;
pub mod shared;

pub use load::{LoadConfigError, load_config};
