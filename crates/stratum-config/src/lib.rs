//! # stratum-config
//!
//! Settings for the Stratum engine itself: queue sizing, logging and which
//! sources to register. Read from `stratum.toml`, then overridden by
//! `STRATUM_*` environment variables.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::StratumConfig;
pub use schema::{ConfigWarning, WarningSeverity};
