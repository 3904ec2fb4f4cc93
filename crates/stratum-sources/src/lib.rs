//! # stratum-sources
//!
//! Reference configuration sources: a writable in-memory source, a snapshot of
//! the process environment, and a file source that watches its files for changes.

pub mod env;
pub mod expand;
pub mod file;
pub mod memory;

pub use env::EnvSource;
pub use expand::{expand_env, expand_with};
pub use file::{FileFormat, FileHandler, FileSource};
pub use memory::MemorySource;
