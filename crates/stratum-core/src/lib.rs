//! # stratum-core
//!
//! Core types, traits, and primitives for the Stratum configuration engine.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! change events, the source contract, the sink handle sources push into, and helpers
//! for working with dynamic configuration values.

pub mod error;
pub mod event;
pub mod source;
pub mod value;

pub use error::{Result, StratumError};
pub use event::{Event, EventKind, populate_events};
pub use source::{ConfigSource, EventHandler, EventSink, SinkMessage};
pub use value::Value;
