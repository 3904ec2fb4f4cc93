//! # stratum-engine
//!
//! The merge-and-consistency engine. [`Manager`] owns the registered sources and
//! decides which one owns each key; [`Dispatcher`] fans confirmed changes out to
//! per-key and per-prefix listeners; [`PrefixIndex`] resolves keys to registered
//! module prefixes.

pub mod dispatcher;
pub mod manager;
pub mod trie;

pub use dispatcher::{Dispatcher, Listener, ModuleListener, listener_fn, module_listener_fn};
pub use manager::{ConfiguredValue, DEFAULT_QUEUE_CAPACITY, Manager, SourceInfo};
pub use trie::PrefixIndex;
