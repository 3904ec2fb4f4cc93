use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::value::Value;

/// The kind of change an [`Event`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Create => f.write_str("CREATE"),
            EventKind::Update => f.write_str("UPDATE"),
            EventKind::Delete => f.write_str("DELETE"),
        }
    }
}

/// A change notification for one key, attributable to one source.
///
/// Sources build events describing their *local* view. The engine recomputes
/// kind, value and owning source from the merged view before anything reaches a
/// listener, and marks the result `delivered` so that replaying it into the
/// engine is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub source: String,
    pub kind: EventKind,
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub delivered: bool,
}

impl Event {
    pub fn new(
        source: impl Into<String>,
        kind: EventKind,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            key: key.into(),
            value,
            delivered: false,
        }
    }

    pub fn create(source: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self::new(source, EventKind::Create, key, value)
    }

    pub fn update(source: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self::new(source, EventKind::Update, key, value)
    }

    pub fn delete(source: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self::new(source, EventKind::Delete, key, value)
    }

    /// Malformed events carry no key or no source.
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty() && !self.source.is_empty()
    }
}

/// Compare two snapshots of one source and produce the events that turn
/// `current` into `updated`.
///
/// New keys yield `Create`, keys whose value changed yield `Update` with the new
/// value, and keys missing from `updated` yield `Delete` carrying the old value.
/// Ordering of the returned events is unspecified.
pub fn populate_events(
    source: &str,
    current: &HashMap<String, Value>,
    updated: &HashMap<String, Value>,
) -> Vec<Event> {
    let mut events = Vec::new();

    for (key, value) in updated {
        match current.get(key) {
            None => events.push(Event::create(source, key.as_str(), value.clone())),
            Some(old) if old != value => {
                events.push(Event::update(source, key.as_str(), value.clone()))
            }
            Some(_) => {}
        }
    }

    for (key, value) in current {
        if !updated.contains_key(key) {
            events.push(Event::delete(source, key.as_str(), value.clone()));
        }
    }

    events
}
