//! The merge engine.
//!
//! The manager keeps one entry per key in the merged view: the owning source and
//! the value it last produced, stored together so readers never see one without
//! the other. Every change to that view happens under a single update lock, where
//! the winner for the affected key is recomputed from all sources. Dispatch runs
//! after the lock is released, but in the same order the resolutions happened.

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stratum_core::value::{self, Value};
use stratum_core::{
    ConfigSource, Event, EventHandler, EventKind, EventSink, Result, SinkMessage, StratumError,
};

use crate::dispatcher::{Dispatcher, Listener, ModuleListener};

/// Default capacity of the queue between sources and the intake loop.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A merged value together with the source that owns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfiguredValue {
    pub value: Value,
    pub source: String,
}

/// Name and priority of a registered source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub priority: i32,
}

/// Owns the registered sources and the merged view over them.
pub struct Manager {
    /// Registration order breaks priority ties.
    sources: RwLock<Vec<Arc<dyn ConfigSource>>>,
    entries: DashMap<String, ConfiguredValue>,
    update_lock: Mutex<()>,
    /// Taken before the update lock is released so dispatch order matches resolution order.
    dispatch_gate: Mutex<()>,
    dispatcher: Dispatcher,
    sink: EventSink,
    handle: Handle,
    shutdown: CancellationToken,
    intake: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Create an engine on the current Tokio runtime and start its intake loop.
    ///
    /// `queue_capacity` bounds how many pushes sources may have in flight before
    /// their sends wait.
    pub fn start(queue_capacity: usize) -> Result<Arc<Self>> {
        let handle = Handle::try_current()
            .map_err(|e| StratumError::Config(format!("a Tokio runtime is required: {e}")))?;
        let (sink, rx) = EventSink::channel(queue_capacity);

        let manager = Arc::new(Self {
            sources: RwLock::new(Vec::new()),
            entries: DashMap::new(),
            update_lock: Mutex::new(()),
            dispatch_gate: Mutex::new(()),
            dispatcher: Dispatcher::new(handle.clone()),
            sink,
            handle: handle.clone(),
            shutdown: CancellationToken::new(),
            intake: Mutex::new(None),
        });

        let task = handle.spawn(run_intake(
            Arc::downgrade(&manager),
            rx,
            manager.shutdown.clone(),
        ));
        *manager.intake.lock() = Some(task);

        info!(queue_capacity, "configuration manager started");
        Ok(manager)
    }

    /// Handle sources push their changes through.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ── Sources ────────────────────────────────────────────────

    /// Register a source, merge its current snapshot and start its watch task.
    ///
    /// Fails on an empty or already-registered name, leaving existing state as it
    /// was, and when the initial pull fails, in which case the source is not kept.
    pub fn add_source(&self, source: Arc<dyn ConfigSource>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(StratumError::Shutdown);
        }
        let name = source.name().to_string();
        if name.is_empty() {
            error!("nil or invalid source supplied");
            return Err(StratumError::InvalidSource("empty source name".into()));
        }

        {
            let _guard = self.update_lock.lock();
            {
                let mut sources = self.sources.write();
                if sources.iter().any(|s| s.name() == name) {
                    error!(source = %name, "duplicate source supplied");
                    return Err(StratumError::DuplicateSource(name));
                }
                sources.push(Arc::clone(&source));
            }

            let snapshot = match source.configurations() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.sources.write().retain(|s| s.name() != name);
                    error!(source = %name, error = %e, "fail to load configuration");
                    return Err(StratumError::source_failure(&name, e));
                }
            };
            if snapshot.is_empty() {
                warn!(source = %name, "empty config from source");
            }
            self.adopt_snapshot(&source, snapshot);
        }

        let sink = self.sink.clone();
        let watched = Arc::clone(&source);
        self.handle.spawn(async move {
            if let Err(e) = watched.watch(sink).await {
                warn!(source = %watched.name(), error = %e, "source watch stopped");
            }
        });

        info!(source = %name, priority = source.priority(), "source added");
        Ok(())
    }

    /// Take ownership of every key the new source asserts that is unowned or
    /// owned by a lower-precedence source. Caller holds the update lock.
    fn adopt_snapshot(&self, source: &Arc<dyn ConfigSource>, snapshot: HashMap<String, Value>) {
        let priority = source.priority();
        for (key, value) in snapshot {
            if value.is_null() {
                continue;
            }
            let owner = self.entries.get(&key).map(|e| e.source.clone());
            let adopt = match owner {
                None => true,
                Some(owner) => self
                    .priority_of(&owner)
                    .is_none_or(|current| current > priority),
            };
            if adopt {
                self.entries.insert(
                    key,
                    ConfiguredValue {
                        value,
                        source: source.name().to_string(),
                    },
                );
            }
        }
    }

    fn priority_of(&self, name: &str) -> Option<i32> {
        self.sources
            .read()
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.priority())
    }

    fn find_source(&self, name: &str) -> Option<Arc<dyn ConfigSource>> {
        self.sources
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Registered sources in registration order.
    pub fn sources(&self) -> Vec<SourceInfo> {
        self.sources
            .read()
            .iter()
            .map(|s| SourceInfo {
                name: s.name().to_string(),
                priority: s.priority(),
            })
            .collect()
    }

    /// Have one source re-read its backing store, then re-pull it and resolve
    /// every key it asserts now or owned before.
    ///
    /// Changes reach key listeners per event and module listeners as one batch.
    pub async fn refresh(&self, source_name: &str) -> Result<()> {
        let source = self
            .find_source(source_name)
            .ok_or_else(|| StratumError::UnknownSource(source_name.to_string()))?;
        source.refresh().await.map_err(|e| {
            error!(source = source_name, error = %e, "fail to reload source");
            StratumError::source_failure(source_name, e)
        })?;
        let snapshot = source.configurations().map_err(|e| {
            error!(source = source_name, error = %e, "fail to load configuration");
            StratumError::source_failure(source_name, e)
        })?;

        let mut keys: HashSet<String> = snapshot.keys().cloned().collect();
        keys.extend(
            self.entries
                .iter()
                .filter(|e| e.source == source_name)
                .map(|e| e.key().clone()),
        );

        let events: Vec<Event> = keys
            .into_iter()
            .map(|key| {
                let value = snapshot.get(&key).cloned().unwrap_or(Value::Null);
                Event::update(source_name, key, value)
            })
            .collect();
        self.on_changes(events);
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Name of the source that owns `key`.
    pub fn source_of(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.source.clone())
    }

    /// The whole merged view.
    pub fn configs(&self) -> HashMap<String, Value> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value.clone()))
            .collect()
    }

    /// The whole merged view, with the owning source of every key.
    pub fn configs_with_sources(&self) -> HashMap<String, ConfiguredValue> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Decode one value into any serde type.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .get(key)
            .ok_or_else(|| StratumError::KeyNotExist(key.to_string()))?;
        value::decode(key, &value)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.typed(key, value::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.typed(key, value::to_i64).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.typed(key, value::to_f64).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.typed(key, value::to_bool).unwrap_or(default)
    }

    fn typed<T>(&self, key: &str, convert: fn(&str, &Value) -> Result<T>) -> Option<T> {
        let value = self.get(key)?;
        match convert(key, &value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key, error = %e, "falling back to default");
                None
            }
        }
    }

    /// Deserialize the merged view into `T`, nesting dotted keys
    /// (`a.b.c` fills field `c` of field `b` of field `a`).
    ///
    /// Fields missing from the view need `#[serde(default)]`.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T> {
        let tree = value::expand(&self.configs());
        serde_json::from_value(tree).map_err(|e| {
            error!(error = %e, "invalid object supplied");
            StratumError::InvalidObject(e.to_string())
        })
    }

    /// [`Manager::unmarshal`] into an existing value.
    pub fn unmarshal_into<T: DeserializeOwned>(&self, target: &mut T) -> Result<()> {
        *target = self.unmarshal()?;
        Ok(())
    }

    /// Deserialize only the subtree under `prefix`.
    pub fn unmarshal_at<T: DeserializeOwned>(&self, prefix: &str) -> Result<T> {
        let tree = value::expand(&self.configs());
        let mut node = &tree;
        for part in prefix.split('.') {
            node = node
                .get(part)
                .ok_or_else(|| StratumError::KeyNotExist(prefix.to_string()))?;
        }
        serde_json::from_value(node.clone()).map_err(|e| {
            error!(prefix, error = %e, "invalid object supplied");
            StratumError::InvalidObject(e.to_string())
        })
    }

    /// Write every source's own snapshot as pretty JSON (`source -> {key: value}`).
    pub fn marshal<W: Write>(&self, writer: W) -> Result<()> {
        let sources: Vec<Arc<dyn ConfigSource>> = self.sources.read().clone();
        let mut all: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for source in sources {
            match source.configurations() {
                Ok(config) if !config.is_empty() => {
                    all.insert(source.name().to_string(), config.into_iter().collect());
                }
                Ok(_) => {}
                Err(e) => error!(source = %source.name(), error = %e, "get source error"),
            }
        }
        serde_json::to_writer_pretty(writer, &all)?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────

    /// Ask every source to store `value` under `key`. Read-only sources ignore it.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let sources: Vec<Arc<dyn ConfigSource>> = self.sources.read().clone();
        for source in sources {
            source.set(key, value.clone()).await?;
        }
        Ok(())
    }

    /// Ask every source to remove `key`. Read-only sources ignore it.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let sources: Vec<Arc<dyn ConfigSource>> = self.sources.read().clone();
        for source in sources {
            source.delete(key).await?;
        }
        Ok(())
    }

    // ── Listeners ──────────────────────────────────────────────

    pub fn register_listener(&self, listener: Arc<dyn Listener>, patterns: &[&str]) -> Result<()> {
        self.dispatcher.register_listener(listener, patterns)
    }

    pub fn unregister_listener(
        &self,
        listener: &Arc<dyn Listener>,
        patterns: &[&str],
    ) -> Result<()> {
        self.dispatcher.unregister_listener(listener, patterns)
    }

    pub fn register_module_listener(
        &self,
        listener: Arc<dyn ModuleListener>,
        prefixes: &[&str],
    ) -> Result<()> {
        self.dispatcher.register_module_listener(listener, prefixes)
    }

    pub fn unregister_module_listener(
        &self,
        listener: &Arc<dyn ModuleListener>,
        prefixes: &[&str],
    ) -> Result<()> {
        self.dispatcher.unregister_module_listener(listener, prefixes)
    }

    // ── Resolution ─────────────────────────────────────────────

    /// The highest-precedence source currently holding a non-null value for `key`.
    fn winner_for(&self, key: &str) -> Option<ConfiguredValue> {
        let sources = self.sources.read();
        let mut best: Option<(&Arc<dyn ConfigSource>, i32, Value)> = None;
        for source in sources.iter() {
            let Ok(value) = source.configuration_by_key(key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let priority = source.priority();
            if best.as_ref().is_none_or(|(_, p, _)| priority < *p) {
                best = Some((source, priority, value));
            }
        }
        best.map(|(source, _, value)| ConfiguredValue {
            value,
            source: source.name().to_string(),
        })
    }

    /// Recompute the owner of `event.key` from global state and apply it.
    ///
    /// The event's own kind and value are not trusted: a lower-precedence update
    /// may be masked, and a delete may fall back to another source's value.
    /// Returns the externally visible event, or `IgnoreChange` when nothing a
    /// listener could observe changed. Caller holds the update lock.
    fn resolve(&self, event: &Event) -> Result<Event> {
        let key = event.key.as_str();
        let winner = self.winner_for(key);
        let previous = self.entries.get(key).map(|e| e.value().clone());

        let resolved = match (winner, previous) {
            (None, None) => return Err(StratumError::IgnoreChange(key.to_string())),
            (None, Some(previous)) => {
                self.entries.remove(key);
                Event::new(previous.source, EventKind::Delete, key, previous.value)
            }
            (Some(winner), None) => {
                self.entries.insert(key.to_string(), winner.clone());
                Event::new(winner.source, EventKind::Create, key, winner.value)
            }
            (Some(winner), Some(previous)) => {
                if winner.value == previous.value {
                    if winner.source != previous.source {
                        self.entries.insert(key.to_string(), winner);
                    }
                    return Err(StratumError::IgnoreChange(key.to_string()));
                }
                self.entries.insert(key.to_string(), winner.clone());
                Event::new(winner.source, EventKind::Update, key, winner.value)
            }
        };
        Ok(Event {
            delivered: true,
            ..resolved
        })
    }

    /// Resolve every admitted event under the update lock.
    ///
    /// Returns the visible changes together with the dispatch gate, which the
    /// caller holds while handing them to the dispatcher.
    fn resolve_batch(&self, events: Vec<Event>) -> (Vec<Event>, MutexGuard<'_, ()>) {
        let guard = self.update_lock.lock();
        let mut resolved = Vec::with_capacity(events.len());
        for event in events.iter().filter(|e| Self::admit(e)) {
            match self.resolve(event) {
                Ok(e) => {
                    debug!(
                        key = %e.key,
                        kind = %e.kind,
                        source = %e.source,
                        "config change resolved"
                    );
                    resolved.push(e);
                }
                Err(e) if e.is_ignore() => {
                    debug!(source = %event.source, key = %event.key, "change ignored")
                }
                Err(e) => error!(key = %event.key, error = %e, "event got error"),
            }
        }
        let order = self.dispatch_gate.lock();
        drop(guard);
        (resolved, order)
    }

    fn admit(event: &Event) -> bool {
        if !event.is_valid() {
            warn!(
                source = %event.source,
                key = %event.key,
                "nil or invalid event supplied, dropped"
            );
            return false;
        }
        if event.delivered {
            debug!(key = %event.key, "config update event has been applied already");
            return false;
        }
        true
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Wait until every push queued before this call has been resolved and
    /// handed to the dispatcher.
    pub async fn settle(&self) -> Result<()> {
        self.sink.barrier().await
    }

    /// Stop the intake loop and clean up every source.
    ///
    /// All sources are cleaned up even if one fails; the first failure is returned.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();
        let intake = self.intake.lock().take();
        if let Some(task) = intake {
            if let Err(e) = task.await {
                warn!(error = %e, "intake loop ended abnormally");
            }
        }

        let sources: Vec<Arc<dyn ConfigSource>> = self.sources.read().clone();
        let mut first_err = None;
        for source in sources {
            if let Err(e) = source.cleanup().await {
                error!(source = %source.name(), error = %e, "source cleanup failed");
                first_err.get_or_insert(e);
            }
        }
        info!("configuration manager shut down");
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl EventHandler for Manager {
    fn on_event(&self, event: Event) {
        let (resolved, _order) = self.resolve_batch(vec![event]);
        for event in &resolved {
            self.dispatcher.dispatch_event(event);
        }
    }

    fn on_module_event(&self, events: Vec<Event>) {
        let (resolved, _order) = self.resolve_batch(events);
        if resolved.is_empty() {
            debug!("all events are ignored");
            return;
        }
        if let Err(e) = self.dispatcher.dispatch_module_event(&resolved) {
            warn!(error = %e, "module dispatch failed");
        }
    }

    fn on_changes(&self, events: Vec<Event>) {
        let (resolved, _order) = self.resolve_batch(events);
        if resolved.is_empty() {
            debug!("all events are ignored");
            return;
        }
        for event in &resolved {
            self.dispatcher.dispatch_event(event);
        }
        if let Err(e) = self.dispatcher.dispatch_module_event(&resolved) {
            warn!(error = %e, "module dispatch failed");
        }
    }
}

/// Drain the sink queue into the manager until shutdown.
async fn run_intake(
    manager: Weak<Manager>,
    mut rx: mpsc::Receiver<SinkMessage>,
    shutdown: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let Some(manager) = manager.upgrade() else {
            break;
        };
        match msg {
            SinkMessage::Event(event) => manager.on_event(event),
            SinkMessage::Module(events) => manager.on_module_event(events),
            SinkMessage::Changes(events) => manager.on_changes(events),
            SinkMessage::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("intake loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Read-only source with a fixed snapshot.
    struct Fixed {
        name: String,
        priority: i32,
        data: HashMap<String, Value>,
    }

    impl Fixed {
        fn new(name: &str, priority: i32, pairs: &[(&str, Value)]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                priority,
                data: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl ConfigSource for Fixed {
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn set_priority(&self, _priority: i32) {}
        fn configurations(&self) -> Result<HashMap<String, Value>> {
            Ok(self.data.clone())
        }
        fn configuration_by_key(&self, key: &str) -> Result<Value> {
            self.data
                .get(key)
                .cloned()
                .ok_or_else(|| StratumError::KeyNotExist(key.to_string()))
        }
        async fn watch(&self, _sink: EventSink) -> Result<()> {
            Ok(())
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initial_pull_respects_priority() {
        let manager = Manager::start(16).unwrap();
        manager
            .add_source(Fixed::new("low", 5, &[("k", json!("low")), ("only_low", json!(1))]))
            .unwrap();
        manager
            .add_source(Fixed::new("high", 1, &[("k", json!("high"))]))
            .unwrap();

        assert_eq!(manager.get("k"), Some(json!("high")));
        assert_eq!(manager.source_of("k").as_deref(), Some("high"));
        assert_eq!(manager.source_of("only_low").as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_first_registered() {
        let manager = Manager::start(16).unwrap();
        manager.add_source(Fixed::new("a", 2, &[("k", json!("a"))])).unwrap();
        manager.add_source(Fixed::new("b", 2, &[("k", json!("b"))])).unwrap();
        assert_eq!(manager.get("k"), Some(json!("a")));
    }

    #[tokio::test]
    async fn test_resolve_masks_lower_priority_event() {
        let manager = Manager::start(16).unwrap();
        manager.add_source(Fixed::new("a", 1, &[("k", json!("x"))])).unwrap();
        manager.add_source(Fixed::new("b", 2, &[("k", json!("y"))])).unwrap();

        let _guard = manager.update_lock.lock();
        let err = manager
            .resolve(&Event::update("b", "k", json!("y")))
            .unwrap_err();
        assert!(err.is_ignore());
        assert_eq!(manager.get("k"), Some(json!("x")));
    }

    #[tokio::test]
    async fn test_null_values_count_as_absent() {
        let manager = Manager::start(16).unwrap();
        manager
            .add_source(Fixed::new("a", 1, &[("k", Value::Null), ("j", json!(1))]))
            .unwrap();
        assert!(!manager.exists("k"));
        assert!(manager.exists("j"));
    }

    #[tokio::test]
    async fn test_dropping_manager_stops_intake() {
        let manager = Manager::start(16).unwrap();
        let sink = manager.sink();
        sink.barrier().await.unwrap();

        drop(manager);
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), sink.barrier())
            .await
            .expect("intake loop kept running after drop");
        assert!(matches!(outcome, Err(StratumError::Shutdown)));
    }
}
