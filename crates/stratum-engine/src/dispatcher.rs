//! Fan-out of confirmed changes to listeners.
//!
//! Every registration gets its own delivery worker: an unbounded queue drained by
//! a Tokio task. Dispatching only enqueues, so the caller never waits on a
//! listener, deliveries to one registration keep the order they were dispatched
//! in, and a slow or panicking listener only affects its own queue.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use stratum_core::{Event, Result, StratumError};

use crate::trie::PrefixIndex;

/// Receives single-key change events.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn event(&self, event: Event);
}

/// Receives batches of events grouped under one module prefix.
#[async_trait]
pub trait ModuleListener: Send + Sync {
    async fn events(&self, events: Vec<Event>);
}

/// Adapter turning a closure into a [`Listener`].
pub struct FnListener<F>(F);

#[async_trait]
impl<F> Listener for FnListener<F>
where
    F: Fn(Event) + Send + Sync,
{
    async fn event(&self, event: Event) {
        (self.0)(event)
    }
}

/// Adapter turning a closure into a [`ModuleListener`].
pub struct FnModuleListener<F>(F);

#[async_trait]
impl<F> ModuleListener for FnModuleListener<F>
where
    F: Fn(Vec<Event>) + Send + Sync,
{
    async fn events(&self, events: Vec<Event>) {
        (self.0)(events)
    }
}

pub fn listener_fn<F>(f: F) -> Arc<dyn Listener>
where
    F: Fn(Event) + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

pub fn module_listener_fn<F>(f: F) -> Arc<dyn ModuleListener>
where
    F: Fn(Vec<Event>) + Send + Sync + 'static,
{
    Arc::new(FnModuleListener(f))
}

/// Identity of a listener, independent of the vtable half of the fat pointer.
fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

struct KeyRegistration {
    pattern: String,
    regex: Regex,
    listener: Arc<dyn Listener>,
    queue: mpsc::UnboundedSender<Event>,
}

struct ModuleRegistration {
    listener: Arc<dyn ModuleListener>,
    queue: mpsc::UnboundedSender<Vec<Event>>,
}

#[derive(Default)]
struct ModuleTable {
    listeners: HashMap<String, Vec<ModuleRegistration>>,
    index: PrefixIndex,
}

/// Holds listener registrations and delivers events to them.
pub struct Dispatcher {
    handle: Handle,
    listeners: RwLock<Vec<KeyRegistration>>,
    modules: RwLock<ModuleTable>,
}

impl Dispatcher {
    /// Delivery workers are spawned on `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            listeners: RwLock::new(Vec::new()),
            modules: RwLock::new(ModuleTable::default()),
        }
    }

    /// Build a dispatcher on the current Tokio runtime.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| StratumError::Config(format!("a Tokio runtime is required: {e}")))?;
        Ok(Self::new(handle))
    }

    /// Register `listener` for every key matching any of `patterns`.
    ///
    /// All patterns are compiled first; one invalid pattern fails the whole call
    /// and registers nothing. Registering the same pair twice is a no-op.
    pub fn register_listener(&self, listener: Arc<dyn Listener>, patterns: &[&str]) -> Result<()> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                error!(pattern, error = %e, "invalid key pattern, registration ignored");
                StratumError::InvalidPattern {
                    key: pattern.to_string(),
                    reason: e.to_string(),
                }
            })?;
            compiled.push((pattern.to_string(), regex));
        }

        let mut listeners = self.listeners.write();
        for (pattern, regex) in compiled {
            let duplicate = listeners
                .iter()
                .any(|r| r.pattern == pattern && same_listener(&r.listener, &listener));
            if duplicate {
                continue;
            }
            let queue = self.spawn_key_worker(pattern.clone(), Arc::clone(&listener));
            listeners.push(KeyRegistration {
                pattern,
                regex,
                listener: Arc::clone(&listener),
                queue,
            });
        }
        Ok(())
    }

    /// Drop the `(pattern, listener)` pairs; unknown pairs are ignored.
    pub fn unregister_listener(
        &self,
        listener: &Arc<dyn Listener>,
        patterns: &[&str],
    ) -> Result<()> {
        for pattern in patterns {
            Regex::new(pattern).map_err(|e| StratumError::InvalidPattern {
                key: pattern.to_string(),
                reason: e.to_string(),
            })?;
        }
        self.listeners.write().retain(|r| {
            !(patterns.contains(&r.pattern.as_str()) && same_listener(&r.listener, listener))
        });
        Ok(())
    }

    /// Queue `event` for every registration whose pattern matches its key.
    ///
    /// A listener registered under two matching patterns is called twice.
    pub fn dispatch_event(&self, event: &Event) {
        let listeners = self.listeners.read();
        for reg in listeners.iter().filter(|r| r.regex.is_match(&event.key)) {
            debug!(pattern = %reg.pattern, key = %event.key, kind = %event.kind, "event generated");
            if reg.queue.send(event.clone()).is_err() {
                warn!(pattern = %reg.pattern, "listener worker gone, event dropped");
            }
        }
    }

    /// Register `listener` for batches of events under any of `prefixes`.
    pub fn register_module_listener(
        &self,
        listener: Arc<dyn ModuleListener>,
        prefixes: &[&str],
    ) -> Result<()> {
        if let Some(bad) = prefixes.iter().find(|p| p.is_empty()) {
            error!("empty module prefix, registration ignored");
            return Err(StratumError::InvalidKey(bad.to_string()));
        }

        let mut guard = self.modules.write();
        let table = &mut *guard;
        for prefix in prefixes {
            if !table.listeners.contains_key(*prefix) {
                table.index.add_prefix(prefix);
            }
            let registrations = table.listeners.entry(prefix.to_string()).or_default();
            if registrations
                .iter()
                .any(|r| same_listener(&r.listener, &listener))
            {
                continue;
            }
            let queue = self.spawn_module_worker(prefix.to_string(), Arc::clone(&listener));
            registrations.push(ModuleRegistration {
                listener: Arc::clone(&listener),
                queue,
            });
            info!(prefix, "module listener registered");
        }
        Ok(())
    }

    /// Remove `listener` from `prefixes`; a prefix with no listeners left leaves the index.
    pub fn unregister_module_listener(
        &self,
        listener: &Arc<dyn ModuleListener>,
        prefixes: &[&str],
    ) -> Result<()> {
        if let Some(bad) = prefixes.iter().find(|p| p.is_empty()) {
            return Err(StratumError::InvalidKey(bad.to_string()));
        }

        let mut guard = self.modules.write();
        let table = &mut *guard;
        for prefix in prefixes {
            let Some(registrations) = table.listeners.get_mut(*prefix) else {
                continue;
            };
            registrations.retain(|r| !same_listener(&r.listener, listener));
            if registrations.is_empty() {
                table.listeners.remove(*prefix);
                table.index.remove_prefix(prefix);
            }
        }
        Ok(())
    }

    /// Group `events` by the registered prefix each key falls under and hand
    /// every module listener its whole group in one call.
    ///
    /// Events under no registered prefix are skipped; order within a group
    /// follows the input.
    pub fn dispatch_module_event(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Err(StratumError::InvalidEvent("empty events provided".into()));
        }

        let table = self.modules.read();
        let mut groups: Vec<(&str, Vec<Event>)> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        for event in events {
            let Some(prefix) = table.index.find_prefix(&event.key) else {
                continue;
            };
            let slot = *slots.entry(prefix).or_insert_with(|| {
                groups.push((prefix, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(event.clone());
        }

        for (prefix, group) in groups {
            let Some(registrations) = table.listeners.get(prefix) else {
                continue;
            };
            for reg in registrations {
                debug!(prefix, count = group.len(), "module events generated");
                if reg.queue.send(group.clone()).is_err() {
                    warn!(prefix, "module listener worker gone, events dropped");
                }
            }
        }
        Ok(())
    }

    /// Number of `(pattern, listener)` registrations.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Prefixes that currently have at least one module listener.
    pub fn module_prefixes(&self) -> Vec<String> {
        self.modules.read().index.prefixes()
    }

    fn spawn_key_worker(
        &self,
        pattern: String,
        listener: Arc<dyn Listener>,
    ) -> mpsc::UnboundedSender<Event> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        self.handle.spawn(async move {
            while let Some(event) = rx.recv().await {
                let key = event.key.clone();
                if AssertUnwindSafe(listener.event(event))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!(pattern = %pattern, key = %key, "listener panicked");
                }
            }
        });
        tx
    }

    fn spawn_module_worker(
        &self,
        prefix: String,
        listener: Arc<dyn ModuleListener>,
    ) -> mpsc::UnboundedSender<Vec<Event>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Event>>();
        self.handle.spawn(async move {
            while let Some(events) = rx.recv().await {
                if AssertUnwindSafe(listener.events(events))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!(prefix = %prefix, "module listener panicked");
                }
            }
        });
        tx
    }
}
