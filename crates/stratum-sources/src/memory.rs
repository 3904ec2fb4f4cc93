use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::sync::watch;
use tracing::info;

use stratum_core::{ConfigSource, Event, EventKind, EventSink, Result, StratumError, Value};

pub const MEMORY_SOURCE_NAME: &str = "MemorySource";
pub const MEMORY_SOURCE_PRIORITY: i32 = 1;

/// Writable in-memory source, typically the target of runtime overrides.
///
/// `set` and `delete` wait until the engine has attached its sink through
/// `watch`, so no write can slip in between the initial pull and the first push.
pub struct MemorySource {
    name: String,
    priority: AtomicI32,
    configs: RwLock<HashMap<String, Value>>,
    sink: watch::Sender<Option<EventSink>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::with_name(MEMORY_SOURCE_NAME, MEMORY_SOURCE_PRIORITY)
    }

    pub fn with_name(name: impl Into<String>, priority: i32) -> Self {
        let (sink, _) = watch::channel(None);
        Self {
            name: name.into(),
            priority: AtomicI32::new(priority),
            configs: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Seed values before registration. Seeded values emit no events.
    pub fn with_config(self, config: HashMap<String, Value>) -> Self {
        self.configs.write().extend(config);
        self
    }

    async fn attached(&self) -> Result<EventSink> {
        let mut rx = self.sink.subscribe();
        let sink = rx
            .wait_for(|sink| sink.is_some())
            .await
            .map_err(|_| StratumError::Shutdown)?;
        sink.as_ref().cloned().ok_or(StratumError::Shutdown)
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    fn configurations(&self) -> Result<HashMap<String, Value>> {
        Ok(self.configs.read().clone())
    }

    fn configuration_by_key(&self, key: &str) -> Result<Value> {
        self.configs
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StratumError::KeyNotExist(key.to_string()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let sink = self.attached().await?;
        let kind = match self.configs.write().insert(key.to_string(), value.clone()) {
            Some(_) => EventKind::Update,
            None => EventKind::Create,
        };
        let event = Event::new(self.name.as_str(), kind, key, value);
        sink.send_changes(vec![event]).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let sink = self.attached().await?;
        let removed = self.configs.write().remove(key);
        match removed {
            Some(value) => {
                let event = Event::delete(self.name.as_str(), key, value);
                sink.send_changes(vec![event]).await
            }
            None => Ok(()),
        }
    }

    async fn watch(&self, sink: EventSink) -> Result<()> {
        self.sink.send_replace(Some(sink));
        info!(source = %self.name, "mem source callback prepared");
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.configs.write().clear();
        Ok(())
    }
}
