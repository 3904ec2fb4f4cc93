use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::info;

use stratum_core::{ConfigSource, EventSink, Result, StratumError, Value};

pub const ENV_SOURCE_NAME: &str = "EnvironmentSource";
pub const ENV_SOURCE_PRIORITY: i32 = 3;

/// Read-only snapshot of the process environment taken at construction.
///
/// Every variable is exposed under its own name and again with underscores
/// replaced by dots, so `SERVER_PORT` also answers `SERVER.PORT`.
pub struct EnvSource {
    priority: AtomicI32,
    configs: RwLock<HashMap<String, Value>>,
}

impl EnvSource {
    pub fn new() -> Self {
        info!("enable env source");
        Self::from_vars(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }))
    }

    /// Build from an explicit variable list instead of the live environment.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut configs = HashMap::new();
        for (key, value) in vars {
            let dotted = key.replace('_', ".");
            configs.insert(dotted, Value::String(value.clone()));
            configs.insert(key, Value::String(value));
        }
        Self {
            priority: AtomicI32::new(ENV_SOURCE_PRIORITY),
            configs: RwLock::new(configs),
        }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for EnvSource {
    fn name(&self) -> &str {
        ENV_SOURCE_NAME
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

    // The environment is not watched for changes.
    async fn watch(&self, _sink: EventSink) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.configs.write().clear();
        Ok(())
    }
}
