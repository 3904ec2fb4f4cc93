use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, StratumError};
use crate::event::Event;
use crate::value::Value;

/// A named, prioritized provider of configuration key/values.
///
/// Lower `priority()` numbers win when several sources assert the same key.
/// `configurations` and `configuration_by_key` are called while the engine holds
/// its update lock, so implementations must answer from memory without I/O.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Unique, non-empty name.
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn set_priority(&self, priority: i32);

    /// Full current snapshot.
    fn configurations(&self) -> Result<HashMap<String, Value>>;

    /// Current value for one key, or [`StratumError::KeyNotExist`].
    fn configuration_by_key(&self, key: &str) -> Result<Value>;

    /// Store a value. Read-only sources keep the default no-op.
    async fn set(&self, _key: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    /// Remove a value. Read-only sources keep the default no-op.
    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    /// Re-read whatever backs the source so the next snapshot is current.
    ///
    /// Called by the engine outside its update lock, so I/O is fine here.
    /// Sources that always answer from live state keep the default no-op.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Attach the engine's sink and push changes into it from now on.
    ///
    /// Runs on its own task; it may return right away after wiring up a
    /// callback, or loop for as long as the source lives.
    async fn watch(&self, sink: EventSink) -> Result<()>;

    /// Release watchers, sockets and cached data.
    async fn cleanup(&self) -> Result<()>;
}

/// Receiver of resolved source pushes. Implemented by the engine.
pub trait EventHandler: Send + Sync {
    /// Resolve one change and notify key listeners.
    fn on_event(&self, event: Event);

    /// Resolve a batch and notify module listeners.
    fn on_module_event(&self, events: Vec<Event>);

    /// Resolve a batch once and notify both listener kinds: key listeners per
    /// event, module listeners with the batch.
    fn on_changes(&self, events: Vec<Event>);
}

/// Messages carried from sources to the engine's intake loop.
#[derive(Debug)]
pub enum SinkMessage {
    Event(Event),
    Module(Vec<Event>),
    /// Reaches key and module listeners alike.
    Changes(Vec<Event>),
    /// Answered once every message queued before it has been handled.
    Barrier(oneshot::Sender<()>),
}

/// Bounded handle through which sources push events into the engine.
///
/// Cloning is cheap; every clone feeds the same queue, so messages sent from one
/// task are handled in the order they were sent.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl EventSink {
    /// Create a sink and the receiving half the consumer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn send_event(&self, event: Event) -> Result<()> {
        self.send(SinkMessage::Event(event)).await
    }

    pub async fn send_module_events(&self, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.send(SinkMessage::Module(events)).await
    }

    /// Push changes meant for key and module listeners alike.
    pub async fn send_changes(&self, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.send(SinkMessage::Changes(events)).await
    }

    /// For callers outside the async runtime, such as file watcher threads.
    /// Panics if called from within an async context.
    pub fn blocking_send_event(&self, event: Event) -> Result<()> {
        self.tx
            .blocking_send(SinkMessage::Event(event))
            .map_err(|_| StratumError::Shutdown)
    }

    /// Blocking variant of [`EventSink::send_module_events`].
    pub fn blocking_send_module_events(&self, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.tx
            .blocking_send(SinkMessage::Module(events))
            .map_err(|_| StratumError::Shutdown)
    }

    /// Blocking variant of [`EventSink::send_changes`].
    pub fn blocking_send_changes(&self, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.tx
            .blocking_send(SinkMessage::Changes(events))
            .map_err(|_| StratumError::Shutdown)
    }

    /// Wait until everything queued before this call has been handled.
    pub async fn barrier(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(SinkMessage::Barrier(done_tx)).await?;
        done_rx.await.map_err(|_| StratumError::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, msg: SinkMessage) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| StratumError::Shutdown)
    }
}
