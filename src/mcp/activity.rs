//! Activity log for protocol traffic
//!
//! A bounded ring of recent [`ActivityEntry`] values plus fan-out to live
//! subscribers (the `/mcp/logs/stream` endpoint). Subscriber queues are
//! bounded and lossy: a full queue drops the newest entry for that
//! subscriber only, and a closed queue is removed on the next record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Request,
    Response,
    Connect,
    Disconnect,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Sse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub client: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
    pub data: Value,
}

impl ActivityEntry {
    pub fn new(kind: ActivityKind, client: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            client: client.into(),
            session_id: None,
            transport: None,
            data: Value::Null,
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

struct Listener {
    id: u64,
    tx: mpsc::Sender<ActivityEntry>,
}

pub struct ActivityLog {
    entries: Mutex<VecDeque<ActivityEntry>>,
    listeners: Mutex<Vec<Listener>>,
    capacity: usize,
    listener_capacity: usize,
    next_listener: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ActivityLog {
    pub fn new(capacity: usize, listener_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            listeners: Mutex::new(Vec::new()),
            capacity,
            listener_capacity: listener_capacity.max(1),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, evicting the oldest when full, and fan it out
    pub fn record(&self, entry: ActivityEntry) {
        {
            let mut entries = lock(&self.entries);
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        let mut listeners = lock(&self.listeners);
        listeners.retain(|listener| match listener.tx.try_send(entry.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(listener = listener.id, "Activity listener lagging, entry dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// The most recent `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let entries = lock(&self.entries);
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Register a live subscriber. Dropping the subscription unregisters it.
    pub fn subscribe(self: &Arc<Self>) -> ActivitySubscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.listener_capacity);
        lock(&self.listeners).push(Listener { id, tx });

        ActivitySubscription {
            id,
            rx,
            log: Arc::clone(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        lock(&self.listeners).retain(|listener| listener.id != id);
    }
}

pub struct ActivitySubscription {
    id: u64,
    rx: mpsc::Receiver<ActivityEntry>,
    log: Arc<ActivityLog>,
}

impl ActivitySubscription {
    pub async fn recv(&mut self) -> Option<ActivityEntry> {
        self.rx.recv().await
    }
}

impl Drop for ActivitySubscription {
    fn drop(&mut self) {
        self.log.unsubscribe(self.id);
    }
}
