//! SSE session registry
//!
//! Each SSE connection owns one session: a server-generated id mapped to the
//! sending half of a bounded queue. The stream holds a [`SessionGuard`];
//! dropping it (client disconnect, server shutdown, stream end) removes the
//! session immediately, so later POSTs for that id are rejected.

use crate::mcp::activity::{ActivityEntry, ActivityKind, ActivityLog, Transport};
use crate::mcp::protocol::JsonRpcResponse;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("Session '{0}' closed before delivery")]
    Closed(String),

    #[error("Delivery to session '{id}' timed out after {secs}s")]
    DeliveryTimeout { id: String, secs: u64 },
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, mpsc::Sender<JsonRpcResponse>>>,
    queue_capacity: usize,
    send_timeout: Duration,
    activity: Arc<ActivityLog>,
}

impl SessionManager {
    pub fn new(queue_capacity: usize, send_timeout: Duration, activity: Arc<ActivityLog>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            send_timeout,
            activity,
        }
    }

    /// Allocate a session for a new SSE connection
    pub fn open(
        self: &Arc<Self>,
        client: impl Into<String>,
    ) -> (SessionGuard, mpsc::Receiver<JsonRpcResponse>) {
        let id = Uuid::new_v4().to_string();
        let client = client.into();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);

        tracing::info!(session_id = %id, client = %client, "SSE session opened");
        self.activity.record(
            ActivityEntry::new(ActivityKind::Connect, client.clone())
                .session(id.clone())
                .transport(Transport::Sse),
        );

        let guard = SessionGuard {
            id,
            client,
            manager: Arc::clone(self),
        };
        (guard, rx)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Queue a response for the session's SSE stream
    ///
    /// Waits for queue capacity up to the configured send timeout. Any number
    /// of producers may deliver to one session at once; each response is
    /// queued exactly once and the stream reads them in acceptance order.
    ///
    /// # Arguments
    ///
    /// * `id` - Session id from the advertised endpoint URL
    /// * `response` - Envelope to push as a `message` event
    ///
    /// # Returns
    ///
    /// `Ok(())` once the response sits in the session queue
    ///
    /// # Errors
    ///
    /// * `SessionError::NotFound` - No session is registered under `id`
    /// * `SessionError::DeliveryTimeout` - The queue stayed full for the whole send timeout
    /// * `SessionError::Closed` - The stream was dropped before the response was queued
    pub async fn deliver(&self, id: &str, response: JsonRpcResponse) -> Result<(), SessionError> {
        let sender = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        sender
            .send_timeout(response, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SessionError::DeliveryTimeout {
                    id: id.to_string(),
                    secs: self.send_timeout.as_secs(),
                },
                SendTimeoutError::Closed(_) => SessionError::Closed(id.to_string()),
            })
    }

    fn close(&self, id: &str, client: &str) {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();

        if removed {
            tracing::info!(session_id = %id, client = %client, "SSE session closed");
            self.activity.record(
                ActivityEntry::new(ActivityKind::Disconnect, client)
                    .session(id)
                    .transport(Transport::Sse)
                    .data(json!({ "active_sessions": self.count() })),
            );
        }
    }
}

/// Keeps a session registered for as long as it lives
pub struct SessionGuard {
    id: String,
    client: String,
    manager: Arc<SessionManager>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.manager.close(&self.id, &self.client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(queue_capacity: usize, send_timeout: Duration) -> (Arc<SessionManager>, Arc<ActivityLog>) {
        let activity = Arc::new(ActivityLog::new(100, 10));
        let manager = Arc::new(SessionManager::new(
            queue_capacity,
            send_timeout,
            Arc::clone(&activity),
        ));
        (manager, activity)
    }

    fn response(id: i64) -> JsonRpcResponse {
        JsonRpcResponse::success(json!(id), json!({}))
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let (manager, _) = manager(8, Duration::from_secs(1));
        let (guard, mut rx) = manager.open("127.0.0.1");

        manager.deliver(guard.id(), response(1)).await.unwrap();
        manager.deliver(guard.id(), response(2)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().id, json!(1));
        assert_eq!(rx.recv().await.unwrap().id, json!(2));
    }

    #[tokio::test]
    async fn concurrent_producers_each_deliver_exactly_once() {
        const PRODUCERS: i64 = 32;
        let (manager, _) = manager(2, Duration::from_secs(5));
        let (guard, mut rx) = manager.open("127.0.0.1");

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < PRODUCERS as usize {
                let Some(response) = rx.recv().await else { break };
                seen.push(response.id.as_i64().unwrap());
            }
            seen
        });

        let results = futures::future::join_all(
            (0..PRODUCERS).map(|id| manager.deliver(guard.id(), response(id))),
        )
        .await;
        assert!(results.iter().all(Result::is_ok), "{results:?}");

        let mut seen = consumer.await.unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..PRODUCERS).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dropping_guard_removes_session_and_logs_disconnect() {
        let (manager, activity) = manager(8, Duration::from_secs(1));
        let (guard, _rx) = manager.open("10.1.1.1");
        let id = guard.id().to_string();
        assert!(manager.contains(&id));
        assert_eq!(manager.ids(), vec![id.clone()]);

        drop(guard);

        assert!(!manager.contains(&id));
        assert_eq!(manager.count(), 0);
        assert_eq!(
            manager.deliver(&id, response(1)).await,
            Err(SessionError::NotFound(id.clone()))
        );

        let kinds: Vec<_> = activity.recent(10).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ActivityKind::Connect, ActivityKind::Disconnect]);
    }

    #[tokio::test]
    async fn full_queue_times_out() {
        let (manager, _) = manager(1, Duration::from_millis(20));
        let (guard, _rx) = manager.open("127.0.0.1");

        manager.deliver(guard.id(), response(1)).await.unwrap();
        let err = manager.deliver(guard.id(), response(2)).await.unwrap_err();
        assert!(matches!(err, SessionError::DeliveryTimeout { .. }));
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (manager, _) = manager(4, Duration::from_secs(1));
        let (guard, rx) = manager.open("127.0.0.1");
        drop(rx);

        let err = manager.deliver(guard.id(), response(1)).await.unwrap_err();
        assert_eq!(err, SessionError::Closed(guard.id().to_string()));
    }

    #[test]
    fn session_ids_are_unique() {
        let (manager, _) = manager(4, Duration::from_secs(1));
        let (a, _rx_a) = manager.open("a");
        let (b, _rx_b) = manager.open("b");
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.count(), 2);
    }
}
