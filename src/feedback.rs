//! Feedback Bridge
//!
//! Correlation table turning an in-flight tool invocation into a pending
//! request that is settled exactly once: by a human response, an explicit
//! cancellation, or the timeout. Settlement exclusivity is enforced by the
//! map itself: whichever caller removes the entry is the one whose settlement
//! takes effect, every other caller observes "already removed" and no-ops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServerError;

/// A feedback request published to the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRequest {
    pub id: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// The deferred result of one pending request.
pub type FeedbackReceiver = oneshot::Receiver<Result<Value, ServerError>>;

/// One suspended tool call waiting for a human answer.
struct PendingEntry {
    resolver: oneshot::Sender<Result<Value, ServerError>>,
    timer: JoinHandle<()>,
}

/// Owns the pending-request map. All mutation goes through the operations
/// below; the map is never handed out by reference.
pub struct FeedbackBridge {
    pending: Mutex<HashMap<String, PendingEntry>>,
    events: broadcast::Sender<FeedbackRequest>,
    timeout: Duration,
}

impl FeedbackBridge {
    pub fn new(timeout: Duration, event_channel_capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(event_channel_capacity);
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            events,
            timeout,
        })
    }

    /// Subscribe to feedback request announcements.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedbackRequest> {
        self.events.subscribe()
    }

    /// Open a new pending request and announce it. Returns the request id and
    /// the deferred result the tool handler suspends on.
    pub async fn open(self: &Arc<Self>, summary: impl Into<String>) -> (String, FeedbackReceiver) {
        let id = Uuid::new_v4().to_string();
        let summary = summary.into();
        let (resolver, receiver) = oneshot::channel();

        let request = FeedbackRequest {
            id: id.clone(),
            summary,
            timestamp: Utc::now(),
        };

        // The timer is spawned while the map lock is held: expire() has to
        // take the same lock, so it cannot run before the entry is inserted
        // even with a zero timeout on the multi-threaded runtime.
        {
            let mut pending = self.pending.lock().await;
            let timer = {
                let bridge = Arc::downgrade(self);
                let id = id.clone();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(bridge) = bridge.upgrade() {
                        bridge.expire(&id).await;
                    }
                })
            };
            pending.insert(id.clone(), PendingEntry { resolver, timer });
        }

        info!(request_id = %id, "Feedback requested");
        // No subscriber yet is fine; the request still times out normally.
        let _ = self.events.send(request);

        (id, receiver)
    }

    /// Settle a pending request with a human answer. Returns false if the id
    /// is unknown or already settled.
    pub async fn respond(&self, request_id: &str, content: Value) -> bool {
        let Some(entry) = self.pending.lock().await.remove(request_id) else {
            debug!(request_id = %request_id, "Response for unknown or settled request");
            return false;
        };
        entry.timer.abort();
        info!(request_id = %request_id, "Feedback response delivered");
        let _ = entry.resolver.send(Ok(content));
        true
    }

    /// Reject a pending request with an explicit cancellation. Returns false
    /// if the id is unknown or already settled.
    pub async fn cancel(&self, request_id: &str, reason: &str) -> bool {
        let Some(entry) = self.pending.lock().await.remove(request_id) else {
            debug!(request_id = %request_id, "Cancellation for unknown or settled request");
            return false;
        };
        entry.timer.abort();
        info!(request_id = %request_id, reason = %reason, "Feedback request cancelled");
        let _ = entry
            .resolver
            .send(Err(ServerError::Cancelled(reason.to_string())));
        true
    }

    /// Timeout path, driven by the per-entry timer task. Loses the race
    /// silently if respond/cancel removed the entry first.
    async fn expire(&self, request_id: &str) {
        let Some(entry) = self.pending.lock().await.remove(request_id) else {
            return;
        };
        warn!(request_id = %request_id, "Feedback request timed out");
        let _ = entry.resolver.send(Err(ServerError::Timeout));
    }

    /// Reject every still-pending request. Called on shutdown so no deferred
    /// result is left unsettled.
    pub async fn drain_all(&self, reason: &str) {
        let drained: Vec<(String, PendingEntry)> =
            self.pending.lock().await.drain().collect();
        for (id, entry) in drained {
            entry.timer.abort();
            debug!(request_id = %id, "Draining pending feedback request");
            let _ = entry
                .resolver
                .send(Err(ServerError::Cancelled(reason.to_string())));
        }
    }

    /// Number of requests still awaiting settlement.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
