//! SSE session transport.
//!
//! One instance per client session. The GET stream opens with an `endpoint`
//! event telling the client where to POST, correlated back to this session by
//! the `sessionId` query parameter. Responses to posted messages are pushed
//! over the stream; a reconnecting client resubscribes to the same adapter.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{anyhow, Result};
use axum::response::sse::Event;
use futures::future::BoxFuture;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{McpHandler, SessionHook};
use crate::{McpRequest, McpResponse};

/// POST endpoint advertised in the stream-opening `endpoint` event.
pub const MESSAGE_ENDPOINT: &str = "/message";

pub struct SseSession {
    session_id: String,
    handler: Arc<dyn McpHandler>,
    event_tx: Mutex<Option<broadcast::Sender<String>>>,
    /// Live GET streams for this session; the session closes itself when the
    /// last one drops.
    live_streams: AtomicUsize,
    on_close: Mutex<Option<SessionHook>>,
}

impl SseSession {
    pub fn new(handler: Arc<dyn McpHandler>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            session_id: Uuid::new_v4().to_string(),
            handler,
            event_tx: Mutex::new(Some(event_tx)),
            live_streams: AtomicUsize::new(0),
            on_close: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fired once, when the session closes.
    pub async fn set_on_close<F>(&self, hook: F)
    where
        F: FnOnce(String) -> BoxFuture<'static, ()> + Send + 'static,
    {
        *self.on_close.lock().await = Some(Box::new(hook));
    }

    fn endpoint_data(&self) -> String {
        format!("{}?sessionId={}", MESSAGE_ENDPOINT, self.session_id)
    }

    /// Open (or reopen) the event stream for this session. Returns None once
    /// the session is closed.
    pub async fn stream(
        self: &Arc<Self>,
    ) -> Option<impl Stream<Item = Result<Event, Infallible>>> {
        let rx = self.event_tx.lock().await.as_ref()?.subscribe();
        self.live_streams.fetch_add(1, Ordering::SeqCst);
        debug!(session_id = %self.session_id, "SSE stream opened");

        let bootstrap = Event::default().event("endpoint").data(self.endpoint_data());
        let messages = BroadcastStream::new(rx).filter_map(|result| async move {
            match result {
                Ok(data) => Some(Ok(Event::default().event("message").data(data))),
                // Skip lagged messages
                Err(_) => None,
            }
        });

        let guard = StreamGuard {
            session: Arc::downgrade(self),
        };
        Some(
            stream::iter([Ok::<_, Infallible>(bootstrap)])
                .chain(messages)
                .map(move |event| {
                    let _keep_alive = &guard;
                    event
                }),
        )
    }

    /// Handle a message posted to `/message`. The response is pushed over the
    /// event stream and also echoed back to the POST for non-streaming
    /// clients.
    pub async fn handle_message(&self, request: McpRequest) -> McpResponse {
        let response = self.handler.handle_request(request).await;
        if let Some(tx) = self.event_tx.lock().await.as_ref() {
            match serde_json::to_string(&response) {
                // No live stream is fine; the POST body still carries the response.
                Ok(payload) => {
                    let _ = tx.send(payload);
                }
                Err(e) => warn!(session_id = %self.session_id, error = %e, "Failed to encode SSE payload"),
            }
        }
        response
    }

    /// Terminate every live stream and fire the close hook. Errors if the
    /// session was already closed.
    pub async fn close(&self) -> Result<()> {
        let tx = self.event_tx.lock().await.take();
        if tx.is_none() {
            return Err(anyhow!("session {} already closed", self.session_id));
        }
        debug!(session_id = %self.session_id, "Closing SSE session");
        let hook = self.on_close.lock().await.take();
        if let Some(hook) = hook {
            hook(self.session_id.clone()).await;
        }
        Ok(())
    }
}

/// Detects client disconnects: dropped by axum together with the response
/// stream. Closing on the last drop mirrors the transport-reported closure
/// the registry expects.
struct StreamGuard {
    session: Weak<SseSession>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        if session.live_streams.fetch_sub(1, Ordering::SeqCst) == 1 {
            tokio::spawn(async move {
                if session.close().await.is_err() {
                    // Already closed through DELETE or shutdown
                    debug!(session_id = %session.session_id, "SSE session already closed");
                }
            });
        }
    }
}
