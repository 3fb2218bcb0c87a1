//! Streamable HTTP session transport.
//!
//! One instance per client session. The adapter only becomes a registered
//! session once the initialize handshake succeeds: the router installs an
//! `on_initialized` hook and the adapter fires it from inside the handshake,
//! so the id used for registration is exactly the id reported to the client.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::response::sse::Event;
use futures::future::BoxFuture;
use futures::stream::{Stream, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;

use super::McpHandler;
use crate::{McpRequest, McpResponse};

/// Lifecycle hook installed by the router; receives the session id.
pub type SessionHook = Box<dyn FnOnce(String) -> BoxFuture<'static, ()> + Send>;

pub struct StreamableSession {
    session_id: String,
    handler: Arc<dyn McpHandler>,
    initialized: AtomicBool,
    /// Server-push channel backing the GET event stream. Taking it out is
    /// what closes the session: every live stream then terminates.
    event_tx: Mutex<Option<broadcast::Sender<String>>>,
    on_initialized: Mutex<Option<SessionHook>>,
    on_close: Mutex<Option<SessionHook>>,
}

impl StreamableSession {
    pub fn new(handler: Arc<dyn McpHandler>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            session_id: Uuid::new_v4().to_string(),
            handler,
            initialized: AtomicBool::new(false),
            event_tx: Mutex::new(Some(event_tx)),
            on_initialized: Mutex::new(None),
            on_close: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Fired once, from inside the initialize handshake.
    pub async fn set_on_initialized<F>(&self, hook: F)
    where
        F: FnOnce(String) -> BoxFuture<'static, ()> + Send + 'static,
    {
        *self.on_initialized.lock().await = Some(Box::new(hook));
    }

    /// Fired once, when the session closes.
    pub async fn set_on_close<F>(&self, hook: F)
    where
        F: FnOnce(String) -> BoxFuture<'static, ()> + Send + 'static,
    {
        *self.on_close.lock().await = Some(Box::new(hook));
    }

    /// Forward a decoded envelope to the protocol core. A successful
    /// initialize flips the session live and fires the registration hook
    /// before the response is returned, so the client can use the session id
    /// on its very next request.
    pub async fn handle_request(&self, request: McpRequest) -> McpResponse {
        let is_initialize = request.is_initialize();
        let response = self.handler.handle_request(request).await;

        if is_initialize {
            if response.is_success() {
                self.initialized.store(true, Ordering::SeqCst);
                let hook = self.on_initialized.lock().await.take();
                if let Some(hook) = hook {
                    hook(self.session_id.clone()).await;
                }
            } else {
                // Failed handshake: the session will never register, drop the
                // hooks so they do not keep the adapter alive.
                self.on_initialized.lock().await.take();
                self.on_close.lock().await.take();
            }
        }

        response
    }

    /// Open the long-lived server-push stream for GET requests. Returns None
    /// once the session is closed.
    pub async fn open_event_stream(
        &self,
    ) -> Option<impl Stream<Item = Result<Event, Infallible>>> {
        let rx = self.event_tx.lock().await.as_ref()?.subscribe();
        debug!(session_id = %self.session_id, "Opening event stream");
        Some(BroadcastStream::new(rx).filter_map(|result| async move {
            match result {
                Ok(data) => Some(Ok::<_, Infallible>(
                    Event::default().event("message").data(data),
                )),
                // Skip lagged messages
                Err(_) => None,
            }
        }))
    }

    /// Protocol-level teardown. Terminates every live event stream and fires
    /// the close hook. Errors if the session was already closed.
    pub async fn close(&self) -> Result<()> {
        let tx = self.event_tx.lock().await.take();
        if tx.is_none() {
            return Err(anyhow!("session {} already closed", self.session_id));
        }
        debug!(session_id = %self.session_id, "Closing streamable session");
        let hook = self.on_close.lock().await.take();
        if let Some(hook) = hook {
            hook(self.session_id.clone()).await;
        }
        Ok(())
    }
}
