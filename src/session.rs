//! Session Registry
//!
//! Owns the mapping from (transport kind, session id) to the live transport
//! adapter. At most one adapter per key; ids are server-generated UUIDs so
//! collisions are a defect, not an expected input.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ServerError;
use crate::transport::{SseSession, StreamableSession};

/// Which wire style a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    StreamableHttp,
    Sse,
}

/// A registered transport adapter.
#[derive(Clone)]
pub enum SessionTransport {
    Streamable(Arc<StreamableSession>),
    Sse(Arc<SseSession>),
}

impl SessionTransport {
    pub fn kind(&self) -> TransportKind {
        match self {
            SessionTransport::Streamable(_) => TransportKind::StreamableHttp,
            SessionTransport::Sse(_) => TransportKind::Sse,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SessionTransport::Streamable(s) => s.session_id(),
            SessionTransport::Sse(s) => s.session_id(),
        }
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        match self {
            SessionTransport::Streamable(s) => s.close().await,
            SessionTransport::Sse(s) => s.close().await,
        }
    }
}

/// Exclusive owner of the session map; all access goes through these
/// operations.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<(TransportKind, String), SessionTransport>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session. Fails if an adapter is already registered under
    /// the same (kind, id) pair.
    pub async fn register(&self, transport: SessionTransport) -> Result<(), ServerError> {
        let key = (transport.kind(), transport.session_id().to_string());
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(ServerError::DuplicateSession(key.1));
        }
        debug!(session_id = %key.1, kind = ?key.0, "Session registered");
        sessions.insert(key, transport);
        Ok(())
    }

    pub async fn lookup_streamable(&self, id: &str) -> Option<Arc<StreamableSession>> {
        match self
            .sessions
            .read()
            .await
            .get(&(TransportKind::StreamableHttp, id.to_string()))
        {
            Some(SessionTransport::Streamable(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub async fn lookup_sse(&self, id: &str) -> Option<Arc<SseSession>> {
        match self
            .sessions
            .read()
            .await
            .get(&(TransportKind::Sse, id.to_string()))
        {
            Some(SessionTransport::Sse(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub async fn remove(&self, kind: TransportKind, id: &str) {
        if self
            .sessions
            .write()
            .await
            .remove(&(kind, id.to_string()))
            .is_some()
        {
            debug!(session_id = %id, kind = ?kind, "Session removed");
        }
    }

    /// Session ids across both transport kinds, for diagnostics.
    pub async fn list_active(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .keys()
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Take every registered session, leaving the map empty. Used on
    /// shutdown to close all adapters.
    pub async fn drain(&self) -> Vec<SessionTransport> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, transport)| transport)
            .collect()
    }
}
