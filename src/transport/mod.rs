//! Transport Adapters
//!
//! Per-session adapters for the two supported connection styles:
//! - Streamable HTTP: request/response plus an optional server-push event
//!   stream, all on the default path, correlated by the `mcp-session-id`
//!   header.
//! - SSE: a dedicated GET event stream plus a separate POST endpoint,
//!   correlated by a `sessionId` query parameter.

mod sse;
mod streamable;

pub use sse::SseSession;
pub use streamable::{SessionHook, StreamableSession};

use crate::{McpRequest, McpResponse};

/// Protocol core seam used by both adapters.
#[async_trait::async_trait]
pub trait McpHandler: Send + Sync {
    async fn handle_request(&self, request: McpRequest) -> McpResponse;
}

#[async_trait::async_trait]
impl McpHandler for crate::McpServer {
    async fn handle_request(&self, request: McpRequest) -> McpResponse {
        self.handle_request(request).await
    }
}
