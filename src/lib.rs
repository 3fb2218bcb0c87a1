//! feedback-mcp: Human-in-the-loop MCP server
//!
//! Lets an automated agent pause mid-task and ask a human for a decision.
//! The agent calls the `interactive_feedback` tool over MCP; the call suspends
//! until an external actor (a UI layer, an operator console) answers, cancels,
//! or the request times out.
//!
//! Architecture:
//! - [`router::FeedbackServer`]: the HTTP entry point; classifies every inbound
//!   request and routes it to the owning session transport.
//! - [`session::SessionRegistry`]: maps (transport kind, session id) to a live
//!   transport adapter. Two kinds exist: streamable HTTP and SSE.
//! - [`feedback::FeedbackBridge`]: correlation table turning a tool invocation
//!   into a pending request settled exactly once by response, cancellation, or
//!   timeout.
//! - [`server::McpServer`]: the protocol core dispatching JSON-RPC methods and
//!   owning the feedback tool.

pub mod config;
pub mod error;
pub mod feedback;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

// Re-export main types
pub use config::ServerConfig;
pub use error::ServerError;
pub use feedback::{FeedbackBridge, FeedbackRequest};
pub use protocol::{JsonRpcError, McpRequest, McpResponse};
pub use router::FeedbackServer;
pub use server::McpServer;
pub use session::{SessionRegistry, TransportKind};
pub use transport::McpHandler;

/// MCP protocol version implemented by this server
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name advertised in the initialize handshake
pub const SERVER_NAME: &str = "AI Feedback Bridge";

/// Server version
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        FeedbackBridge, FeedbackRequest, FeedbackServer, JsonRpcError, McpHandler, McpRequest,
        McpResponse, McpServer, ServerConfig, ServerError, SessionRegistry, TransportKind,
    };
}
