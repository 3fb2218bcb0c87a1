//! Protocol core and tool invocation handler.
//!
//! Dispatches JSON-RPC methods and owns the single registered tool,
//! `interactive_feedback`: calling it opens a pending request in the
//! feedback bridge and suspends until the bridge settles it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::feedback::FeedbackBridge;
use crate::protocol::{JsonRpcError, McpRequest, McpResponse};
use crate::{PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION};

/// Name of the single tool this server registers.
pub const FEEDBACK_TOOL: &str = "interactive_feedback";

/// Tool metadata exposed through tools/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Shared protocol core. Session transports forward decoded envelopes here;
/// one instance serves every session.
pub struct McpServer {
    config: ServerConfig,
    bridge: Arc<FeedbackBridge>,
}

impl McpServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let bridge = FeedbackBridge::new(config.feedback_timeout, config.event_channel_capacity);
        Arc::new(Self { config, bridge })
    }

    /// The feedback bridge this server publishes tool calls to.
    pub fn bridge(&self) -> &Arc<FeedbackBridge> {
        &self.bridge
    }

    pub async fn handle_request(&self, request: McpRequest) -> McpResponse {
        debug!(method = %request.method, "Handling MCP request");

        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "notifications/initialized" | "initialized" => {
                McpResponse::success(request.id, json!({}))
            }
            "ping" => McpResponse::success(request.id, json!({})),
            "tools/list" => self.handle_tools_list(request),
            "tools/call" => self.handle_tools_call(request).await,
            _ => McpResponse::error(
                request.id,
                JsonRpcError::method_not_found(&request.method),
            ),
        }
    }

    fn handle_initialize(&self, request: McpRequest) -> McpResponse {
        let client_name = request
            .params
            .as_ref()
            .and_then(|p| p.get("clientInfo"))
            .and_then(|ci| ci.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown");

        let client_version = request
            .params
            .as_ref()
            .and_then(|p| p.get("clientInfo"))
            .and_then(|ci| ci.get("version"))
            .and_then(|v| v.as_str());

        info!(
            client = %client_name,
            version = %client_version.unwrap_or("?"),
            "Client connected"
        );

        let server_name = self.config.name.as_deref().unwrap_or(SERVER_NAME);

        McpResponse::success(
            request.id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": false },
                    "logging": {}
                },
                "serverInfo": {
                    "name": server_name,
                    "version": SERVER_VERSION
                }
            }),
        )
    }

    fn feedback_tool_info() -> ToolInfo {
        ToolInfo {
            name: FEEDBACK_TOOL.to_string(),
            description: "Request interactive user feedback during development workflow"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "Summarize your answer"
                    }
                },
                "required": ["summary"]
            }),
        }
    }

    fn handle_tools_list(&self, request: McpRequest) -> McpResponse {
        McpResponse::success(
            request.id,
            json!({ "tools": [Self::feedback_tool_info()] }),
        )
    }

    async fn handle_tools_call(&self, request: McpRequest) -> McpResponse {
        let params = match &request.params {
            Some(p) => p,
            None => {
                return McpResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("Missing params"),
                )
            }
        };

        let tool_name = match params.get("name").and_then(|n| n.as_str()) {
            Some(n) => n,
            None => {
                return McpResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("Missing tool name"),
                )
            }
        };

        if tool_name != FEEDBACK_TOOL {
            return McpResponse::error(
                request.id,
                JsonRpcError::invalid_params(format!("Unknown tool: {}", tool_name)),
            );
        }

        let summary = match params
            .get("arguments")
            .and_then(|a| a.get("summary"))
            .and_then(|s| s.as_str())
        {
            Some(s) => s,
            None => {
                return McpResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("Missing required argument: summary"),
                )
            }
        };

        // Suspend here until a human answers, an actor cancels, or the
        // timeout fires.
        let (feedback_id, receiver) = self.bridge.open(summary).await;
        match receiver.await {
            Ok(Ok(content)) => McpResponse::success(
                request.id,
                json!({
                    "content": content,
                    "isError": false
                }),
            ),
            Ok(Err(e)) => {
                warn!(request_id = %feedback_id, error = %e, "Feedback request failed");
                McpResponse::success(
                    request.id,
                    json!({
                        "content": [{
                            "type": "text",
                            "text": format!("Error: {}", e)
                        }],
                        "isError": true
                    }),
                )
            }
            Err(_) => McpResponse::error(
                request.id,
                JsonRpcError::internal_error("Feedback bridge dropped the request"),
            ),
        }
    }
}
