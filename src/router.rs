//! Request Router and process lifecycle.
//!
//! Single HTTP entry point. Every inbound request is classified by method,
//! path, and session selector, then dispatched to the owning transport:
//!
//! - `GET /sse` establishes or resumes an SSE session (query `sessionId`)
//! - `POST /message` forwards to a live SSE session (query `sessionId`)
//! - `POST /` creates a streamable session on initialize, or forwards to an
//!   existing one (header `mcp-session-id`)
//! - `GET /` opens the streamable server-push stream
//! - `DELETE /` tears a streamable session down
//! - anything else is 405 with a JSON-RPC error body
//!
//! The server is an explicitly constructed, explicitly owned object; start
//! and stop are driven by whoever embeds it.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{sse::Event, sse::KeepAlive, IntoResponse, Response, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::future::FutureExt;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::feedback::FeedbackRequest;
use crate::protocol::{JsonRpcError, McpRequest, McpResponse};
use crate::server::McpServer;
use crate::session::{SessionRegistry, SessionTransport, TransportKind};
use crate::transport::{McpHandler, SseSession, StreamableSession};

/// Header carrying the streamable HTTP session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Long-running feedback server: owns the protocol core, the session
/// registry, and (while started) the listening socket.
pub struct FeedbackServer {
    config: ServerConfig,
    mcp: Arc<McpServer>,
    registry: Arc<SessionRegistry>,
    running: Mutex<Option<Running>>,
}

struct Running {
    base_url: String,
    shutdown: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Clone)]
struct AppState {
    mcp: Arc<McpServer>,
    registry: Arc<SessionRegistry>,
    config: ServerConfig,
}

impl FeedbackServer {
    pub fn new(config: ServerConfig) -> Self {
        let mcp = McpServer::new(config.clone());
        Self {
            config,
            mcp,
            registry: Arc::new(SessionRegistry::new()),
            running: Mutex::new(None),
        }
    }

    /// Bind and start serving. `port` 0 asks the OS for an ephemeral port;
    /// the returned base URL carries the actual one.
    pub async fn start(&self, port: u16, host: &str) -> Result<String> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(anyhow!("server already started"));
        }

        let state = AppState {
            mcp: self.mcp.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        };
        let app = build_router(state);

        let listener = tokio::net::TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        let base_url = format!("http://{}:{}", host, addr.port());

        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "HTTP server error");
            }
        });

        info!(base_url = %base_url, "MCP feedback server started");
        info!("  stream HTTP: {}/", base_url);
        info!("  SSE: {}/sse", base_url);

        *running = Some(Running {
            base_url: base_url.clone(),
            shutdown,
            handle,
        });
        Ok(base_url)
    }

    /// Drain every pending feedback request, close every session, release
    /// the socket. Safe to call when not started.
    pub async fn stop(&self) {
        self.mcp.bridge().drain_all("Server shutting down").await;

        for transport in self.registry.drain().await {
            if let Err(e) = transport.close().await {
                warn!(session_id = %transport.session_id(), error = %e, "Error closing transport");
            }
        }

        if let Some(running) = self.running.lock().await.take() {
            let _ = running.shutdown.send(());
            let _ = running.handle.await;
            info!("MCP feedback server stopped");
        }
    }

    pub async fn get_base_url(&self) -> Option<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.base_url.clone())
    }

    /// Session ids across both transport kinds.
    pub async fn get_active_sessions(&self) -> Vec<String> {
        self.registry.list_active().await
    }

    /// Deliver a human answer to a pending feedback request.
    pub async fn respond_to_feedback(&self, request_id: &str, content: Value) -> bool {
        self.mcp.bridge().respond(request_id, content).await
    }

    /// Cancel a pending feedback request.
    pub async fn cancel_feedback(&self, request_id: &str, reason: &str) -> bool {
        self.mcp.bridge().cancel(request_id, reason).await
    }

    /// Subscribe to feedback request announcements (the UI layer's inbox).
    pub fn subscribe_feedback(&self) -> broadcast::Receiver<FeedbackRequest> {
        self.mcp.bridge().subscribe()
    }

    /// Feedback requests still awaiting settlement.
    pub async fn pending_feedback(&self) -> usize {
        self.mcp.bridge().pending_count().await
    }
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route(
            "/sse",
            get(sse_connect).options(preflight).fallback(method_not_allowed),
        )
        .route(
            "/message",
            post(sse_message).options(preflight).fallback(method_not_allowed),
        )
        .route(
            "/",
            post(streamable_post)
                .get(streamable_get)
                .delete(streamable_delete)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .fallback(unknown_path)
        .with_state(state)
        .layer(cors)
}

// === Handlers ===

#[derive(Deserialize)]
struct SseQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(McpResponse::error(
            Some(Value::Null),
            JsonRpcError::bad_request("Method Not Allowed"),
        )),
    )
        .into_response()
}

async fn unknown_path(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    method_not_allowed().await
}

/// GET /sse: establish a new SSE session, or resume a live one.
async fn sse_connect(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
) -> Response {
    if let Some(id) = query.session_id.as_deref() {
        if let Some(session) = state.registry.lookup_sse(id).await {
            info!(session_id = %id, "SSE client reconnecting");
            return match session.stream().await {
                Some(stream) => sse_response(stream, session.session_id(), &state.config),
                None => error_response(ServerError::Internal("SSE transport closed".into())),
            };
        }
        // A stale id gets a fresh session below
    }

    let session = SseSession::new(state.mcp.clone() as Arc<dyn McpHandler>);
    {
        let registry = state.registry.clone();
        session
            .set_on_close(move |sid| {
                async move {
                    registry.remove(TransportKind::Sse, &sid).await;
                }
                .boxed()
            })
            .await;
    }
    if let Err(e) = state
        .registry
        .register(SessionTransport::Sse(session.clone()))
        .await
    {
        error!(error = %e, "Failed to register SSE session");
        return error_response(ServerError::Internal(e.to_string()));
    }
    info!(session_id = %session.session_id(), "SSE session created");

    match session.stream().await {
        Some(stream) => sse_response(stream, session.session_id(), &state.config),
        None => error_response(ServerError::Internal("SSE transport closed".into())),
    }
}

/// POST /message: forward a client message to its SSE session.
async fn sse_message(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
    body: Bytes,
) -> Response {
    let session = match query.session_id {
        Some(ref id) => state.registry.lookup_sse(id).await,
        None => None,
    };
    let Some(session) = session else {
        return error_response(ServerError::BadRequest(
            "Invalid or missing session ID".into(),
        ));
    };

    let request = match parse_body(&body) {
        Ok(r) => r,
        Err(response) => return response,
    };

    let response = session.handle_message(request).await;
    Json(response).into_response()
}

/// POST /: the streamable HTTP entry point.
async fn streamable_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match parse_body(&body) {
        Ok(r) => r,
        Err(response) => return response,
    };

    match header_session_id(&headers) {
        Some(id) => match state.registry.lookup_streamable(&id).await {
            Some(session) => {
                let response = session.handle_request(request).await;
                json_with_session(response, &id)
            }
            None => error_response(ServerError::SessionNotFound),
        },
        None if request.is_initialize() => initialize_session(&state, request).await,
        None => error_response(ServerError::BadRequest(
            "Bad Request: No valid session ID provided or invalid request".into(),
        )),
    }
}

/// Build a fresh streamable session and run the initialize handshake through
/// it. Registration fires from inside the handshake, so the registered id is
/// the one the client receives.
async fn initialize_session(state: &AppState, request: McpRequest) -> Response {
    let session = StreamableSession::new(state.mcp.clone() as Arc<dyn McpHandler>);

    {
        let registry = state.registry.clone();
        let transport = SessionTransport::Streamable(session.clone());
        session
            .set_on_initialized(move |sid| {
                async move {
                    // Defensive: unreachable while ids are UUIDs
                    if let Err(e) = registry.register(transport).await {
                        error!(session_id = %sid, error = %e, "Failed to register session");
                    } else {
                        info!(session_id = %sid, "Session initialized");
                    }
                }
                .boxed()
            })
            .await;
    }
    {
        let registry = state.registry.clone();
        session
            .set_on_close(move |sid| {
                async move {
                    registry.remove(TransportKind::StreamableHttp, &sid).await;
                }
                .boxed()
            })
            .await;
    }

    let session_id = session.session_id().to_string();
    let response = session.handle_request(request).await;
    json_with_session(response, &session_id)
}

/// GET /: open the long-lived server-push stream for a streamable session.
async fn streamable_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = header_session_id(&headers) else {
        return error_response(ServerError::BadRequest(
            "Invalid or missing session ID".into(),
        ));
    };
    let Some(session) = state.registry.lookup_streamable(&id).await else {
        return error_response(ServerError::BadRequest(
            "Invalid or missing session ID".into(),
        ));
    };

    match session.open_event_stream().await {
        Some(stream) => sse_response(stream, &id, &state.config),
        None => error_response(ServerError::BadRequest("Session is closed".into())),
    }
}

/// DELETE /: protocol-level teardown. The session leaves the registry even
/// when the adapter's own teardown fails; cleanup must not leak.
async fn streamable_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = header_session_id(&headers) else {
        return error_response(ServerError::BadRequest(
            "Invalid or missing session ID".into(),
        ));
    };
    let Some(session) = state.registry.lookup_streamable(&id).await else {
        return error_response(ServerError::BadRequest(
            "Invalid or missing session ID".into(),
        ));
    };

    let teardown = session.close().await;
    state
        .registry
        .remove(TransportKind::StreamableHttp, &id)
        .await;
    if let Err(e) = teardown {
        warn!(session_id = %id, error = %e, "Error during session teardown");
    }
    info!(session_id = %id, "Session deleted");

    Json(McpResponse::success(None, serde_json::json!({}))).into_response()
}

// === Helpers ===

fn parse_body(body: &Bytes) -> Result<McpRequest, Response> {
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(McpResponse::error(
                Some(Value::Null),
                JsonRpcError::parse_error(format!("Invalid request body: {}", e)),
            )),
        )
            .into_response()
    })
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// Router-level errors have no request to take an id from; JSON-RPC still
// wants an explicit `"id": null` member in the body.
fn error_response(error: ServerError) -> Response {
    (
        error.status(),
        Json(McpResponse::error(Some(Value::Null), error.to_json_rpc())),
    )
        .into_response()
}

fn json_with_session(response: McpResponse, session_id: &str) -> Response {
    let mut res = Json(response).into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        res.headers_mut().insert(SESSION_HEADER, value);
    }
    res
}

fn sse_response<S>(stream: S, session_id: &str, config: &ServerConfig) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let mut res = Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(config.keepalive_interval)
                .text("ping"),
        )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        res.headers_mut().insert(SESSION_HEADER, value);
    }
    res
}
