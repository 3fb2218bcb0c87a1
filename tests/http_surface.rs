//! HTTP surface tests: session routing, error codes, and the feedback
//! round-trip over a real listening socket.

use std::time::Duration;

use feedback_mcp::{FeedbackServer, ServerConfig};
use serde_json::{json, Value};

const SESSION_HEADER: &str = "mcp-session-id";

fn initialize_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "http-test", "version": "1.0.0" }
        }
    })
}

fn tools_list_body() -> Value {
    json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {} })
}

// Router-level error bodies carry an explicit `"id": null`, not an omitted id.
fn assert_null_id(body: &Value) {
    assert!(body.as_object().unwrap().contains_key("id"));
    assert_eq!(body["id"], Value::Null);
}

async fn started_server() -> (FeedbackServer, String) {
    let server = FeedbackServer::new(ServerConfig::default());
    let base_url = server.start(0, "127.0.0.1").await.unwrap();
    (server, base_url)
}

async fn initialize_session(client: &reqwest::Client, base_url: &str) -> String {
    let res = client
        .post(base_url)
        .json(&initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    res.headers()
        .get(SESSION_HEADER)
        .expect("initialize response carries a session id")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_streamable_session_lifecycle() {
    let (server, base_url) = started_server().await;
    let client = reqwest::Client::new();

    // Initialize without a session header mints a fresh session
    let sid = initialize_session(&client, &base_url).await;
    assert_eq!(server.get_active_sessions().await, vec![sid.clone()]);

    // tools/list with the returned header reaches the registered tool
    let res = client
        .post(&base_url)
        .header(SESSION_HEADER, &sid)
        .json(&tools_list_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["result"]["tools"][0]["name"], "interactive_feedback");

    // A bogus session header is 404 with code -32001
    let res = client
        .post(&base_url)
        .header(SESSION_HEADER, "bogus-session")
        .json(&tools_list_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32001);
    assert_null_id(&body);

    // No header on a non-initialize request is 400 with code -32000
    let res = client
        .post(&base_url)
        .json(&tools_list_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32000);
    assert_null_id(&body);

    // DELETE tears the session down
    let res = client
        .delete(&base_url)
        .header(SESSION_HEADER, &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(server.get_active_sessions().await.is_empty());

    // The id is gone afterwards
    let res = client
        .delete(&base_url)
        .header(SESSION_HEADER, &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_sessions_get_distinct_ids() {
    let (server, base_url) = started_server().await;
    let client = reqwest::Client::new();

    let (a, b) = tokio::join!(
        initialize_session(&client, &base_url),
        initialize_session(&client, &base_url),
    );
    assert_ne!(a, b);

    let active = server.get_active_sessions().await;
    assert_eq!(active.len(), 2);
    assert!(active.contains(&a));
    assert!(active.contains(&b));

    // Sessions tear down independently
    let res = client
        .delete(&base_url)
        .header(SESSION_HEADER, &a)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(server.get_active_sessions().await, vec![b.clone()]);

    server.stop().await;
}

#[tokio::test]
async fn test_error_surface() {
    let (server, base_url) = started_server().await;
    let client = reqwest::Client::new();

    // GET / without a session header
    let res = client.get(&base_url).send().await.unwrap();
    assert_eq!(res.status(), 400);

    // Unknown method on a known path
    let res = client.put(&base_url).body("{}").send().await.unwrap();
    assert_eq!(res.status(), 405);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32000);
    assert_null_id(&body);

    // Unknown path
    let res = client
        .post(format!("{}/nope", base_url))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 405);

    // OPTIONS short-circuits with 204
    let res = client
        .request(reqwest::Method::OPTIONS, &base_url)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);

    // Malformed body
    let res = client
        .post(&base_url)
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
    assert_null_id(&body);

    server.stop().await;
}

#[tokio::test]
async fn test_sse_session_flow() {
    let (server, base_url) = started_server().await;
    let client = reqwest::Client::new();

    // Establish the SSE session; the response headers carry the session id
    let stream_res = client
        .get(format!("{}/sse", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(stream_res.status(), 200);
    let content_type = stream_res.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    let sid = stream_res.headers()[SESSION_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    assert!(server.get_active_sessions().await.contains(&sid));

    // POST /message with the session id reaches the protocol core
    let res = client
        .post(format!("{}/message?sessionId={}", base_url, sid))
        .json(&initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["result"]["serverInfo"]["name"], "AI Feedback Bridge");

    // Unknown or missing session ids are rejected
    let res = client
        .post(format!("{}/message?sessionId=bogus", base_url))
        .json(&initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let res = client
        .post(format!("{}/message", base_url))
        .json(&initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    // Dropping the stream closes the session
    drop(stream_res);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!server.get_active_sessions().await.contains(&sid));

    server.stop().await;
}

#[tokio::test]
async fn test_feedback_round_trip_over_http() {
    let (server, base_url) = started_server().await;
    let client = reqwest::Client::new();
    let sid = initialize_session(&client, &base_url).await;

    let mut events = server.subscribe_feedback();

    let call = tokio::spawn({
        let client = client.clone();
        let base_url = base_url.clone();
        let sid = sid.clone();
        async move {
            client
                .post(&base_url)
                .header(SESSION_HEADER, &sid)
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": 3,
                    "method": "tools/call",
                    "params": {
                        "name": "interactive_feedback",
                        "arguments": { "summary": "Confirm deploy" }
                    }
                }))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        }
    });

    // The UI layer observes the event and answers asynchronously
    let request = events.recv().await.unwrap();
    assert_eq!(request.summary, "Confirm deploy");
    assert_eq!(server.pending_feedback().await, 1);

    let accepted = server
        .respond_to_feedback(&request.id, json!([{ "type": "text", "text": "yes" }]))
        .await;
    assert!(accepted);

    let body = call.await.unwrap();
    assert_eq!(body["result"]["isError"], false);
    assert_eq!(body["result"]["content"][0]["text"], "yes");
    assert_eq!(server.pending_feedback().await, 0);

    // A second answer to the same id is a no-op
    assert!(
        !server
            .respond_to_feedback(&request.id, json!([{ "type": "text", "text": "again" }]))
            .await
    );

    server.stop().await;
}

#[tokio::test]
async fn test_stop_drains_pending_feedback() {
    let (server, base_url) = started_server().await;
    let client = reqwest::Client::new();
    let sid = initialize_session(&client, &base_url).await;

    let mut events = server.subscribe_feedback();

    let call = tokio::spawn({
        let client = client.clone();
        let base_url = base_url.clone();
        let sid = sid.clone();
        async move {
            client
                .post(&base_url)
                .header(SESSION_HEADER, &sid)
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": 4,
                    "method": "tools/call",
                    "params": {
                        "name": "interactive_feedback",
                        "arguments": { "summary": "Never answered" }
                    }
                }))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        }
    });

    // Wait until the call is suspended, then shut down
    events.recv().await.unwrap();
    assert_eq!(server.pending_feedback().await, 1);
    server.stop().await;

    let body = call.await.unwrap();
    assert_eq!(body["result"]["isError"], true);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("Server shutting down"));
    assert_eq!(server.pending_feedback().await, 0);
    assert!(server.get_base_url().await.is_none());
}

#[tokio::test]
async fn test_base_url_lifecycle() {
    let server = FeedbackServer::new(ServerConfig::default());
    assert!(server.get_base_url().await.is_none());

    let base_url = server.start(0, "127.0.0.1").await.unwrap();
    assert_eq!(server.get_base_url().await, Some(base_url.clone()));

    // Starting twice is an error
    assert!(server.start(0, "127.0.0.1").await.is_err());

    server.stop().await;
    assert!(server.get_base_url().await.is_none());
}
