use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chatrelay_rs::auth::StaticApiKeys;
use chatrelay_rs::config::AppConfig;
use chatrelay_rs::protocol::ProviderKind;
use chatrelay_rs::routing::dispatch::dispatch_request;
use chatrelay_rs::state::AppState;
use chatrelay_rs::transport::HttpTransport;
use parking_lot::Mutex;
use serde_json::{json, Value};

const ANTHROPIC_STREAM: &str = concat!(
    "event: message_start\n",
    "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-3-5-sonnet-20241022\",\"usage\":{\"input_tokens\":9,\"output_tokens\":1}}}\n\n",
    "event: content_block_start\n",
    "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
    "event: ping\n",
    "data: {\"type\":\"ping\"}\n\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n",
    "event: content_block_stop\n",
    "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
    "event: message_stop\n",
    "data: {\"type\":\"message_stop\"}\n\n",
);

async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn build_state(base_url: &str) -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.providers.openai.base_url = Some(base_url.to_string());
    config.providers.anthropic.base_url = Some(base_url.to_string());
    let transport = HttpTransport::new(&config.server).expect("build transport");
    Arc::new(AppState::new(config, transport).with_api_keys(Arc::new(StaticApiKeys::new())))
}

fn chat_request(provider: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/chat/{provider}"))
        .header("content-type", "application/json")
        .header("x-request-id", "trace-test-1")
        .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
        .expect("build request")
}

fn data_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_anthropic_stream_relayed_as_normalized_deltas() {
    let seen_headers: Arc<Mutex<Option<HeaderMap>>> = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&seen_headers);
    let app = Router::new().route(
        "/v1/messages",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let seen = Arc::clone(&seen);
            async move {
                assert_eq!(body["stream"], true);
                *seen.lock() = Some(headers);
                ([(header::CONTENT_TYPE, "text/event-stream")], ANTHROPIC_STREAM).into_response()
            }
        }),
    );
    let (base, server) = spawn_upstream(app).await;
    let state = build_state(&base);

    let request = chat_request(
        "anthropic",
        &json!({
            "messages": [{"role": "user", "content": "Say hi"}],
            "config": {"model": "claude-3-5-sonnet-20241022", "max_tokens": 256, "stream": true},
            "apiKey": "sk-ant-client-key"
        }),
    );
    let response = dispatch_request(state, Arc::<str>::from("/api"), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["x-request-id"], "trace-test-1");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let text = String::from_utf8(body.to_vec()).expect("utf8 body");
    let payloads = data_payloads(&text);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let deltas: Vec<String> = payloads[..payloads.len() - 1]
        .iter()
        .map(|payload| {
            let value: Value = serde_json::from_str(payload).expect("json frame");
            value["choices"][0]["delta"]["content"]
                .as_str()
                .expect("delta content")
                .to_string()
        })
        .collect();
    assert_eq!(deltas, vec!["Hi".to_string(), " there".to_string()]);

    let headers = seen_headers.lock().take().expect("upstream was called");
    assert_eq!(headers["x-api-key"], "sk-ant-client-key");
    assert_eq!(headers["anthropic-version"], "2023-06-01");
    assert_eq!(headers["x-request-id"], "trace-test-1");

    server.abort();
}

#[tokio::test]
async fn test_openai_non_stream_returns_normalized_json() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            assert_eq!(headers["authorization"], "Bearer sk-openai");
            assert_eq!(body["model"], "gpt-4o");
            Json(json!({
                "id": "chatcmpl_mock",
                "object": "chat.completion",
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "pong"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
            }))
        }),
    );
    let (base, server) = spawn_upstream(app).await;
    let state = build_state(&base);

    let request = chat_request(
        "openai",
        &json!({
            "formattedRequest": {
                "model": "gpt-4o",
                "max_tokens": 64,
                "stream": false,
                "messages": [{"role": "user", "content": "ping"}]
            },
            "apiKey": "sk-openai"
        }),
    );
    let response = dispatch_request(state, Arc::<str>::from("/api"), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let payload: Value = serde_json::from_slice(&body).expect("json payload");
    assert_eq!(payload["choices"][0]["message"]["content"], "pong");
    assert_eq!(payload["usage"]["total_tokens"], 6);

    server.abort();
}

#[tokio::test]
async fn test_upstream_rate_limit_is_returned_before_stream_opens() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", "7")],
                Json(json!({"error": {"message": "Rate limit reached", "type": "requests"}})),
            )
        }),
    );
    let (base, server) = spawn_upstream(app).await;
    let state = build_state(&base);

    let request = chat_request(
        "openai",
        &json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "apiKey": "sk-openai"
        }),
    );
    let response = dispatch_request(state, Arc::<str>::from("/api"), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let payload: Value = serde_json::from_slice(&body).expect("json payload");
    assert_eq!(payload["status"], 429);
    assert_eq!(payload["type"], "rate_limit_error");
    assert_eq!(payload["details"]["retry_after_secs"], 7);
    assert!(payload["error"]
        .as_str()
        .expect("error string")
        .contains("Rate limit reached"));

    server.abort();
}

#[tokio::test]
async fn test_missing_key_and_unknown_provider() {
    let state = build_state("http://127.0.0.1:9");

    let request = chat_request(
        "openai",
        &json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}),
    );
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from("/api"), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let payload: Value = serde_json::from_slice(&body).expect("json payload");
    assert!(payload["error"]
        .as_str()
        .expect("error string")
        .contains("No API key found for openai"));

    let request = chat_request(
        "gemini",
        &json!({"model": "m", "messages": [{"role": "user", "content": "hi"}], "apiKey": "k"}),
    );
    let response = dispatch_request(state, Arc::<str>::from("/api"), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_server_key_used_when_body_has_none() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|headers: HeaderMap| async move {
            assert_eq!(headers["authorization"], "Bearer sk-server");
            Json(json!({"choices": [{"message": {"content": "ok"}}]}))
        }),
    );
    let (base, server) = spawn_upstream(app).await;
    let mut config = AppConfig::default();
    config.providers.openai.base_url = Some(base);
    let transport = HttpTransport::new(&config.server).expect("build transport");
    let keys = StaticApiKeys::new().with(ProviderKind::OpenAi, "sk-server");
    let state = Arc::new(AppState::new(config, transport).with_api_keys(Arc::new(keys)));

    let request = chat_request(
        "openai",
        &json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}),
    );
    let response = dispatch_request(state, Arc::<str>::from("/api"), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    server.abort();
}

#[tokio::test]
async fn test_health_and_request_id_generation() {
    let state = build_state("http://127.0.0.1:9");
    let request = Request::builder()
        .method("GET")
        .uri("/api/health")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from("/api"), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let payload: Value = serde_json::from_slice(&body).expect("json payload");
    assert_eq!(payload["status"], "ok");
    assert!(payload["uptime_secs"].is_u64());

    let request = Request::builder()
        .method("POST")
        .uri("/api/chat/openai")
        .body(Body::from("not json"))
        .expect("build request");
    let response = dispatch_request(state, Arc::<str>::from("/api"), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let generated = response.headers()["x-request-id"]
        .to_str()
        .expect("ascii id");
    assert_eq!(generated.len(), 36);
}
