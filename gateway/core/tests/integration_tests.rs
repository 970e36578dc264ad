//! End-to-end tests against a fake OpenAI-compatible provider
//!
//! Tests cover:
//! - Non-streaming and streaming replies for the same request
//! - Upstream failures surfacing as an apology (error result or one fragment)
//! - Model switching applying to the next upstream call
//! - TOML configuration driving the assembled gateway

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use reqwest::Url;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gateway_core::{
    load_config_with_env, ApiKey, ChatBackend, ChatGateway, ChatReply, ChatRequest, ModelConfig,
    ModelRegistry, Normalizer, OpenAiCompatBackend, Pacing, SessionConfig, SessionState,
    StreamManagerConfig, APOLOGY_PREFIX, DEFAULT_SYSTEM_PROMPT,
};

// =============================================================================
// Infrastructure
// =============================================================================

fn model_config(base: &str) -> ModelConfig {
    ModelConfig {
        model_id: "qwen-plus".to_string(),
        endpoint: Url::parse(&format!("{base}/v1")).unwrap(),
        api_key: ApiKey::new("sk-integration"),
        default_temperature: 0.7,
        default_max_tokens: 2048,
    }
}

/// Gateway with instant pacing so tests don't wait on character delays
fn gateway_for(base: &str) -> ChatGateway {
    let registry = ModelRegistry::shared(model_config(base));
    let backend: Arc<dyn ChatBackend> = Arc::new(
        OpenAiCompatBackend::new(Arc::clone(&registry), Duration::from_secs(5)).unwrap(),
    );
    ChatGateway::new(
        registry,
        backend,
        Normalizer::default(),
        StreamManagerConfig {
            session: SessionConfig {
                pacing: Pacing::instant(),
                ..Default::default()
            },
            ..Default::default()
        },
    )
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    }))
}

fn hi() -> ChatRequest {
    ChatRequest::from_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap()
}

async fn mount_reply(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion(content))
        .mount(server)
        .await;
}

// =============================================================================
// Scenario: "hi" -> "Hello!"
// =============================================================================

#[tokio::test]
async fn test_hello_non_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-integration"))
        .respond_with(completion("Hello!"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server.uri());
    let reply = gateway.chat(&hi()).await.unwrap();

    assert_eq!(reply, ChatReply::assistant("Hello!"));

    // The provider saw the normalized conversation: injected system turn, then the user turn
    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "qwen-plus");
    assert_eq!(
        body["messages"],
        json!([
            {"role": "system", "content": DEFAULT_SYSTEM_PROMPT},
            {"role": "user", "content": "hi"}
        ])
    );
}

#[tokio::test]
async fn test_hello_streaming() {
    let server = MockServer::start().await;
    mount_reply(&server, "Hello!").await;

    let gateway = gateway_for(&server.uri());
    let mut handle = gateway.stream_chat(&hi()).unwrap();

    let mut fragments = Vec::new();
    while let Some(fragment) = handle.recv().await {
        fragments.push(fragment.text);
    }
    let report = handle.wait().await;

    assert_eq!(fragments, vec!["H", "e", "l", "l", "o", "!"]);
    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.fragments_delivered, 6);
}

#[tokio::test]
async fn test_streaming_multibyte_round_trip() {
    let text = "你好，世界！ Hello 🦀";
    let server = MockServer::start().await;
    mount_reply(&server, text).await;

    let gateway = gateway_for(&server.uri());
    let (delivered, report) = gateway.stream_chat(&hi()).unwrap().collect().await;

    assert_eq!(delivered, text);
    assert_eq!(report.fragments_delivered, text.chars().count());
}

#[tokio::test]
async fn test_empty_reply_streams_nothing_and_completes() {
    let server = MockServer::start().await;
    mount_reply(&server, "").await;

    let gateway = gateway_for(&server.uri());
    let (delivered, report) = gateway.stream_chat(&hi()).unwrap().collect().await;

    assert_eq!(delivered, "");
    assert_eq!(report.state, SessionState::Completed);
}

// =============================================================================
// Scenario: upstream failure
// =============================================================================

#[tokio::test]
async fn test_network_failure_non_streaming() {
    // Nothing listens on the discard port
    let gateway = gateway_for("http://127.0.0.1:9");

    let err = gateway.chat(&hi()).await.unwrap_err();

    assert!(!(200..300).contains(&err.code));
    assert!(err.message.starts_with(APOLOGY_PREFIX));
}

#[tokio::test]
async fn test_network_failure_streaming() {
    let gateway = gateway_for("http://127.0.0.1:9");
    let mut handle = gateway.stream_chat(&hi()).unwrap();

    let apology = handle.recv().await.unwrap();
    assert!(apology.text.starts_with(APOLOGY_PREFIX));
    assert!(handle.recv().await.is_none());

    let report = handle.wait().await;
    assert_eq!(report.state, SessionState::Errored);
    assert_eq!(gateway.stream_stats().errored, 1);
}

#[tokio::test]
async fn test_provider_error_status_is_apology() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server.uri());
    let err = gateway.chat(&hi()).await.unwrap_err();

    assert_eq!(err.code, 502);
    assert!(err.message.contains("429"));
    assert!(err.message.contains("rate limited"));
}

#[tokio::test]
async fn test_malformed_provider_body_is_apology() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server.uri());
    let mut handle = gateway.stream_chat(&hi()).unwrap();

    let fragment = handle.recv().await.unwrap();
    assert!(fragment.text.starts_with(APOLOGY_PREFIX));
    assert_eq!(handle.wait().await.state, SessionState::Errored);
}

// =============================================================================
// Scenario: model switching
// =============================================================================

#[tokio::test]
async fn test_switch_model_applies_to_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "qwen-max"})))
        .respond_with(completion("from max"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "qwen-plus"})))
        .respond_with(completion("from plus"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server.uri());

    assert_eq!(gateway.chat(&hi()).await.unwrap().content, "from plus");

    assert!(gateway.switch_model("qwen-max").is_success());
    assert_eq!(gateway.current_model().model_id, "qwen-max");
    assert_eq!(gateway.chat(&hi()).await.unwrap().content, "from max");
}

#[tokio::test]
async fn test_rejected_switch_keeps_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "qwen-plus"})))
        .respond_with(completion("still plus"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server.uri());

    let response = gateway.switch_model("");
    assert_eq!(response.code, 500);
    assert_eq!(response.data, None);
    assert_eq!(gateway.chat(&hi()).await.unwrap().content, "still plus");
}

#[tokio::test]
async fn test_request_model_field_does_not_switch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "qwen-plus", "max_tokens": 32})))
        .respond_with(completion("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server.uri());
    let request = ChatRequest::from_json(
        r#"{"messages":[{"role":"user","content":"hi"}],"model":"qwen-max","max_tokens":32}"#,
    )
    .unwrap();

    gateway.chat(&request).await.unwrap();
    assert_eq!(gateway.current_model().model_id, "qwen-plus");
}

// =============================================================================
// Configuration driving the gateway
// =============================================================================

#[tokio::test]
async fn test_gateway_from_toml_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-from-file"))
        .and(body_partial_json(json!({"model": "qwen-turbo"})))
        .respond_with(completion("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[upstream]
endpoint = "{}/v1"
api_key = "sk-from-file"
model_id = "qwen-turbo"

[streaming]
base_delay_ms = 0
punctuation_delay_ms = 0
cjk_delay_ms = 0

[prompt]
system_prompt = "Be brief."
"#,
        server.uri()
    )
    .unwrap();

    let config = load_config_with_env(Some(file.path().to_path_buf()), |_| None).unwrap();
    let gateway = ChatGateway::from_config(&config).unwrap();

    let (text, report) = gateway.stream_chat(&hi()).unwrap().collect().await;
    assert_eq!(text, "ok");
    assert_eq!(report.state, SessionState::Completed);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["messages"][0], json!({"role": "system", "content": "Be brief."}));
}

#[tokio::test]
async fn test_huge_session_timeout_from_env_streams_normally() {
    let server = MockServer::start().await;
    mount_reply(&server, "ok").await;

    let endpoint = format!("{}/v1", server.uri());
    let max_secs = u64::MAX.to_string();
    let config = load_config_with_env(None, |key: &str| match key {
        "CHAT_GATEWAY_ENDPOINT" => Some(endpoint.clone()),
        "CHAT_GATEWAY_SESSION_TIMEOUT" => Some(max_secs.clone()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.session_timeout, Duration::from_secs(u64::MAX));

    let gateway = ChatGateway::from_config(&config).unwrap();
    let (text, report) = gateway.stream_chat(&hi()).unwrap().collect().await;

    assert_eq!(text, "ok");
    assert_eq!(report.state, SessionState::Completed);
}
