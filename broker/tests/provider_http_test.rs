use broker::classifier::classify;
use broker::providers::{AnthropicProvider, OpenAiCompatibleProvider};
use broker_core::{
    ChatMessage, ErrorKind, PromptPayload, Provider, ProviderCall, ProviderKind, SecretString,
    TokenSink,
};
use errors::ProviderError;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IDLE: Duration = Duration::from_secs(5);

fn call(model: &str, streaming: bool) -> ProviderCall {
    ProviderCall {
        model: model.to_string(),
        api_key: SecretString::new("sk-test".to_string()),
        api_base: None,
        prompt: PromptPayload::new(
            Some("You are helpful.".to_string()),
            vec![ChatMessage::user("Say hello")],
        ),
        temperature: Some(0.2),
        max_tokens: Some(64),
        streaming,
    }
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

fn openai(server: &MockServer) -> OpenAiCompatibleProvider {
    OpenAiCompatibleProvider::new(ProviderKind::OpenAi, reqwest::Client::new(), &server.uri(), IDLE)
}

fn anthropic(server: &MockServer) -> AnthropicProvider {
    AnthropicProvider::new(reqwest::Client::new(), &server.uri(), "2023-06-01", IDLE)
}

#[tokio::test]
async fn test_openai_blocking_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini", "max_tokens": 64, "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello!" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        })))
        .mount(&server)
        .await;

    let response = openai(&server)
        .submit(&call("gpt-4o-mini", false), None)
        .await
        .unwrap();
    assert_eq!(response.text, "Hello!");
    assert_eq!(response.prompt_tokens, 12);
    assert_eq!(response.completion_tokens, 3);
}

#[tokio::test]
async fn test_openai_streaming_pushes_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "stream": true, "stream_options": { "include_usage": true } })))
        .respond_with(sse(concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        )))
        .mount(&server)
        .await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = TokenSink::new(Some(tx));
    let response = openai(&server)
        .submit(&call("gpt-4o-mini", true), Some(&sink))
        .await
        .unwrap();

    assert_eq!(response.text, "Hello");
    assert_eq!(response.completion_tokens, 2);
    assert!(sink.is_active());
    assert_eq!(rx.recv().await.unwrap(), "Hel");
    assert_eq!(rx.recv().await.unwrap(), "lo");
}

#[tokio::test]
async fn test_openai_rate_limit_is_raw_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "Rate limit reached", "type": "requests", "code": "rate_limit_exceeded" }
        })))
        .mount(&server)
        .await;

    let error = openai(&server)
        .submit(&call("gpt-4o-mini", false), None)
        .await
        .unwrap_err();
    assert!(matches!(error, ProviderError::Status { status: 429, .. }));

    let classification = classify(&error);
    assert_eq!(classification.kind, ErrorKind::RateLimited);
    assert_eq!(classification.error_code, "rate_limit_exceeded");
}

#[tokio::test]
async fn test_openai_length_finish_is_truncation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "partial" }, "finish_reason": "length" }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 64 }
        })))
        .mount(&server)
        .await;

    let error = openai(&server)
        .submit(&call("gpt-4o-mini", false), None)
        .await
        .unwrap_err();
    assert!(matches!(error, ProviderError::LengthLimited { .. }));
}

#[tokio::test]
async fn test_openai_mid_stream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse(
            "data: {\"error\":{\"code\":\"rate_limit_exceeded\",\"message\":\"Too many requests\"}}\n\n",
        ))
        .mount(&server)
        .await;

    let sink = TokenSink::new(None);
    let error = openai(&server)
        .submit(&call("gpt-4o-mini", true), Some(&sink))
        .await
        .unwrap_err();
    assert!(!sink.is_active());
    assert_eq!(classify(&error).kind, ErrorKind::RateLimited);
}

#[tokio::test]
async fn test_openrouter_uses_credential_api_base() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/custom/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "routed" }, "finish_reason": "stop" }]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new(
        ProviderKind::OpenRouter,
        reqwest::Client::new(),
        "http://127.0.0.1:9",
        IDLE,
    );
    let mut call = call("openai/gpt-4.1-mini", false);
    call.api_base = Some(format!("{}/custom/v1/", server.uri()));

    let response = provider.submit(&call, None).await.unwrap();
    assert_eq!(response.text, "routed");
    // No usage reported: estimated from the text.
    assert!(response.completion_tokens > 0);
}

#[tokio::test]
async fn test_anthropic_blocking_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({ "system": "You are helpful.", "max_tokens": 64 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "text", "text": "Hi there" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 20, "output_tokens": 4 }
        })))
        .mount(&server)
        .await;

    let response = anthropic(&server)
        .submit(&call("claude-3-5-haiku-latest", false), None)
        .await
        .unwrap();
    assert_eq!(response.text, "Hi there");
    assert_eq!(response.prompt_tokens, 20);
    assert_eq!(response.completion_tokens, 4);
}

#[tokio::test]
async fn test_anthropic_streaming_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse(concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"m\",\"usage\":{\"input_tokens\":9,\"output_tokens\":1}}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: ping\n",
            "data: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" you\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        )))
        .mount(&server)
        .await;

    let sink = TokenSink::new(None);
    let response = anthropic(&server)
        .submit(&call("claude-3-5-haiku-latest", true), Some(&sink))
        .await
        .unwrap();
    assert_eq!(response.text, "Hi you");
    assert_eq!(response.prompt_tokens, 9);
    assert_eq!(response.completion_tokens, 3);
    assert_eq!(sink.received(), 2);
}

#[tokio::test]
async fn test_anthropic_stream_error_maps_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse(concat!(
            "event: error\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        )))
        .mount(&server)
        .await;

    let error = anthropic(&server)
        .submit(&call("claude-3-5-haiku-latest", true), Some(&TokenSink::new(None)))
        .await
        .unwrap_err();
    assert!(matches!(error, ProviderError::Status { status: 529, .. }));

    let classification = classify(&error);
    assert_eq!(classification.kind, ErrorKind::UpstreamStatusError);
    assert_eq!(classification.error_code, "overloaded_error");
}

#[tokio::test]
async fn test_anthropic_not_found_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "type": "error",
            "error": { "type": "not_found_error", "message": "model: claude-old" }
        })))
        .mount(&server)
        .await;

    let error = anthropic(&server)
        .submit(&call("claude-old", false), None)
        .await
        .unwrap_err();
    let classification = classify(&error);
    assert_eq!(classification.kind, ErrorKind::NotFound);
    assert!(classification.deprecates_credential());
}

#[tokio::test]
async fn test_silent_stream_times_out_before_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n").set_delay(Duration::from_secs(4)))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new(
        ProviderKind::OpenAi,
        reqwest::Client::new(),
        &server.uri(),
        Duration::from_secs(1),
    );
    let sink = TokenSink::new(None);
    let started = std::time::Instant::now();
    let error = provider
        .submit(&call("gpt-4o-mini", true), Some(&sink))
        .await
        .unwrap_err();

    assert!(matches!(error, ProviderError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(classify(&error).kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_anthropic_silent_stream_times_out_before_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse("event: ping\ndata: {\"type\":\"ping\"}\n\n").set_delay(Duration::from_secs(4)))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(
        reqwest::Client::new(),
        &server.uri(),
        "2023-06-01",
        Duration::from_secs(1),
    );
    let error = provider
        .submit(&call("claude-3-5-haiku-latest", true), Some(&TokenSink::new(None)))
        .await
        .unwrap_err();
    assert!(matches!(error, ProviderError::Timeout { .. }));
}

#[tokio::test]
async fn test_error_body_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(100_000)))
        .mount(&server)
        .await;

    let error = openai(&server)
        .submit(&call("gpt-4o-mini", false), None)
        .await
        .unwrap_err();
    match error {
        ProviderError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body.len(), 16 * 1024);
        }
        other => panic!("expected status error, got {other:?}"),
    }
}
