#![cfg(feature = "web")]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rabindra::config::LlmConfig;
use rabindra::generator::{
    GenerateError, GenerationKind, GenerationRequest, Generator, HttpGenerator, generator_for,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone)]
enum Reply {
    Content(&'static str),
    NoChoices,
    Failure(StatusCode),
    Slow,
}

#[derive(Clone)]
struct Mock {
    reply: Reply,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn completions(State(mock): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    mock.seen.lock().unwrap().push((auth, body));

    match mock.reply {
        Reply::Content(text) => Json(json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }]
        }))
        .into_response(),
        Reply::NoChoices => Json(json!({ "id": "chatcmpl-2", "choices": [] })).into_response(),
        Reply::Failure(status) => (status, "upstream exploded: secret-key-id").into_response(),
        Reply::Slow => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({ "choices": [] })).into_response()
        }
    }
}

/// Serve a fake chat-completions API; returns its base URL and request log
async fn spawn_mock(reply: Reply) -> (String, Arc<Mutex<Vec<(Option<String>, Value)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mock = Mock {
        reply,
        seen: Arc::clone(&seen),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/v1/", addr), seen)
}

fn generator(base_url: &str, timeout: Duration) -> HttpGenerator {
    HttpGenerator::new(base_url, "test-key", "test-model", timeout).unwrap()
}

#[tokio::test]
async fn sends_chat_request_and_trims_reply() {
    let (base_url, seen) = spawn_mock(Reply::Content("\n  মেঘের কোলে রোদ হেসেছে  \n")).await;
    let generator = generator(&base_url, Duration::from_secs(5));
    assert!(generator.endpoint().ends_with("/v1/chat/completions"));

    let mut request = GenerationRequest::new(GenerationKind::Poem);
    request.theme = "বর্ষা".to_string();
    let prompt = request.prompt();

    let text = generator.generate(&prompt, &request.settings).await.unwrap();
    assert_eq!(text, "মেঘের কোলে রোদ হেসেছে");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["max_tokens"], request.settings.max_tokens);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], prompt.system.as_str());
    assert_eq!(body["messages"][1]["role"], "user");
    assert!(body["messages"][1]["content"].as_str().unwrap().contains("Theme: বর্ষা"));
}

#[tokio::test]
async fn error_status_is_reported_without_leaking() {
    let (base_url, _) = spawn_mock(Reply::Failure(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let generator = generator(&base_url, Duration::from_secs(5));
    let request = GenerationRequest::new(GenerationKind::Song);

    let error = generator
        .generate(&request.prompt(), &request.settings)
        .await
        .unwrap_err();
    match &error {
        GenerateError::Status { status, message } => {
            assert_eq!(*status, 500);
            assert!(message.contains("upstream exploded"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!error.user_message().contains("secret-key-id"));
}

#[tokio::test]
async fn rejected_key_gets_its_own_message() {
    let (base_url, _) = spawn_mock(Reply::Failure(StatusCode::UNAUTHORIZED)).await;
    let generator = generator(&base_url, Duration::from_secs(5));
    let request = GenerationRequest::new(GenerationKind::Poem);

    let error = generator
        .generate(&request.prompt(), &request.settings)
        .await
        .unwrap_err();
    assert!(matches!(error, GenerateError::Status { status: 401, .. }));
    assert!(error.user_message().contains("API key"));
}

#[tokio::test]
async fn empty_choices_are_an_error() {
    let (base_url, _) = spawn_mock(Reply::NoChoices).await;
    let generator = generator(&base_url, Duration::from_secs(5));
    let request = GenerationRequest::new(GenerationKind::Fusion);

    let error = generator
        .generate(&request.prompt(), &request.settings)
        .await
        .unwrap_err();
    assert_eq!(error, GenerateError::EmptyResponse);
}

#[tokio::test]
async fn blank_content_is_an_error() {
    let (base_url, _) = spawn_mock(Reply::Content("   \n")).await;
    let generator = generator(&base_url, Duration::from_secs(5));
    let request = GenerationRequest::new(GenerationKind::Poem);

    let error = generator
        .generate(&request.prompt(), &request.settings)
        .await
        .unwrap_err();
    assert_eq!(error, GenerateError::EmptyResponse);
}

#[tokio::test]
async fn slow_service_times_out() {
    let (base_url, _) = spawn_mock(Reply::Slow).await;
    let generator = generator(&base_url, Duration::from_secs(1));
    let request = GenerationRequest::new(GenerationKind::Poem);

    let error = generator
        .generate(&request.prompt(), &request.settings)
        .await
        .unwrap_err();
    assert_eq!(error, GenerateError::Timeout(1));
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let generator = generator(&format!("http://{}", addr), Duration::from_secs(5));
    let request = GenerationRequest::new(GenerationKind::Poem);
    let error = generator
        .generate(&request.prompt(), &request.settings)
        .await
        .unwrap_err();
    assert!(matches!(error, GenerateError::Transport(_)));
}

#[tokio::test]
async fn generator_follows_configuration() {
    let disabled = generator_for(&LlmConfig::default()).unwrap();
    assert!(!disabled.is_enabled());
    assert_eq!(disabled.name(), "disabled");

    let (base_url, _) = spawn_mock(Reply::Content("গান")).await;
    let config = LlmConfig {
        api_key: Some("test-key".to_string()),
        base_url,
        ..LlmConfig::default()
    };
    let enabled = generator_for(&config).unwrap();
    assert!(enabled.is_enabled());
    assert_eq!(enabled.name(), "http");

    let request = GenerationRequest::new(GenerationKind::Song);
    let text = enabled.generate(&request.prompt(), &request.settings).await.unwrap();
    assert_eq!(text, "গান");
}
