use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use kgqa::config::{GenerationConfig, LLMProvider};
use kgqa::nlq::client::{ChatMessage, CompletionBackend, CompletionRequest, GenerativeClient, HttpCompletionBackend};
use kgqa::nlq::retry::RetryPolicy;
use kgqa::nlq::BackendError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake backend saw
#[derive(Clone, Default)]
struct Seen {
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<Option<String>>>>,
}

impl Seen {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Route that fails with `failures[i]` on the i-th hit, then answers `ok_body`
fn scripted(path: &str, failures: Vec<StatusCode>, ok_body: Value, seen: Seen) -> Router {
    Router::new().route(
        path,
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let seen = seen.clone();
            let failures = failures.clone();
            let ok_body = ok_body.clone();
            async move {
                let hit = seen.hits.fetch_add(1, Ordering::SeqCst);
                seen.bodies.lock().unwrap().push(body);
                seen.auth.lock().unwrap().push(
                    headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.to_string()),
                );
                match failures.get(hit) {
                    Some(status) => (*status, Json(json!({"error": {"message": "scripted failure"}}))),
                    None => (StatusCode::OK, Json(ok_body)),
                }
            }
        }),
    )
}

fn chat_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
    })
}

fn openai_config(base: &str) -> GenerationConfig {
    GenerationConfig {
        provider: LLMProvider::OpenAI,
        model: "gpt-4o".to_string(),
        api_key: Some("test-key".to_string()),
        api_base_url: Some(format!("{}/", base)),
        ..GenerationConfig::default()
    }
}

fn request() -> CompletionRequest {
    CompletionRequest {
        model: "gpt-4o".to_string(),
        messages: vec![ChatMessage::system("be terse"), ChatMessage::user("list teams")],
        temperature: 0.1,
        max_tokens: 200,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        multiplier: 2.0,
        max_backoff: Duration::from_millis(40),
    }
}

#[tokio::test]
async fn test_openai_chat_completion() {
    let seen = Seen::default();
    let base = serve(scripted("/chat/completions", vec![], chat_body("MATCH (t:Team) RETURN t"), seen.clone())).await;

    let backend = HttpCompletionBackend::new(&openai_config(&base)).unwrap();
    let completion = backend.complete(&request()).await.unwrap();

    assert_eq!(completion.text, "MATCH (t:Team) RETURN t");
    assert_eq!(completion.usage.total_tokens, 150);

    let bodies = seen.bodies.lock().unwrap();
    assert_eq!(bodies[0]["model"], "gpt-4o");
    assert_eq!(bodies[0]["messages"][0]["role"], "system");
    assert_eq!(bodies[0]["messages"][1]["content"], "list teams");
    assert_eq!(bodies[0]["max_tokens"], 200);
    assert!(bodies[0].get("top_p").is_none());
    assert_eq!(seen.auth.lock().unwrap()[0].as_deref(), Some("Bearer test-key"));
}

#[tokio::test]
async fn test_status_mapping() {
    let cases = [
        StatusCode::UNAUTHORIZED,
        StatusCode::TOO_MANY_REQUESTS,
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::BAD_REQUEST,
    ];

    let mut errors = Vec::new();
    for status in cases {
        let base = serve(scripted("/chat/completions", vec![status], chat_body("unused"), Seen::default())).await;
        let backend = HttpCompletionBackend::new(&openai_config(&base)).unwrap();
        errors.push(backend.complete(&request()).await.unwrap_err());
    }

    assert!(matches!(errors[0], BackendError::AuthenticationError(_)));
    assert!(matches!(errors[1], BackendError::RateLimitError(_)));
    assert_eq!(errors[2], BackendError::ServerError { status: 500 });
    match &errors[3] {
        BackendError::ResponseError(msg) => assert!(msg.starts_with("HTTP 400")),
        other => panic!("unexpected error: {}", other),
    }
    assert!(errors[1].is_retryable());
    assert!(!errors[0].is_retryable());
    assert!(!errors[3].is_retryable());
}

#[tokio::test]
async fn test_missing_api_key_fails_before_request() {
    let seen = Seen::default();
    let base = serve(scripted("/chat/completions", vec![], chat_body("unused"), seen.clone())).await;

    let config = GenerationConfig { api_key: None, ..openai_config(&base) };
    let err = HttpCompletionBackend::new(&config).unwrap().complete(&request()).await.unwrap_err();

    assert!(matches!(err, BackendError::AuthenticationError(_)));
    assert_eq!(seen.hits(), 0);
}

#[tokio::test]
async fn test_client_retries_server_errors() {
    let seen = Seen::default();
    let failures = vec![StatusCode::SERVICE_UNAVAILABLE, StatusCode::BAD_GATEWAY];
    let base = serve(scripted("/chat/completions", failures, chat_body("MATCH (n) RETURN n"), seen.clone())).await;

    let client = GenerativeClient::from_config(&openai_config(&base)).unwrap().with_retry(fast_retry(3));
    let text = client.generate("anything").await.unwrap();

    assert_eq!(text, "MATCH (n) RETURN n");
    assert_eq!(seen.hits(), 3);
}

#[tokio::test]
async fn test_client_gives_up_after_budget() {
    let seen = Seen::default();
    let failures = vec![StatusCode::TOO_MANY_REQUESTS; 5];
    let base = serve(scripted("/chat/completions", failures, chat_body("unused"), seen.clone())).await;

    let client = GenerativeClient::from_config(&openai_config(&base)).unwrap().with_retry(fast_retry(2));
    let err = client.generate("anything").await.unwrap_err();

    assert!(matches!(err, BackendError::RateLimitError(_)));
    assert_eq!(seen.hits(), 2);
}

#[tokio::test]
async fn test_client_does_not_retry_auth_failure() {
    let seen = Seen::default();
    let base = serve(scripted("/chat/completions", vec![StatusCode::FORBIDDEN], chat_body("unused"), seen.clone())).await;

    let client = GenerativeClient::from_config(&openai_config(&base)).unwrap().with_retry(fast_retry(3));
    let err = client.generate("anything").await.unwrap_err();

    assert!(matches!(err, BackendError::AuthenticationError(_)));
    assert_eq!(seen.hits(), 1);
}

#[tokio::test]
async fn test_client_timeout() {
    let router = Router::new().route(
        "/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(chat_body("too late"))
        }),
    );
    let base = serve(router).await;

    let client = GenerativeClient::from_config(&openai_config(&base))
        .unwrap()
        .with_retry(RetryPolicy::none())
        .with_timeout(Duration::from_millis(100));
    let err = client.generate("anything").await.unwrap_err();

    assert_eq!(err, BackendError::TimeoutError(Duration::from_millis(100)));
}

#[tokio::test]
async fn test_ollama_generate() {
    let seen = Seen::default();
    let reply = json!({
        "model": "llama3",
        "response": "{\"cypher\": \"MATCH (c:Contest) RETURN c.name\"}",
        "done": true,
        "prompt_eval_count": 40,
        "eval_count": 12
    });
    let base = serve(scripted("/api/generate", vec![], reply, seen.clone())).await;

    let config = GenerationConfig {
        provider: LLMProvider::Ollama,
        model: "llama3".to_string(),
        api_key: None,
        api_base_url: Some(base),
        ..GenerationConfig::default()
    };
    let completion = HttpCompletionBackend::new(&config).unwrap().complete(&request()).await.unwrap();

    assert!(completion.text.contains("MATCH (c:Contest)"));
    assert_eq!(completion.usage.total_tokens, 52);

    let bodies = seen.bodies.lock().unwrap();
    assert_eq!(bodies[0]["stream"], false);
    assert_eq!(bodies[0]["system"], "be terse");
    assert_eq!(bodies[0]["prompt"], "list teams");
    assert_eq!(bodies[0]["options"]["num_predict"], 200);
    assert_eq!(seen.auth.lock().unwrap()[0], None);
}

#[tokio::test]
async fn test_health_check() {
    let base = serve(scripted("/chat/completions", vec![], chat_body("ok"), Seen::default())).await;
    let client = GenerativeClient::from_config(&openai_config(&base)).unwrap();
    assert!(client.health_check().await);

    let down = GenerativeClient::from_config(&openai_config("http://127.0.0.1:9"))
        .unwrap()
        .with_retry(RetryPolicy::none());
    assert!(!down.health_check().await);
}
