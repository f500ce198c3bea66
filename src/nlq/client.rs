//! Generative backend client
//!
//! [`CompletionBackend`] is the seam to the text-generation service.
//! [`HttpCompletionBackend`] speaks the OpenAI-compatible chat API (OpenAI,
//! DeepSeek) and Ollama. [`GenerativeClient`] adds the per-call timeout, the
//! retry policy and the prompt plumbing on top of any backend.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::prompt::SYSTEM_PROMPT;
use super::retry::RetryPolicy;
use super::BackendError;
use crate::config::{GenerationConfig, LLMProvider};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// One generation request, provider independent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// External text-generation service
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;
}

/// reqwest-based backend for OpenAI-compatible endpoints and Ollama
pub struct HttpCompletionBackend {
    client: Client,
    provider: LLMProvider,
    api_base_url: String,
    api_key: Option<String>,
}

impl HttpCompletionBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BackendError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            provider: config.provider,
            api_base_url: config.base_url(),
            api_key: config.api_key.clone(),
        })
    }

    async fn openai_chat(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: TokenUsage,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MessageContent,
        }

        #[derive(Deserialize)]
        struct MessageContent {
            #[serde(default)]
            content: Option<String>,
        }

        let api_key = self.api_key.as_ref().ok_or_else(|| {
            BackendError::AuthenticationError(format!("{:?} requires an API key", self.provider))
        })?;

        let url = format!("{}/chat/completions", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| BackendError::ResponseError(format!("undecodable body: {}", e)))?;

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::ResponseError("response has no choices".to_string()))?;

        Ok(Completion { text, usage: result.usage })
    }

    async fn ollama_chat(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            prompt: String,
            system: String,
            stream: bool,
            options: Options,
        }

        #[derive(Serialize)]
        struct Options {
            temperature: f32,
            num_predict: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            top_p: Option<f32>,
        }

        #[derive(Deserialize)]
        struct Response {
            response: String,
            #[serde(default)]
            prompt_eval_count: u32,
            #[serde(default)]
            eval_count: u32,
        }

        let join = |role: &str| {
            request
                .messages
                .iter()
                .filter(|m| m.role == role)
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let url = format!("{}/api/generate", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .json(&Request {
                model: &request.model,
                prompt: join("user"),
                system: join("system"),
                stream: false,
                options: Options {
                    temperature: request.temperature,
                    num_predict: request.max_tokens,
                    top_p: request.top_p,
                },
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| BackendError::ResponseError(format!("undecodable body: {}", e)))?;

        Ok(Completion {
            text: result.response,
            usage: TokenUsage {
                prompt_tokens: result.prompt_eval_count,
                completion_tokens: result.eval_count,
                total_tokens: result.prompt_eval_count + result.eval_count,
            },
        })
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        match self.provider {
            LLMProvider::OpenAI | LLMProvider::DeepSeek => self.openai_chat(request).await,
            LLMProvider::Ollama => self.ollama_chat(request).await,
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::TimeoutError(Duration::ZERO)
    } else {
        BackendError::ConnectionError(e.to_string())
    }
}

/// Error class by HTTP status
fn map_status(status: StatusCode, body: String) -> BackendError {
    let detail = if body.trim().is_empty() { status.to_string() } else { body };
    match status.as_u16() {
        401 | 403 => BackendError::AuthenticationError(detail),
        429 => BackendError::RateLimitError(detail),
        code if code >= 500 => BackendError::ServerError { status: code },
        code => BackendError::ResponseError(format!("HTTP {}: {}", code, detail)),
    }
}

/// Prompt in, raw completion text out, with timeout and retry
pub struct GenerativeClient {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    top_p: Option<f32>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
    system_prompt: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl GenerativeClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &GenerationConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
            timeout: config.timeout(),
            retry: config.retry_policy(),
        }
    }

    /// Client over the HTTP backend described by `config`
    pub fn from_config(config: &GenerationConfig) -> Result<Self, BackendError> {
        let backend = HttpCompletionBackend::new(config)?;
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, system: &str, user_prompt: &str, max_tokens: u32) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(user_prompt));

        CompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }

    async fn call_once(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.complete(request)).await {
            Ok(Ok(completion)) if completion.text.trim().is_empty() => {
                Err(BackendError::ResponseError("empty completion".to_string()))
            }
            Ok(Err(BackendError::TimeoutError(_))) => Err(BackendError::TimeoutError(self.timeout)),
            Ok(result) => result,
            Err(_) => Err(BackendError::TimeoutError(self.timeout)),
        }
    }

    /// Send the prompt and return the raw completion text
    pub async fn generate(&self, user_prompt: &str) -> Result<String, BackendError> {
        let request = self.build_request(&self.system_prompt, user_prompt, self.max_tokens);
        let start = Instant::now();
        debug!("Calling LLM model {}", self.model);

        let completion = self.retry.retry(|| self.call_once(&request)).await?;

        info!(
            "LLM call succeeded in {:?}, tokens: {}",
            start.elapsed(),
            completion.usage.total_tokens
        );
        Ok(completion.text)
    }

    /// Tiny request to check that the backend is reachable and authorised
    pub async fn health_check(&self) -> bool {
        let request = self.build_request("", "ping", 10);
        match self.call_once(&request).await {
            Ok(_) => true,
            Err(e) => {
                warn!("LLM health check failed: {}", e);
                false
            }
        }
    }
}
