use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub const OLLAMA_DEFAULT_MODEL: &str = "llama3.2:3b";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";

/// Responses shorter than this (after trimming) are treated as garbage.
pub const MIN_RESPONSE_CHARS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference backend unavailable: {0}")]
    Unavailable(String),

    #[error("inference backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("empty or implausibly short response ({0} chars)")]
    ImplausibleResponse(usize),

    #[error("inference backend misconfigured: {0}")]
    Misconfigured(String),
}

impl InferenceError {
    /// Misconfiguration fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, InferenceError::Misconfigured(_))
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        InferenceError::Unavailable(e.to_string())
    }
}

/// A text-generation service: prompt in, text out.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, InferenceError>;
}

/// Trim and reject empty or near-empty output.
pub fn plausible(text: &str) -> Result<String, InferenceError> {
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    if len < MIN_RESPONSE_CHARS {
        return Err(InferenceError::ImplausibleResponse(len));
    }
    Ok(trimmed.to_string())
}

async fn with_timeout<F>(timeout: Duration, fut: F) -> Result<String, InferenceError>
where
    F: std::future::Future<Output = Result<String, InferenceError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| InferenceError::Timeout(timeout))?
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InferenceError::Http {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

/// Local Ollama server, `POST {base}/api/generate` without streaming.
pub struct OllamaBackend {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    async fn call(&self, prompt: &str) -> Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %self.model, "Ollama generate request");

        let response = self
            .http
            .post(&url)
            .json(&OllamaRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let body: OllamaResponse = error_for_status(response).await?.json().await?;
        plausible(&body.response)
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, InferenceError> {
        with_timeout(timeout, self.call(prompt)).await
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Any hosted service speaking the OpenAI chat-completions dialect.
pub struct OpenAiCompatibleBackend {
    name: String,
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(name: &str, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self::new("openai", OPENAI_API_URL, api_key, model)
    }

    pub fn groq(api_key: &str, model: &str) -> Self {
        Self::new("groq", GROQ_API_URL, api_key, model)
    }

    fn headers(&self) -> Result<HeaderMap, InferenceError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| InferenceError::Misconfigured(format!("invalid API key: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn call(&self, prompt: &str) -> Result<String, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(backend = %self.name, model = %self.model, "Chat completion request");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        let body: ChatResponse = error_for_status(response).await?.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        plausible(&text)
    }
}

#[async_trait]
impl InferenceBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, InferenceError> {
        with_timeout(timeout, self.call(prompt)).await
    }
}

/// Stands in for a backend that could not be built. Every call fails.
pub struct MisconfiguredBackend {
    reason: String,
}

impl MisconfiguredBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl InferenceBackend for MisconfiguredBackend {
    fn name(&self) -> &str {
        "misconfigured"
    }

    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, InferenceError> {
        Err(InferenceError::Misconfigured(self.reason.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// `ollama`, `openai` or `groq`.
    pub provider: String,
    /// Empty means the provider's default model.
    pub model: Option<String>,
    pub ollama_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: None,
            ollama_url: "http://localhost:11434".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl LlmConfig {
    fn model_or(&self, default: &str) -> String {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(default)
            .to_string()
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// Pick the backend once, at startup.
pub fn build_backend(config: &LlmConfig) -> Arc<dyn InferenceBackend> {
    let provider = config.provider.trim().to_lowercase();

    let backend: Arc<dyn InferenceBackend> = match provider.as_str() {
        "ollama" => Arc::new(OllamaBackend::new(
            &config.ollama_url,
            &config.model_or(OLLAMA_DEFAULT_MODEL),
        )),
        "openai" | "groq" => match config.api_key() {
            Some(key) if provider == "openai" => Arc::new(OpenAiCompatibleBackend::openai(
                key,
                &config.model_or(OPENAI_DEFAULT_MODEL),
            )),
            Some(key) => Arc::new(OpenAiCompatibleBackend::groq(
                key,
                &config.model_or(GROQ_DEFAULT_MODEL),
            )),
            None => {
                error!("LLM provider '{}' requires an API key", provider);
                Arc::new(MisconfiguredBackend::new(format!(
                    "no API key for provider '{}'",
                    provider
                )))
            }
        },
        other => {
            error!("Unknown LLM provider: '{}'", other);
            Arc::new(MisconfiguredBackend::new(format!(
                "unknown LLM provider '{}'",
                other
            )))
        }
    };

    info!("Using inference backend: {}", backend.name());
    backend
}
