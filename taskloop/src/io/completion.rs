//! Completion service abstraction.
//!
//! The [`CompletionService`] trait decouples the agent loop from the hosted
//! model. Production uses [`HttpCompletionService`] (OpenAI-compatible chat
//! completions); tests use scripted services that replay canned responses.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{CompletionConfig, Endpoint};

/// Longest delay between two retries.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Temperature profile for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Planning and control decisions.
    Deterministic,
    /// Task execution and reflection.
    Creative,
}

impl CompletionConfig {
    pub fn temperature(&self, profile: Profile) -> f32 {
        match profile {
            Profile::Deterministic => self.planning_temperature,
            Profile::Creative => self.execution_temperature,
        }
    }
}

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Which component issued the call (for logs).
    pub label: &'static str,
    pub system_prompt: String,
    pub conversation: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Failures at the completion boundary. Fatal to the session once retries
/// are spent.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("missing credential for provider {provider}: set {env_var}")]
    MissingCredential { provider: String, env_var: String },

    #[error("provider {provider} is not fully configured: missing {setting}")]
    MissingEndpoint { provider: String, setting: String },

    #[error("authentication failed (status {status})")]
    Auth { status: u16 },

    #[error("rate limited by completion service")]
    RateLimited,

    #[error("completion service returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

impl CompletionError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Abstraction over completion backends.
pub trait CompletionService {
    /// Return the completion text for `request`.
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

impl<T: CompletionService + ?Sized> CompletionService for &T {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

impl From<&CompletionConfig> for RetryPolicy {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Completion service backed by an OpenAI-compatible `/chat/completions` API.
pub struct HttpCompletionService {
    client: Client,
    endpoint: Endpoint,
    retry: RetryPolicy,
}

impl HttpCompletionService {
    pub fn new(endpoint: Endpoint, config: &CompletionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint,
            retry: RetryPolicy::from(config),
        })
    }

    fn send_once(&self, body: &ApiRequest<'_>) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(body)
            .send()
            .map_err(|err| CompletionError::Network(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CompletionError::Auth {
                status: status.as_u16(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: ApiResponse = response
            .json()
            .map_err(|err| CompletionError::MalformedResponse(err.to_string()))?;
        extract_content(payload)
    }
}

impl CompletionService for HttpCompletionService {
    #[instrument(skip_all, fields(label = request.label, model = %self.endpoint.model, temperature = request.temperature))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ApiRequest::new(&self.endpoint.model, request);
        let mut attempt = 0u32;
        loop {
            match self.send_once(&body) {
                Ok(content) => {
                    debug!(bytes = content.len(), attempt, "completion received");
                    return Ok(content);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "completion failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    info!(error = %err, attempt, "completion failed");
                    return Err(anyhow::Error::new(err))
                        .with_context(|| format!("{} completion", request.label));
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: Role,
    content: &'a str,
}

impl<'a> ApiRequest<'a> {
    fn new(model: &'a str, request: &'a CompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(request.conversation.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(ApiMessage {
                role: Role::System,
                content: &request.system_prompt,
            });
        }
        messages.extend(request.conversation.iter().map(|message| ApiMessage {
            role: message.role,
            content: &message.content,
        }));
        Self {
            model,
            messages,
            temperature: request.temperature,
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

fn extract_content(payload: ApiResponse) -> Result<String, CompletionError> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| CompletionError::MalformedResponse("no message content in response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            label: "planner",
            system_prompt: "system rules".to_string(),
            conversation: vec![ChatMessage::user("objective")],
            temperature: 0.0,
        }
    }

    #[test]
    fn api_request_puts_system_prompt_first() {
        let request = request();
        let body = serde_json::to_value(ApiRequest::new("model-x", &request)).expect("encode");
        assert_eq!(body["model"], "model-x");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "system rules");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "objective");
    }

    #[test]
    fn extract_content_takes_first_choice() {
        let payload: ApiResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hi"}},{"message":{"content":"no"}}]}"#,
        )
        .expect("decode");
        assert_eq!(extract_content(payload).expect("content"), "hi");

        let empty: ApiResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("decode");
        assert!(matches!(
            extract_content(empty),
            Err(CompletionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn only_transient_errors_are_retried() {
        assert!(CompletionError::RateLimited.is_retryable());
        assert!(CompletionError::Network("reset".into()).is_retryable());
        assert!(
            CompletionError::Api {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !CompletionError::Api {
                status: 400,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!CompletionError::Auth { status: 401 }.is_retryable());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(12), MAX_BACKOFF);
        assert_eq!(policy.delay_for(40), MAX_BACKOFF);
    }

    #[test]
    fn temperature_follows_profile() {
        let config = CompletionConfig::default();
        assert_eq!(config.temperature(Profile::Deterministic), 0.0);
        assert_eq!(config.temperature(Profile::Creative), 0.3);
    }
}
