//! OpenAI-compatible chat-completions client.
//!
//! Credentials arrive with each generation request, so clients are built per
//! task through a [`ProviderFactory`] rather than once from the environment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Endpoint credentials supplied by the caller.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    /// Base URL or full chat-completions URL.
    pub api_url: String,
    pub api_key: String,
    #[serde(rename = "api_model")]
    pub model: String,
}

impl Credentials {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Checks that every field is present.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.api_url.trim().is_empty() {
            return Err(LlmError::InvalidConfig("api_url is required".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(LlmError::InvalidConfig("api_key is required".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(LlmError::InvalidConfig("api_model is required".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier; empty means the client's default.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    /// Convenience constructor for a single-choice response.
    pub fn from_text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::default(),
        }
    }

    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// Reason the generation stopped (e.g., "stop", "length").
    pub finish_reason: Option<String>,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Builds a provider for a set of credentials.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, credentials: &Credentials) -> Result<Arc<dyn LlmProvider>, LlmError>;
}

/// Factory producing [`OpenAiCompatClient`]s with a fixed request timeout.
#[derive(Debug, Clone)]
pub struct HttpProviderFactory {
    timeout: Duration,
}

impl HttpProviderFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, credentials: &Credentials) -> Result<Arc<dyn LlmProvider>, LlmError> {
        Ok(Arc::new(OpenAiCompatClient::new(credentials, self.timeout)?))
    }
}

/// Returns the chat-completions URL for a base or full endpoint URL.
pub fn completions_endpoint(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{}/chat/completions", trimmed)
    }
}

/// Client for OpenAI-compatible chat-completions APIs.
pub struct OpenAiCompatClient {
    endpoint: String,
    api_key: String,
    default_model: String,
    timeout: Duration,
    http_client: Client,
}

impl OpenAiCompatClient {
    /// Create a client for the given credentials.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidConfig` when credentials are incomplete or
    /// the HTTP client cannot be built.
    pub fn new(credentials: &Credentials, timeout: Duration) -> Result<Self, LlmError> {
        credentials.validate()?;
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: completions_endpoint(&credentials.api_url),
            api_key: credentials.api_key.clone(),
            default_model: credentials.model.clone(),
            timeout,
            http_client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

impl fmt::Debug for OpenAiCompatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatClient")
            .field("endpoint", &self.endpoint)
            .field("default_model", &self.default_model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Internal request structure for the OpenAI-compatible API.
#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Internal response structure from the OpenAI-compatible API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for OpenAiCompatClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let http_response = self
            .http_client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::RequestFailed(e.to_string())
                }
            })?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }

            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choices = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role.unwrap_or_else(|| "assistant".to_string()),
                    content: choice.message.content.unwrap_or_default(),
                },
                finish_reason: choice.finish_reason,
            })
            .collect();

        Ok(GenerationResponse {
            model: api_response.model,
            choices,
            usage: api_response.usage.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(url: &str) -> Credentials {
        Credentials::new(url, "sk-test", "gpt-4o-mini")
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("s").role, "system");
        assert_eq!(Message::user("u").role, "user");
        let assistant = Message::assistant("Hi there!");
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.content, "Hi there!");
    }

    #[test]
    fn test_generation_request_builder() {
        let request = GenerationRequest::new("gpt-4", vec![Message::user("test")])
            .with_temperature(0.2)
            .with_max_tokens(1000);

        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(1000));
    }

    #[test]
    fn test_first_content() {
        let response = GenerationResponse::from_text("m", "Hello!");
        assert_eq!(response.first_content(), Some("Hello!"));

        let empty = GenerationResponse {
            model: "m".into(),
            choices: vec![],
            usage: Usage::default(),
        };
        assert_eq!(empty.first_content(), None);
    }

    #[test]
    fn test_completions_endpoint() {
        assert_eq!(
            completions_endpoint("https://api.example.com/v1"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let rendered = format!("{:?}", creds("http://x"));
        assert!(!rendered.contains("sk-test"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_credentials_validation() {
        assert!(creds("http://x").validate().is_ok());
        let err = Credentials::new("http://x", "", "m").validate().unwrap_err();
        assert!(err.to_string().contains("api_key"));
        assert!(OpenAiCompatClient::new(&Credentials::new("", "k", "m"), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_credentials_wire_names() {
        let parsed: Credentials = serde_json::from_str(
            r#"{"api_url":"http://x","api_key":"k","api_model":"m"}"#,
        )
        .unwrap();
        assert_eq!(parsed.model, "m");
    }

    #[tokio::test]
    async fn test_connection_error_is_transient() {
        let client = OpenAiCompatClient::new(&creds("http://127.0.0.1:65535"), Duration::from_secs(5)).unwrap();
        let request = GenerationRequest::new("", vec![Message::user("hi")]);
        let err = client.generate(request).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {:?}", err);
    }
}
