//! Third-party provider abstraction layer
//!
//! The gateway talks to three kinds of provider:
//!
//! - [`ChatProvider`]: streaming chat completions (any OpenAI-compatible endpoint)
//! - [`WorkflowProvider`]: single-shot workflow predictions, used for knowledge queries and flow
//!   nodes. Each [`Capability`] maps to a configured workflow endpoint.
//! - [`VoiceProvider`]: outbound voice assistant calls
//!
//! Each has an HTTP implementation and a dummy used in development and tests. The `create_*`
//! functions are the single point where configuration becomes a provider instance.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::{
    ChatDefaults, ChatProviderConfig, TelephonyConfig, VoiceDefaults, VoiceProviderConfig, WorkflowProviderConfig,
};

pub mod dummy;
pub mod openai;
pub mod sse;
pub mod voice;
pub mod workflow;

/// Create the chat provider from configuration
pub fn create_chat_provider(config: &ChatProviderConfig) -> Result<Arc<dyn ChatProvider>> {
    Ok(match config {
        ChatProviderConfig::Openai {
            base_url,
            api_key,
            timeout,
        } => Arc::new(openai::OpenAiChatProvider::new(base_url.clone(), api_key.clone(), *timeout)?),
        ChatProviderConfig::Dummy { reply } => Arc::new(dummy::DummyChatProvider::new(reply.clone())),
    })
}

/// Create the workflow provider from configuration
pub fn create_workflow_provider(config: &WorkflowProviderConfig) -> Result<Arc<dyn WorkflowProvider>> {
    Ok(match config {
        WorkflowProviderConfig::Http {
            base_url,
            api_key,
            capabilities,
            timeout,
        } => Arc::new(workflow::HttpWorkflowProvider::new(
            base_url.clone(),
            api_key.clone(),
            capabilities.clone(),
            *timeout,
        )?),
        WorkflowProviderConfig::Dummy => Arc::new(dummy::DummyWorkflowProvider::default()),
    })
}

/// Create the voice provider from configuration
pub fn create_voice_provider(config: &VoiceProviderConfig) -> Result<Arc<dyn VoiceProvider>> {
    Ok(match config {
        VoiceProviderConfig::Http {
            base_url,
            private_key,
            timeout,
        } => Arc::new(voice::HttpVoiceProvider::new(base_url.clone(), private_key.clone(), *timeout)?),
        VoiceProviderConfig::Dummy => Arc::new(dummy::DummyVoiceProvider::default()),
    })
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur while talking to a provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider stream failed: {0}")]
    Stream(String),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("No workflow endpoint configured for {0}")]
    CapabilityUnavailable(Capability),
}

impl ProviderError {
    /// Whether a later attempt of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Stream(_) => true,
            ProviderError::InvalidResponse(_) | ProviderError::CapabilityUnavailable(_) => false,
        }
    }
}

/// Build the HTTP client shared by a provider's requests
pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    crate::install_crypto_provider();
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("relayctl/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Build the HTTP client for streamed responses. `timeout` bounds connecting and each read, not
/// the whole body, so long replies are not cut off.
pub(crate) fn streaming_http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    crate::install_crypto_provider();
    Ok(reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .user_agent(concat!("relayctl/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Turn a non-success response into [`ProviderError::Status`]
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters of a chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub max_tokens: u32,
    /// Replaces the generated system prompt when set
    pub system_prompt: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&ChatDefaults::default())
    }
}

impl From<&ChatDefaults> for GenerationParams {
    fn from(defaults: &ChatDefaults) -> Self {
        Self {
            model: defaults.model.clone(),
            temperature: defaults.temperature,
            top_p: defaults.top_p,
            presence_penalty: defaults.presence_penalty,
            frequency_penalty: defaults.frequency_penalty,
            max_tokens: defaults.max_tokens,
            system_prompt: None,
        }
    }
}

/// Streamed completion tokens
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Start a streaming completion. The returned stream ends after the last token; dropping it
    /// cancels the upstream request.
    async fn stream_chat(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<TokenStream>;
}

/// Named workflow capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Free-form chat with an optional system prompt override
    GeneralChat,
    /// Question answering over an uploaded document
    DocumentQa,
    /// Question answering over a web page
    UrlQa,
    /// Antonym lookup
    Antonym,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Capability::GeneralChat => "general_chat",
            Capability::DocumentQa => "document_qa",
            Capability::UrlQa => "url_qa",
            Capability::Antonym => "antonym",
        })
    }
}

/// An uploaded document passed through to the workflow
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Input of a single workflow prediction
#[derive(Debug, Clone, Default)]
pub struct PredictionRequest {
    pub question: String,
    pub system_message_prompt: Option<String>,
    pub document: Option<DocumentUpload>,
    pub url: Option<String>,
    pub chunk_size: Option<u32>,
    pub chunk_overlap: Option<u32>,
    pub top_k: Option<u32>,
}

impl PredictionRequest {
    pub fn question(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait WorkflowProvider: Send + Sync {
    /// Run one prediction against the workflow serving `capability` and return its text answer.
    async fn predict(&self, capability: Capability, request: PredictionRequest) -> Result<String>;
}

/// Voice assistant settings for one outbound call. Replaced wholesale on edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, bon::Builder)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CallConfiguration {
    /// Assistant display name
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub model_provider: String,
    #[builder(into)]
    pub model: String,
    #[serde(default)]
    #[builder(default)]
    pub temperature: f32,
    #[builder(into)]
    pub first_message: String,
    #[builder(into)]
    pub system_prompt: String,
    #[builder(into)]
    pub voice_id: String,
    #[serde(default)]
    #[builder(into)]
    pub language: Option<String>,
    /// Callee number in E.164 format
    #[builder(into)]
    pub destination_number: String,
    #[serde(default)]
    #[builder(into)]
    pub contact_name: Option<String>,
}

impl CallConfiguration {
    /// Check the fields the voice provider requires. Returns the first problem found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !is_e164(&self.destination_number) {
            return Err("destinationNumber must be an E.164 phone number, e.g. +14155550100".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model is required".to_string());
        }
        if self.voice_id.trim().is_empty() {
            return Err("voiceId is required".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err("temperature must be between 0 and 2".to_string());
        }
        Ok(())
    }
}

/// `+` followed by 8 to 15 digits
pub fn is_e164(number: &str) -> bool {
    number
        .strip_prefix('+')
        .is_some_and(|digits| (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()))
}

/// A call accepted by the voice provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub id: String,
    pub status: Option<String>,
}

#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Register the caller number with the provider, returning its phone number id.
    async fn register_phone_number(&self, telephony: &TelephonyConfig) -> Result<String>;

    /// Dial `call.destination_number` from a registered phone number.
    async fn start_call(
        &self,
        phone_number_id: &str,
        call: &CallConfiguration,
        defaults: &VoiceDefaults,
    ) -> Result<ProviderCall>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> CallConfiguration {
        CallConfiguration::builder()
            .name("Ava")
            .model_provider("openai")
            .model("gpt-3.5-turbo")
            .first_message("Hi, this is Ava.")
            .system_prompt("You are a friendly support trainer.")
            .voice_id("matilda")
            .destination_number("+14155550100")
            .build()
    }

    #[test]
    fn test_e164_numbers() {
        assert!(is_e164("+14155550100"));
        assert!(!is_e164("14155550100"));
        assert!(!is_e164("+1-415-555"));
        assert!(!is_e164("+123"));
    }

    #[test]
    fn test_call_configuration_validation() {
        assert!(call().validate().is_ok());

        let mut bad = call();
        bad.destination_number = "555-0100".to_string();
        assert!(bad.validate().unwrap_err().contains("destinationNumber"));

        let mut bad = call();
        bad.temperature = 3.0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_call_configuration_rejects_credentials_in_body() {
        let body = serde_json::json!({
            "name": "Ava",
            "modelProvider": "openai",
            "model": "gpt-3.5-turbo",
            "firstMessage": "Hi",
            "systemPrompt": "Be kind",
            "voiceId": "matilda",
            "destinationNumber": "+14155550100",
            "twilioAuthToken": "secret"
        });
        assert!(serde_json::from_value::<CallConfiguration>(body).is_err());
    }

    #[test]
    fn test_generation_params_use_original_defaults() {
        let params = GenerationParams::default();
        assert_eq!(params.model, "gpt-3.5-turbo");
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.top_p, 1.0);
        assert_eq!(params.presence_penalty, 0.9);
        assert_eq!(params.frequency_penalty, 0.9);
        assert_eq!(params.max_tokens, 2500);
    }

    #[test]
    fn test_retryable_statuses() {
        let status = |status| ProviderError::Status {
            status,
            body: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!ProviderError::CapabilityUnavailable(Capability::Antonym).is_retryable());
    }
}
