//! Dummy providers for local development and tests.
//!
//! None of these make network requests. Replies are deterministic so tests can assert on them.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream;
use tracing::debug;
use uuid::Uuid;

use super::{
    Capability, CallConfiguration, ChatMessage, ChatProvider, GenerationParams, PredictionRequest, ProviderCall, Result,
    TokenStream, VoiceProvider, WorkflowProvider,
};
use crate::config::{TelephonyConfig, VoiceDefaults};

/// Streams a fixed reply one word at a time.
pub struct DummyChatProvider {
    reply: String,
}

impl DummyChatProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl ChatProvider for DummyChatProvider {
    async fn stream_chat(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<TokenStream> {
        debug!(model = %params.model, messages = messages.len(), "Dummy chat completion");
        let tokens: Vec<Result<String>> = self.reply.split_inclusive(' ').map(|t| Ok(t.to_string())).collect();
        Ok(Box::pin(stream::iter(tokens)))
    }
}

/// Answers every prediction by echoing its inputs, and keeps a log of the requests it saw.
///
/// A general chat with a system prompt answers `"{prompt}: {question}"`, so chained calls nest
/// visibly.
#[derive(Default)]
pub struct DummyWorkflowProvider {
    calls: Mutex<Vec<(Capability, PredictionRequest)>>,
}

impl DummyWorkflowProvider {
    /// Requests received so far, oldest first
    pub fn calls(&self) -> Vec<(Capability, PredictionRequest)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl WorkflowProvider for DummyWorkflowProvider {
    async fn predict(&self, capability: Capability, request: PredictionRequest) -> Result<String> {
        let answer = match capability {
            Capability::GeneralChat => match &request.system_message_prompt {
                Some(prompt) if !prompt.is_empty() => format!("{prompt}: {}", request.question),
                _ => request.question.clone(),
            },
            Capability::DocumentQa => {
                let source = request.document.as_ref().map(|d| d.filename.as_str()).unwrap_or("document");
                format!("According to {source}: {}", request.question)
            }
            Capability::UrlQa => {
                let source = request.url.as_deref().unwrap_or("the page");
                format!("According to {source}: {}", request.question)
            }
            Capability::Antonym => format!("opposite of {}", request.question),
        };
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push((capability, request));
        Ok(answer)
    }
}

/// Accepts every call without dialing anyone.
#[derive(Default)]
pub struct DummyVoiceProvider {
    started: AtomicUsize,
}

impl DummyVoiceProvider {
    /// Number of calls started so far
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceProvider for DummyVoiceProvider {
    async fn register_phone_number(&self, telephony: &TelephonyConfig) -> Result<String> {
        debug!(number = %telephony.phone_number, "Dummy phone number registration");
        Ok("dummy-phone-number".to_string())
    }

    async fn start_call(&self, phone_number_id: &str, call: &CallConfiguration, _defaults: &VoiceDefaults) -> Result<ProviderCall> {
        debug!(%phone_number_id, assistant = %call.name, "Dummy call started");
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderCall {
            id: format!("dummy-call-{}", Uuid::new_v4()),
            status: Some("queued".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_dummy_chat_streams_words() {
        let provider = DummyChatProvider::new("one two three");
        let tokens: Vec<String> = provider
            .stream_chat(&[ChatMessage::user("hi")], &GenerationParams::default())
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["one ", "two ", "three"]);
    }

    #[tokio::test]
    async fn test_dummy_workflow_nests_prompts() {
        let provider = DummyWorkflowProvider::default();
        let first = provider
            .predict(
                Capability::GeneralChat,
                PredictionRequest {
                    system_message_prompt: Some("Translate to French".to_string()),
                    ..PredictionRequest::question("good morning")
                },
            )
            .await
            .unwrap();
        assert_eq!(first, "Translate to French: good morning");
        assert_eq!(provider.calls().len(), 1);
    }
}
