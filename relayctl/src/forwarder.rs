//! Forwarding of admitted requests to the configured providers.
//!
//! The [`ProxyForwarder`] owns the provider clients and everything they need that must never come
//! from the browser: API keys, telephony credentials, workflow endpoint ids. It validates inputs
//! before any network call, maps provider failures onto [`Error::Upstream`] without leaking the
//! provider's text, and writes best-effort call history after successful calls.
//!
//! Rate limiting is not done here. Callers validate, then check the limiter, then forward.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{ChatDefaults, Config, KnowledgeConfig, TelephonyConfig, VoiceDefaults};
use crate::db::Database;
use crate::db::handlers::CallHistory;
use crate::db::models::call_history::CallHistoryCreateDBRequest;
use crate::errors::{Error, Result};
use crate::providers::{
    CallConfiguration, Capability, ChatMessage, ChatProvider, DocumentUpload, GenerationParams, MessageRole,
    PredictionRequest, ProviderError, VoiceProvider, WorkflowProvider,
};
use crate::session::call::{CallEvent, CallHandle, CallRegistry};
use crate::types::{Feature, UserId};

/// Completion tokens, with provider failures already mapped to [`Error::Upstream`]
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The user on whose behalf a request is forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub username: String,
}

impl Caller {
    pub fn new(user_id: Option<String>, username: Option<String>) -> Result<Self> {
        let user_id = user_id.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        let username = username.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        match (user_id, username) {
            (Some(user_id), Some(username)) => Ok(Self { user_id, username }),
            (None, _) => Err(Error::BadRequest {
                message: "userId is required".to_string(),
            }),
            (_, None) => Err(Error::BadRequest {
                message: "username is required".to_string(),
            }),
        }
    }
}

/// Where a knowledge query looks for its answer
#[derive(Debug, Clone)]
pub enum KnowledgeSource {
    Document(DocumentUpload),
    Url(Url),
}

/// A validated knowledge query
#[derive(Debug, Clone)]
pub struct KnowledgeQuery {
    pub question: String,
    pub source: KnowledgeSource,
    pub chunk_size: u32,
    pub chunk_overlap: u32,
    pub top_k: u32,
}

/// Unvalidated knowledge query input, as received from a form or JSON body
#[derive(Debug, Clone, Default)]
pub struct KnowledgeQueryInput {
    pub question: Option<String>,
    pub document: Option<DocumentUpload>,
    pub url: Option<String>,
    pub chunk_size: Option<u32>,
    pub chunk_overlap: Option<u32>,
    pub top_k: Option<u32>,
}

#[derive(Clone)]
pub struct ProxyForwarder {
    chat: Arc<dyn ChatProvider>,
    workflow: Arc<dyn WorkflowProvider>,
    voice: Arc<dyn VoiceProvider>,
    db: Database,
    calls: CallRegistry,
    chat_defaults: ChatDefaults,
    voice_defaults: VoiceDefaults,
    knowledge: KnowledgeConfig,
    telephony: Option<TelephonyConfig>,
}

impl std::fmt::Debug for ProxyForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyForwarder")
            .field("chat_defaults", &self.chat_defaults)
            .field("knowledge", &self.knowledge)
            .field("telephony", &self.telephony)
            .finish_non_exhaustive()
    }
}

/// Map a provider failure to the error surfaced to users. The provider's own text is logged, not
/// returned.
pub fn upstream_error(feature: Feature, err: ProviderError) -> Error {
    let retryable = err.is_retryable();
    upstream_failure(feature, err, retryable)
}

fn upstream_failure(feature: Feature, err: ProviderError, retryable: bool) -> Error {
    warn!(%feature, retryable, error = %err, "Provider request failed");
    metrics::counter!("relayctl_upstream_failures_total", "feature" => feature.as_str()).increment(1);
    Error::Upstream {
        feature,
        message: err.to_string(),
        retryable,
    }
}

/// Default system prompt: the current time and the active generation parameters
pub fn default_system_prompt(params: &GenerationParams, now: DateTime<Utc>) -> String {
    format!(
        "You are an AI assistant. Current time: {}. You are operating with a temperature of {}, topP of {}, \
         presence penalty of {}, frequency penalty of {}, and max tokens of {}.",
        now.to_rfc3339(),
        params.temperature,
        params.top_p,
        params.presence_penalty,
        params.frequency_penalty,
        params.max_tokens
    )
}

/// Content type of an upload, inferred from the file extension when the client sent a generic one
pub fn resolve_content_type(filename: &str, declared: Option<&str>) -> String {
    let declared = declared
        .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    if let Some(declared) = declared {
        return declared;
    }

    let extension = filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") | Some("markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
    .to_string()
}

impl ProxyForwarder {
    pub fn new(
        config: &Config,
        db: Database,
        chat: Arc<dyn ChatProvider>,
        workflow: Arc<dyn WorkflowProvider>,
        voice: Arc<dyn VoiceProvider>,
    ) -> Self {
        Self {
            chat,
            workflow,
            voice,
            db,
            calls: CallRegistry::default(),
            chat_defaults: config.chat_defaults.clone(),
            voice_defaults: config.voice_defaults.clone(),
            knowledge: config.knowledge.clone(),
            telephony: config.telephony.clone(),
        }
    }

    pub fn chat_defaults(&self) -> &ChatDefaults {
        &self.chat_defaults
    }

    pub fn calls(&self) -> &CallRegistry {
        &self.calls
    }

    /// Stream a chat completion.
    ///
    /// Adds a system message unless the conversation already starts with one: the caller's
    /// `system_prompt` if set, otherwise [`default_system_prompt`]. A failure before the first
    /// token is returned directly; a failure mid-stream arrives as the last stream item.
    #[instrument(skip(self, messages, params), fields(model = %params.model, messages = messages.len()), err)]
    pub async fn forward_chat(&self, mut messages: Vec<ChatMessage>, params: &GenerationParams) -> Result<ChatStream> {
        if !messages.iter().any(|m| m.role == MessageRole::User) {
            return Err(Error::BadRequest {
                message: "at least one user message is required".to_string(),
            });
        }

        if messages.first().is_none_or(|m| m.role != MessageRole::System) {
            let prompt = params
                .system_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| default_system_prompt(params, Utc::now()));
            messages.insert(0, ChatMessage::system(prompt));
        }

        let tokens = self
            .chat
            .stream_chat(&messages, params)
            .await
            .map_err(|e| upstream_error(Feature::Chat, e))?;
        record_forward(Feature::Chat);

        Ok(Box::pin(tokens.map(|token| token.map_err(|e| upstream_error(Feature::Chat, e)))))
    }

    /// Check a knowledge query without touching the network.
    pub fn validate_knowledge_query(&self, input: KnowledgeQueryInput) -> Result<KnowledgeQuery> {
        let question = input
            .question
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::BadRequest {
                message: "question is required".to_string(),
            })?;

        let url = input.url.filter(|u| !u.trim().is_empty());
        let source = match (input.document, url) {
            (Some(_), Some(_)) => {
                return Err(Error::BadRequest {
                    message: "Provide either a document or a URL, not both".to_string(),
                });
            }
            (None, None) => {
                return Err(Error::BadRequest {
                    message: "A document or a URL is required".to_string(),
                });
            }
            (Some(document), None) => {
                if document.bytes.is_empty() {
                    return Err(Error::BadRequest {
                        message: "The uploaded document is empty".to_string(),
                    });
                }
                if !self.knowledge.accepted_content_types.contains(&document.content_type) {
                    return Err(Error::BadRequest {
                        message: format!("Unsupported document type '{}'", document.content_type),
                    });
                }
                KnowledgeSource::Document(document)
            }
            (None, Some(url)) => {
                let parsed = Url::parse(url.trim()).map_err(|_| Error::BadRequest {
                    message: "url must be a valid http or https URL".to_string(),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(Error::BadRequest {
                        message: "url must be a valid http or https URL".to_string(),
                    });
                }
                KnowledgeSource::Url(parsed)
            }
        };

        let chunk_size = input.chunk_size.unwrap_or(self.knowledge.chunk_size);
        let chunk_overlap = input.chunk_overlap.unwrap_or(self.knowledge.chunk_overlap);
        let top_k = input.top_k.unwrap_or(self.knowledge.top_k);
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(Error::BadRequest {
                message: "chunkOverlap must be smaller than a non-zero chunkSize".to_string(),
            });
        }
        if top_k == 0 {
            return Err(Error::BadRequest {
                message: "topK must be at least 1".to_string(),
            });
        }

        Ok(KnowledgeQuery {
            question,
            source,
            chunk_size,
            chunk_overlap,
            top_k,
        })
    }

    /// Answer a question from a document or web page. Every provider failure is reported as
    /// retryable; the gateway itself never retries.
    #[instrument(skip(self, caller, query), fields(user_id = %caller.user_id), err)]
    pub async fn forward_knowledge_query(&self, caller: &Caller, query: KnowledgeQuery) -> Result<String> {
        let (capability, request, source) = match query.source {
            KnowledgeSource::Document(document) => {
                let source = document.filename.clone();
                (
                    Capability::DocumentQa,
                    PredictionRequest {
                        document: Some(document),
                        chunk_size: Some(query.chunk_size),
                        chunk_overlap: Some(query.chunk_overlap),
                        top_k: Some(query.top_k),
                        ..PredictionRequest::question(query.question.clone())
                    },
                    source,
                )
            }
            KnowledgeSource::Url(url) => (
                Capability::UrlQa,
                PredictionRequest {
                    url: Some(url.to_string()),
                    ..PredictionRequest::question(query.question.clone())
                },
                url.to_string(),
            ),
        };

        let answer = self
            .workflow
            .predict(capability, request)
            .await
            .map_err(|e| upstream_failure(Feature::KnowledgeQuery, e, true))?;
        record_forward(Feature::KnowledgeQuery);

        self.record_history(CallHistoryCreateDBRequest {
            user_id: caller.user_id.clone(),
            username: caller.username.clone(),
            feature: Feature::KnowledgeQuery.as_str().to_string(),
            provider_reference: None,
            destination: None,
            detail: json!({
                "capability": capability,
                "source": source,
                "question": query.question,
            }),
        })
        .await;

        Ok(answer)
    }

    /// Single-shot workflow call on behalf of a flow node
    #[instrument(skip(self, request), fields(capability = %capability), err)]
    pub async fn forward_prediction(&self, capability: Capability, request: PredictionRequest) -> Result<String> {
        let answer = self
            .workflow
            .predict(capability, request)
            .await
            .map_err(|e| upstream_error(Feature::FlowChat, e))?;
        record_forward(Feature::FlowChat);
        Ok(answer)
    }

    /// Check a call request against the server-side telephony settings.
    pub fn validate_voice_call(&self, call: &CallConfiguration) -> Result<()> {
        call.validate().map_err(|message| Error::BadRequest { message })?;
        if self.telephony.is_none() {
            return Err(Error::Upstream {
                feature: Feature::VoiceCall,
                message: "telephony is not configured".to_string(),
                retryable: false,
            });
        }
        Ok(())
    }

    /// Place an outbound call: register the caller number, then dial.
    ///
    /// The call is tracked in the [`CallRegistry`] from the start; it moves to `dialing` once the
    /// provider accepts it and straight to `ended` if the provider refuses.
    #[instrument(skip(self, caller, call), fields(user_id = %caller.user_id), err)]
    pub async fn forward_voice_call_start(&self, caller: &Caller, call: CallConfiguration) -> Result<CallHandle> {
        self.validate_voice_call(&call)?;
        let telephony = self.telephony.as_ref().ok_or_else(|| Error::Upstream {
            feature: Feature::VoiceCall,
            message: "telephony is not configured".to_string(),
            retryable: false,
        })?;

        let handle = CallHandle::new(Uuid::new_v4(), caller.user_id.clone(), call.destination_number.clone());
        let call_id = handle.id;
        self.calls.insert(handle);

        let placed = async {
            let phone_number_id = self.voice.register_phone_number(telephony).await?;
            let started = self.voice.start_call(&phone_number_id, &call, &self.voice_defaults).await?;
            Ok::<_, ProviderError>((phone_number_id, started))
        }
        .await;

        let (phone_number_id, started) = match placed {
            Ok(placed) => placed,
            Err(e) => {
                let _ = self.calls.apply(
                    call_id,
                    CallEvent::Ended {
                        reason: Some("provider-error".to_string()),
                    },
                );
                return Err(upstream_error(Feature::VoiceCall, e));
            }
        };
        record_forward(Feature::VoiceCall);

        self.calls.set_provider_call_id(call_id, started.id.clone());
        let handle = match self.calls.apply(call_id, CallEvent::Dialing) {
            Some(Ok(handle)) => handle,
            _ => self.calls.get(call_id).ok_or_else(|| Error::Internal {
                operation: "track started call".to_string(),
            })?,
        };
        info!(call_id = %call_id, provider_call_id = %started.id, "Voice call started");

        self.record_history(CallHistoryCreateDBRequest {
            user_id: caller.user_id.clone(),
            username: caller.username.clone(),
            feature: Feature::VoiceCall.as_str().to_string(),
            provider_reference: Some(started.id.clone()),
            destination: Some(call.destination_number.clone()),
            detail: json!({
                "callId": call_id,
                "phoneNumberId": phone_number_id,
                "status": started.status,
                "assistant": call.name,
                "model": call.model,
                "voiceId": call.voice_id,
            }),
        })
        .await;

        Ok(handle)
    }

    /// Best-effort history write; failures are logged only.
    async fn record_history(&self, request: CallHistoryCreateDBRequest) {
        if let Err(e) = CallHistory::new(&self.db).create(&request).await {
            warn!(error = %e, feature = %request.feature, "Failed to record call history");
        }
    }
}

fn record_forward(feature: Feature) {
    metrics::counter!("relayctl_forwarded_requests_total", "feature" => feature.as_str()).increment(1);
}

/// Wrap raw upload bytes with their resolved content type
pub fn document_upload(filename: Option<String>, declared_content_type: Option<&str>, bytes: Bytes) -> DocumentUpload {
    let filename = filename.filter(|f| !f.is_empty()).unwrap_or_else(|| "document".to_string());
    DocumentUpload {
        content_type: resolve_content_type(&filename, declared_content_type),
        filename,
        bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::CallHistory;
    use crate::providers::dummy::{DummyChatProvider, DummyVoiceProvider, DummyWorkflowProvider};
    use crate::providers::{ProviderCall, TokenStream};
    use crate::session::call::CallState;
    use crate::test_utils::create_test_config;
    use async_trait::async_trait;
    use futures::stream;
    use secrecy::SecretString;

    struct FailingChat;

    #[async_trait]
    impl ChatProvider for FailingChat {
        async fn stream_chat(&self, _: &[ChatMessage], _: &GenerationParams) -> crate::providers::Result<TokenStream> {
            Ok(Box::pin(stream::iter(vec![
                Ok("partial".to_string()),
                Err(ProviderError::Stream("connection reset".to_string())),
            ])))
        }
    }

    struct RejectingWorkflow;

    #[async_trait]
    impl WorkflowProvider for RejectingWorkflow {
        async fn predict(&self, _: Capability, _: PredictionRequest) -> crate::providers::Result<String> {
            Err(ProviderError::Status {
                status: 400,
                body: "unreadable document".to_string(),
            })
        }
    }

    struct RefusingVoice;

    #[async_trait]
    impl VoiceProvider for RefusingVoice {
        async fn register_phone_number(&self, _: &TelephonyConfig) -> crate::providers::Result<String> {
            Ok("pn_1".to_string())
        }

        async fn start_call(&self, _: &str, _: &CallConfiguration, _: &VoiceDefaults) -> crate::providers::Result<ProviderCall> {
            Err(ProviderError::Status {
                status: 400,
                body: "invalid number".to_string(),
            })
        }
    }

    fn telephony() -> TelephonyConfig {
        TelephonyConfig {
            account_sid: "AC123".to_string(),
            auth_token: SecretString::from("token"),
            phone_number: "+14155550199".to_string(),
            name: "relayctl".to_string(),
        }
    }

    fn forwarder_with(chat: Arc<dyn ChatProvider>, voice: Arc<dyn VoiceProvider>) -> (ProxyForwarder, Database) {
        let mut config = create_test_config();
        config.telephony = Some(telephony());
        let db = Database::in_memory();
        let forwarder = ProxyForwarder::new(&config, db.clone(), chat, Arc::new(DummyWorkflowProvider::default()), voice);
        (forwarder, db)
    }

    fn forwarder() -> (ProxyForwarder, Database) {
        forwarder_with(
            Arc::new(DummyChatProvider::new("Hello there")),
            Arc::new(DummyVoiceProvider::default()),
        )
    }

    fn caller() -> Caller {
        Caller::new(Some("user_1".to_string()), Some("ada".to_string())).unwrap()
    }

    fn call() -> CallConfiguration {
        CallConfiguration::builder()
            .name("Ava")
            .model_provider("openai")
            .model("gpt-3.5-turbo")
            .first_message("Hi")
            .system_prompt("Be helpful")
            .voice_id("matilda")
            .destination_number("+14155550100")
            .build()
    }

    fn text_document(bytes: &'static [u8]) -> DocumentUpload {
        document_upload(Some("notes.txt".to_string()), None, Bytes::from_static(bytes))
    }

    #[test]
    fn test_caller_requires_both_ids() {
        assert!(Caller::new(Some("u".to_string()), Some("ada".to_string())).is_ok());
        assert!(matches!(Caller::new(None, Some("ada".to_string())), Err(Error::BadRequest { .. })));
        assert!(matches!(Caller::new(Some("u".to_string()), Some("  ".to_string())), Err(Error::BadRequest { .. })));
    }

    #[test]
    fn test_default_system_prompt_mentions_parameters() {
        let now = Utc::now();
        let prompt = default_system_prompt(&GenerationParams::default(), now);
        assert!(prompt.contains(&now.to_rfc3339()));
        assert!(prompt.contains("temperature of 0"));
        assert!(prompt.contains("max tokens of 2500"));
    }

    #[test]
    fn test_content_type_resolution() {
        assert_eq!(resolve_content_type("a.PDF", None), "application/pdf");
        assert_eq!(resolve_content_type("a.md", Some("application/octet-stream")), "text/markdown");
        assert_eq!(resolve_content_type("a.bin", Some("text/csv; charset=utf-8")), "text/csv");
        assert_eq!(resolve_content_type("archive.zip", None), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_forward_chat_streams_tokens() {
        let (forwarder, _) = forwarder();
        let tokens: Vec<String> = forwarder
            .forward_chat(vec![ChatMessage::user("hi")], &GenerationParams::default())
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens.concat(), "Hello there");
    }

    #[tokio::test]
    async fn test_forward_chat_requires_user_message() {
        let (forwarder, _) = forwarder();
        let err = match forwarder.forward_chat(vec![], &GenerationParams::default()).await {
            Err(e) => e,
            Ok(_) => panic!("expected validation error"),
        };
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_terminal_upstream_error() {
        let (forwarder, _) = forwarder_with(Arc::new(FailingChat), Arc::new(DummyVoiceProvider::default()));
        let items: Vec<Result<String>> = forwarder
            .forward_chat(vec![ChatMessage::user("hi")], &GenerationParams::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        match &items[1] {
            Err(err @ Error::Upstream { feature, .. }) => {
                assert_eq!(*feature, Feature::Chat);
                assert!(!err.user_message().contains("connection reset"));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn test_knowledge_query_needs_exactly_one_source() {
        let (forwarder, _) = forwarder();
        let question = Some("What is in it?".to_string());

        let none = forwarder.validate_knowledge_query(KnowledgeQueryInput {
            question: question.clone(),
            ..Default::default()
        });
        assert!(matches!(none, Err(Error::BadRequest { .. })));

        let both = forwarder.validate_knowledge_query(KnowledgeQueryInput {
            question: question.clone(),
            document: Some(text_document(b"content")),
            url: Some("https://example.com".to_string()),
            ..Default::default()
        });
        assert!(matches!(both, Err(Error::BadRequest { .. })));

        let url = forwarder
            .validate_knowledge_query(KnowledgeQueryInput {
                question,
                url: Some("https://example.com/page".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(url.source, KnowledgeSource::Url(_)));
        assert_eq!(url.chunk_size, 4000);
    }

    #[test]
    fn test_knowledge_query_rejects_bad_documents_and_urls() {
        let (forwarder, _) = forwarder();
        let question = Some("q".to_string());

        let empty = forwarder.validate_knowledge_query(KnowledgeQueryInput {
            question: question.clone(),
            document: Some(text_document(b"")),
            ..Default::default()
        });
        assert!(matches!(empty, Err(Error::BadRequest { .. })));

        let zip = forwarder.validate_knowledge_query(KnowledgeQueryInput {
            question: question.clone(),
            document: Some(document_upload(Some("a.zip".to_string()), None, Bytes::from_static(b"PK"))),
            ..Default::default()
        });
        assert!(matches!(zip, Err(Error::BadRequest { message }) if message.contains("Unsupported")));

        let ftp = forwarder.validate_knowledge_query(KnowledgeQueryInput {
            question: question.clone(),
            url: Some("ftp://example.com/file".to_string()),
            ..Default::default()
        });
        assert!(matches!(ftp, Err(Error::BadRequest { .. })));

        let overlap = forwarder.validate_knowledge_query(KnowledgeQueryInput {
            question,
            document: Some(text_document(b"content")),
            chunk_size: Some(100),
            chunk_overlap: Some(100),
            ..Default::default()
        });
        assert!(matches!(overlap, Err(Error::BadRequest { .. })));
    }

    #[tokio::test]
    async fn test_knowledge_query_answers_and_records_history() {
        let (forwarder, db) = forwarder();
        let query = forwarder
            .validate_knowledge_query(KnowledgeQueryInput {
                question: Some("What is the answer?".to_string()),
                document: Some(text_document(b"42")),
                ..Default::default()
            })
            .unwrap();

        let answer = forwarder.forward_knowledge_query(&caller(), query).await.unwrap();
        assert_eq!(answer, "According to notes.txt: What is the answer?");

        let history = CallHistory::new(&db).list_by_user("user_1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].feature, "knowledge_query");
    }

    #[tokio::test]
    async fn test_knowledge_query_provider_rejection_is_retryable() {
        let config = create_test_config();
        let db = Database::in_memory();
        let forwarder = ProxyForwarder::new(
            &config,
            db.clone(),
            Arc::new(DummyChatProvider::new("hi")),
            Arc::new(RejectingWorkflow),
            Arc::new(DummyVoiceProvider::default()),
        );
        let query = forwarder
            .validate_knowledge_query(KnowledgeQueryInput {
                question: Some("What is the answer?".to_string()),
                document: Some(text_document(b"42")),
                ..Default::default()
            })
            .unwrap();

        let err = forwarder.forward_knowledge_query(&caller(), query).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Upstream {
                feature: Feature::KnowledgeQuery,
                retryable: true,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert!(CallHistory::new(&db).list_by_user("user_1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_voice_call_requires_telephony() {
        let config = create_test_config();
        let forwarder = ProxyForwarder::new(
            &config,
            Database::in_memory(),
            Arc::new(DummyChatProvider::new("hi")),
            Arc::new(DummyWorkflowProvider::default()),
            Arc::new(DummyVoiceProvider::default()),
        );
        let err = forwarder.forward_voice_call_start(&caller(), call()).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_voice_call_start_tracks_handle() {
        let (forwarder, db) = forwarder();
        let handle = forwarder.forward_voice_call_start(&caller(), call()).await.unwrap();

        assert_eq!(handle.state, CallState::Dialing);
        assert!(handle.provider_call_id.as_deref().unwrap().starts_with("dummy-call-"));
        assert_eq!(forwarder.calls().get(handle.id).unwrap().state, CallState::Dialing);

        let history = CallHistory::new(&db).list_by_user("user_1", 10).await.unwrap();
        assert_eq!(history[0].destination.as_deref(), Some("+14155550100"));
        assert!(!history[0].detail.0.to_string().contains("token"));
    }

    #[tokio::test]
    async fn test_refused_call_ends_immediately() {
        let (forwarder, _) = forwarder_with(Arc::new(DummyChatProvider::new("hi")), Arc::new(RefusingVoice));
        let err = forwarder.forward_voice_call_start(&caller(), call()).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { feature: Feature::VoiceCall, retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_invalid_destination_rejected_before_provider() {
        let voice = Arc::new(DummyVoiceProvider::default());
        let (forwarder, _) = forwarder_with(Arc::new(DummyChatProvider::new("hi")), voice.clone());
        let mut bad = call();
        bad.destination_number = "0800".to_string();

        let err = forwarder.forward_voice_call_start(&caller(), bad).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        assert_eq!(voice.started(), 0);
    }
}
