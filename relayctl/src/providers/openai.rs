//! Chat provider for OpenAI-compatible `/chat/completions` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use super::{ChatMessage, ChatProvider, GenerationParams, Result, TokenStream, check_status, sse, streaming_http_client};

pub struct OpenAiChatProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<SecretString>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    max_tokens: u32,
    stream: bool,
}

impl OpenAiChatProvider {
    pub fn new(base_url: Url, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let endpoint = join_path(&base_url, "chat/completions");
        Ok(Self {
            client: streaming_http_client(timeout)?,
            endpoint,
            api_key,
        })
    }
}

/// Append `path` to `base`, keeping any path prefix of `base` (e.g. `/v1`).
pub(crate) fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}/{}", path.trim_start_matches('/')));
    url
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    #[instrument(skip(self, messages, params), fields(model = %params.model, messages = messages.len()), err)]
    async fn stream_chat(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<TokenStream> {
        let body = CompletionRequest {
            model: &params.model,
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            max_tokens: params.max_tokens,
            stream: true,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = check_status(request.send().await?).await?;
        debug!("Completion stream opened");
        Ok(sse::parse_chat_stream(response))
    }
}
