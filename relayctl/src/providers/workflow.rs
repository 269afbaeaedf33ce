//! Workflow prediction provider (`POST /api/v1/prediction/{endpoint_id}`).
//!
//! Plain questions are sent as JSON with an optional `overrideConfig`. Document questions are sent
//! as multipart form data with the file under `files` and the chunking settings as text fields.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::openai::join_path;
use super::{Capability, PredictionRequest, ProviderError, Result, WorkflowProvider, check_status, http_client};
use crate::config::CapabilityEndpoints;

pub struct HttpWorkflowProvider {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    endpoints: CapabilityEndpoints,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionBody<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "OverrideConfig::is_empty")]
    override_config: OverrideConfig<'a>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct OverrideConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_message_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

impl OverrideConfig<'_> {
    fn is_empty(&self) -> bool {
        self.system_message_prompt.is_none() && self.url.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    text: Option<String>,
}

impl HttpWorkflowProvider {
    pub fn new(base_url: Url, api_key: Option<SecretString>, endpoints: CapabilityEndpoints, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url,
            api_key,
            endpoints,
        })
    }

    fn endpoint_id(&self, capability: Capability) -> Option<&str> {
        match capability {
            Capability::GeneralChat => self.endpoints.general_chat.as_deref(),
            Capability::DocumentQa => self.endpoints.document_qa.as_deref(),
            Capability::UrlQa => self.endpoints.url_qa.as_deref(),
            Capability::Antonym => self.endpoints.antonym.as_deref(),
        }
    }
}

fn multipart_form(request: PredictionRequest) -> Result<Form> {
    let mut form = Form::new().text("question", request.question);
    if let Some(document) = request.document {
        let part = Part::bytes(document.bytes.to_vec())
            .file_name(document.filename)
            .mime_str(&document.content_type)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid document content type: {e}")))?;
        form = form.part("files", part);
    }
    if let Some(chunk_size) = request.chunk_size {
        form = form.text("chunkSize", chunk_size.to_string());
    }
    if let Some(chunk_overlap) = request.chunk_overlap {
        form = form.text("chunkOverlap", chunk_overlap.to_string());
    }
    if let Some(top_k) = request.top_k {
        form = form.text("topK", top_k.to_string());
    }
    if let Some(prompt) = request.system_message_prompt {
        form = form.text("systemMessagePrompt", prompt);
    }
    Ok(form)
}

#[async_trait]
impl WorkflowProvider for HttpWorkflowProvider {
    #[instrument(skip(self, request), fields(capability = %capability), err)]
    async fn predict(&self, capability: Capability, request: PredictionRequest) -> Result<String> {
        let endpoint_id = self
            .endpoint_id(capability)
            .ok_or(ProviderError::CapabilityUnavailable(capability))?;
        let url = join_path(&self.base_url, &format!("api/v1/prediction/{endpoint_id}"));

        let mut builder = self.client.post(url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        builder = if request.document.is_some() {
            builder.multipart(multipart_form(request)?)
        } else {
            builder.json(&PredictionBody {
                question: &request.question,
                override_config: OverrideConfig {
                    system_message_prompt: request.system_message_prompt.as_deref(),
                    url: request.url.as_deref(),
                },
            })
        };

        let response = check_status(builder.send().await?).await?;
        let body: PredictionResponse = response.json().await?;
        let text = body
            .text
            .ok_or_else(|| ProviderError::InvalidResponse("prediction response has no text".to_string()))?;
        debug!(answer_len = text.len(), "Prediction completed");
        Ok(text)
    }
}
