//! Voice assistant provider.
//!
//! Starting a call takes two requests: the caller number is registered with the provider
//! (`POST /phone-number`), then the call is placed from it (`POST /call/phone`) with the full
//! assistant definition inline. Both use the private key as a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use url::Url;

use super::openai::join_path;
use super::{CallConfiguration, ProviderCall, Result, VoiceProvider, check_status, http_client};
use crate::config::{TelephonyConfig, VoiceDefaults};

pub struct HttpVoiceProvider {
    client: reqwest::Client,
    base_url: Url,
    private_key: SecretString,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhoneNumberRequest<'a> {
    provider: &'static str,
    number: &'a str,
    name: &'a str,
    twilio_account_sid: &'a str,
    twilio_auth_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct PhoneNumberResponse {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartCallRequest<'a> {
    assistant: Assistant<'a>,
    phone_number_id: &'a str,
    customer: Customer<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Assistant<'a> {
    name: &'a str,
    transcriber: Transcriber<'a>,
    model: AssistantModel<'a>,
    voice: Voice<'a>,
    first_message: &'a str,
    end_call_message: &'a str,
}

#[derive(Serialize)]
struct Transcriber<'a> {
    provider: &'a str,
    model: &'a str,
    language: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssistantModel<'a> {
    provider: &'a str,
    model: &'a str,
    temperature: f32,
    system_prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Voice<'a> {
    provider: &'a str,
    voice_id: &'a str,
}

#[derive(Serialize)]
struct Customer<'a> {
    number: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

impl HttpVoiceProvider {
    pub fn new(base_url: Url, private_key: SecretString, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url,
            private_key,
        })
    }
}

#[async_trait]
impl VoiceProvider for HttpVoiceProvider {
    #[instrument(skip(self, telephony), fields(number = %telephony.phone_number), err)]
    async fn register_phone_number(&self, telephony: &TelephonyConfig) -> Result<String> {
        let body = PhoneNumberRequest {
            provider: "twilio",
            number: &telephony.phone_number,
            name: &telephony.name,
            twilio_account_sid: &telephony.account_sid,
            twilio_auth_token: telephony.auth_token.expose_secret(),
        };
        let response = self
            .client
            .post(join_path(&self.base_url, "phone-number"))
            .bearer_auth(self.private_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let registered: PhoneNumberResponse = check_status(response).await?.json().await?;
        Ok(registered.id)
    }

    #[instrument(skip(self, call, defaults), fields(model = %call.model), err)]
    async fn start_call(&self, phone_number_id: &str, call: &CallConfiguration, defaults: &VoiceDefaults) -> Result<ProviderCall> {
        let body = StartCallRequest {
            assistant: Assistant {
                name: &call.name,
                transcriber: Transcriber {
                    provider: &defaults.transcriber_provider,
                    model: &defaults.transcriber_model,
                    language: call.language.as_deref().unwrap_or(&defaults.language),
                },
                model: AssistantModel {
                    provider: &call.model_provider,
                    model: &call.model,
                    temperature: call.temperature,
                    system_prompt: &call.system_prompt,
                },
                voice: Voice {
                    provider: &defaults.voice_provider,
                    voice_id: &call.voice_id,
                },
                first_message: &call.first_message,
                end_call_message: &defaults.end_call_message,
            },
            phone_number_id,
            customer: Customer {
                number: &call.destination_number,
                name: call.contact_name.as_deref(),
            },
        };
        let response = self
            .client
            .post(join_path(&self.base_url, "call/phone"))
            .bearer_auth(self.private_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let started: CallResponse = check_status(response).await?.json().await?;
        info!(call_id = %started.id, "Voice call placed");
        Ok(ProviderCall {
            id: started.id,
            status: started.status,
        })
    }
}
