//! HTTP request handlers for all API endpoints.
//!
//! Each handler validates its input before touching the rate limiter, takes a slot for the
//! feature it forwards to, then calls the [`crate::forwarder::ProxyForwarder`]. Handlers return
//! [`crate::errors::Error`], which converts to the matching status code and a user-safe body.
//!
//! # Handler Modules
//!
//! - [`chat`]: streaming chat relayed as server-sent events
//! - [`knowledge`]: document and URL question answering
//! - [`flows`]: flow CRUD and flow chat
//! - [`calls`]: voice call start, status, provider callbacks and history
//! - [`conversations`]: saved conversations
//! - [`prompts`]: saved prompt presets
//! - [`rate_limits`]: recorded rejections
//! - [`health`]: liveness

pub mod calls;
pub mod chat;
pub mod conversations;
pub mod flows;
pub mod health;
pub mod knowledge;
pub mod prompts;
pub mod rate_limits;

use std::collections::HashMap;

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;

use crate::errors::{Error, Result};
use crate::forwarder::document_upload;
use crate::providers::DocumentUpload;
use crate::AppState;

/// Text fields and the optional `file` part of a `multipart/form-data` body
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    pub fields: HashMap<String, String>,
    pub file: Option<DocumentUpload>,
}

impl UploadForm {
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).cloned()
    }

    /// A numeric field. Missing or blank is `None`; anything else must parse.
    pub fn number(&self, name: &str) -> Result<Option<u32>> {
        match self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| Error::BadRequest {
                message: format!("{name} must be a non-negative integer"),
            }),
        }
    }
}

pub(crate) fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}

/// Read a whole upload form. Only the part named `file` is kept as bytes.
pub(crate) async fn read_upload_form(request: Request, state: &AppState) -> Result<UploadForm> {
    let mut multipart = Multipart::from_request(request, state).await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {}", e.body_text()),
    })?;

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {}", e.body_text()),
    })? {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let filename = field.file_name().map(|s| s.to_string());
            let declared = field.content_type().map(|s| s.to_string());
            let bytes = field.bytes().await.map_err(|e| Error::BadRequest {
                message: format!("Failed to read uploaded file: {}", e.body_text()),
            })?;
            form.file = Some(document_upload(filename, declared.as_deref(), bytes));
        } else {
            let value = field.text().await.map_err(|e| Error::BadRequest {
                message: format!("Failed to read field {name}: {}", e.body_text()),
            })?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

/// Parse a JSON body, reporting failures as a bad request.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(request: Request, state: &AppState) -> Result<T> {
    let axum::Json(body) = axum::Json::<T>::from_request(request, state)
        .await
        .map_err(|e| Error::BadRequest { message: e.body_text() })?;
    Ok(body)
}

/// A required query parameter naming the user whose data is listed
pub(crate) fn required_username(username: Option<String>) -> Result<String> {
    username
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::BadRequest {
            message: "username is required".to_string(),
        })
}
