//! Detection API client
//!
//! Submits one encoded frame per request and parses the detections that come
//! back. No retries happen here: the caller decides what a failed frame means.

use crate::cancel::CancellationToken;
use crate::detection::DetectionResponse;
use crate::error::PipelineError;
use crate::frame::Frame;
use async_trait::async_trait;
use classwatch_core::config::join_url;
use classwatch_core::{ApiConfig, TokenStore};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

/// Anything that turns one frame into detections
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Detector: Send + Sync {
    /// Submit `frame`.
    ///
    /// Resolves as [`PipelineError::Cancelled`] when `cancel` fires before or
    /// during the request.
    async fn detect(&self, frame: &Frame, cancel: &CancellationToken) -> Result<DetectionResponse, PipelineError>;

    /// Base used to resolve relative visualization paths
    fn base_url(&self) -> String {
        String::new()
    }
}

/// HTTP client for `POST /session/detect/{session_id}`
#[derive(Clone)]
pub struct DetectionClient {
    client: Client,
    base_url: String,
    session_id: String,
    tokens: TokenStore,
}

impl DetectionClient {
    pub fn new(api: &ApiConfig, session_id: impl Into<String>, tokens: TokenStore) -> Result<Self, PipelineError> {
        let client = Client::builder().timeout(api.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: api.base_url.clone(),
            session_id: session_id.into(),
            tokens,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn endpoint(&self) -> String {
        join_url(&self.base_url, &format!("session/detect/{}", self.session_id))
    }

    async fn submit(&self, frame: &Frame) -> Result<DetectionResponse, PipelineError> {
        let part = Part::bytes(frame.data.to_vec())
            .file_name("capture.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("image", part);

        let mut request = self.client.post(self.endpoint()).multipart(form);
        match self.tokens.bearer() {
            Some(bearer) => request = request.header(reqwest::header::AUTHORIZATION, bearer),
            None => warn!("Submitting frame without a bearer token"),
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::DetectionFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::DetectionFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(PipelineError::DetectionFailed(error_from_body(&body).unwrap_or_else(|| {
                format!("Server returned {}", status)
            })));
        }

        let parsed: DetectionResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::DetectionFailed(format!("Invalid response: {}", e)))?;

        if !parsed.is_success() {
            return Err(PipelineError::DetectionFailed(parsed.error_message()));
        }

        Ok(parsed)
    }
}

/// `error` field of a JSON error body, if there is one
fn error_from_body(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Detector for DetectionClient {
    async fn detect(&self, frame: &Frame, cancel: &CancellationToken) -> Result<DetectionResponse, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        debug!(
            "Submitting {} byte frame at {:.2}s to {}",
            frame.len(),
            frame.timestamp_secs,
            self.endpoint()
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Detection request aborted");
                Err(PipelineError::Cancelled)
            }
            result = self.submit(frame) => result,
        }
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }
}
