//! Thin HTTP adapters for the two external collaborators Media Ingest needs
//! but `spec.md`'s Non-goals describe only at their interfaces: a hosted
//! file store (e.g. Anthropic's Files API) and a transcription service.
//! Both are plain `reqwest` POSTs to a configured endpoint — the same shape
//! as `relay_agent::tools::http_tool::HttpTool`, just against the two
//! fixed, narrower trait surfaces `relay_agent::media` defines instead of
//! the generic tool-call surface.

use async_trait::async_trait;
use reqwest::multipart;

use relay_agent::{FileStore, Transcriber, UploadedFile};
use relay_core::RelayError;

/// Uploads bytes to a provider-hosted file store over HTTP multipart.
pub struct HttpFileStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpFileStore {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into(), api_key: api_key.into() }
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn upload(&self, bytes: &[u8], mime: &str, filename: Option<&str>) -> Result<UploadedFile, RelayError> {
        let part = multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.unwrap_or("upload.bin").to_string())
            .mime_str(mime)
            .map_err(|e| RelayError::Internal(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::Channel { channel: "file_store".into(), reason: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Channel { channel: "file_store".into(), reason: format!("{status}: {body}") });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Channel { channel: "file_store".into(), reason: e.to_string() })?;

        let file_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayError::Channel { channel: "file_store".into(), reason: "missing file id in response".into() })?
            .to_string();
        let expires_at = body.get("expires_at").and_then(|v| v.as_str()).map(str::to_string);

        Ok(UploadedFile { file_id, expires_at })
    }
}

/// Transcribes audio bytes to text over HTTP multipart.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTranscriber {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into(), api_key: api_key.into() }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, bytes: &[u8], mime: &str) -> Result<String, RelayError> {
        let part = multipart::Part::bytes(bytes.to_vec())
            .file_name("audio")
            .mime_str(mime)
            .map_err(|e| RelayError::Internal(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(&self.endpoint)
            .header("authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::Channel { channel: "transcriber".into(), reason: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Channel { channel: "transcriber".into(), reason: format!("{status}: {body}") });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Channel { channel: "transcriber".into(), reason: e.to_string() })?;

        body.get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| RelayError::Channel { channel: "transcriber".into(), reason: "missing text in response".into() })
    }
}
