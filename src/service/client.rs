use crate::error::ControllerError;
use crate::model::{ColumnMapping, ProcessRequest, ProgressSnapshot, RunConfig, UploadResponse};
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{multipart, StatusCode, Url};
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Error body returned by every endpoint on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the batch geocoding service.
#[derive(Debug, Clone)]
pub struct GeocoderClient {
    pub http: reqwest::Client,
    base_url: Url,
}

impl GeocoderClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(cfg.user_agent.clone());
        if let Some(timeout) = cfg.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("build HTTP client")?;
        let base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL: {}", cfg.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("invalid base URL: {}", cfg.base_url);
        }
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL always has path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Where the finished result file can be fetched.
    pub fn download_url(&self, session_id: &str) -> String {
        self.endpoint(&["download", session_id]).to_string()
    }

    /// `POST /upload` with the file as multipart field `file`.
    pub async fn upload(&self, path: &Path) -> Result<UploadResponse, ControllerError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.csv")
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| ControllerError::Upload(format!("cannot read {}: {e}", path.display())))?;

        info!("POST /upload ({}, {} bytes)", filename, data.len());

        let part = multipart::Part::bytes(data)
            .file_name(filename)
            .mime_str("text/csv")
            .map_err(|e| ControllerError::Upload(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.endpoint(&["upload"]))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ControllerError::Upload(transport_message(&e)))?;

        let status = response.status();
        info!("POST /upload -> {}", status.as_u16());
        if !status.is_success() {
            return Err(ControllerError::Upload(error_message(response, status).await));
        }

        response
            .json::<UploadResponse>()
            .await
            .map_err(|e| ControllerError::Upload(format!("unexpected upload response: {e}")))
    }

    /// `POST /process` to start server-side processing.
    pub async fn start_processing(
        &self,
        session_id: &str,
        mapping: &ColumnMapping,
    ) -> Result<(), ControllerError> {
        let body = ProcessRequest {
            session_id,
            address_column: &mapping.address,
            city_column: &mapping.city,
            state_column: &mapping.state,
            zip_column: &mapping.zip,
        };

        info!("POST /process (session {})", redact_id(session_id));

        let response = self
            .http
            .post(self.endpoint(&["process"]))
            .json(&body)
            .send()
            .await
            .map_err(|e| ControllerError::Launch(transport_message(&e)))?;

        let status = response.status();
        info!("POST /process -> {}", status.as_u16());
        if !status.is_success() {
            return Err(ControllerError::Launch(error_message(response, status).await));
        }
        Ok(())
    }

    /// `GET /status/{session_id}`.
    pub async fn fetch_status(&self, session_id: &str) -> Result<ProgressSnapshot, ControllerError> {
        let response = self
            .http
            .get(self.endpoint(&["status", session_id]))
            .send()
            .await
            .map_err(|e| ControllerError::Poll(transport_message(&e)))?;

        let status = response.status();
        debug!("GET /status/{} -> {}", redact_id(session_id), status.as_u16());
        if !status.is_success() {
            return Err(ControllerError::Poll(error_message(response, status).await));
        }

        response
            .json::<ProgressSnapshot>()
            .await
            .map_err(|e| ControllerError::Poll(format!("unexpected status response: {e}")))
    }

    /// `POST /stop/{session_id}`.
    pub async fn stop(&self, session_id: &str) -> Result<(), ControllerError> {
        info!("POST /stop/{}", redact_id(session_id));

        let response = self
            .http
            .post(self.endpoint(&["stop", session_id]))
            .send()
            .await
            .map_err(|e| ControllerError::Stop(transport_message(&e)))?;

        let status = response.status();
        info!("POST /stop/{} -> {}", redact_id(session_id), status.as_u16());
        if !status.is_success() {
            return Err(ControllerError::Stop(error_message(response, status).await));
        }
        Ok(())
    }

    /// Stream `GET /download/{session_id}` into `dest`. Returns the number of bytes written.
    pub async fn download_to(&self, session_id: &str, dest: &Path) -> Result<u64, ControllerError> {
        info!("GET /download/{} -> {}", redact_id(session_id), dest.display());

        let response = self
            .http
            .get(self.endpoint(&["download", session_id]))
            .send()
            .await
            .map_err(|e| ControllerError::Download(transport_message(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Download(error_message(response, status).await));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.map_err(|e| ControllerError::Download(transport_message(&e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Server-provided `{error}` message, falling back to the HTTP status line.
async fn error_message(response: reqwest::Response, status: StatusCode) -> String {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.error.trim().is_empty() => parsed.error,
        _ => format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        ),
    }
}

fn transport_message(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "could not connect to the geocoding service".to_string()
    } else {
        format!("network error: {e}")
    }
}

/// Shortened session id for log lines.
fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}
