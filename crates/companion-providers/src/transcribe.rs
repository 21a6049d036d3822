//! Batch transcription gateway.
//!
//! Converts raw audio bytes to text through an upload / submit / poll
//! provider API. The poll loop is bounded by a configurable attempt count —
//! an unbounded loop against a stuck provider would pin the request task
//! for as long as the client keeps the connection open. The loop runs on
//! the request's own task, so cancelling the request cancels the poll.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors from the transcription gateway. None of these are absorbed: there
/// is no safe default transcript.
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// The input was not valid base64.
    #[error("invalid base64 audio data: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The provider reported a failed transcription job.
    #[error("transcription failed: {0}")]
    Failed(String),

    /// Transport or HTTP-level failure talking to the provider.
    #[error("transcription provider unavailable: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The job did not reach a terminal status within the poll budget.
    #[error("transcription did not complete within {0} poll attempts")]
    DeadlineExceeded(u32),
}

/// Speech-to-text provider seam.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscribeError>;
}

/// Repairs missing base64 padding.
///
/// Clients routinely strip trailing `=` from base64 payloads; the decoder
/// here requires canonical padding, so it is restored before decoding.
pub fn repair_padding(encoded: &str) -> String {
    let missing = encoded.len() % 4;
    if missing == 0 {
        encoded.to_string()
    } else {
        let mut repaired = String::with_capacity(encoded.len() + 4 - missing);
        repaired.push_str(encoded);
        for _ in 0..(4 - missing) {
            repaired.push('=');
        }
        repaired
    }
}

/// Decodes a base64 audio payload, repairing padding first.
pub fn decode_audio_base64(encoded: &str) -> Result<Vec<u8>, TranscribeError> {
    let repaired = repair_padding(encoded.trim());
    let bytes = base64::engine::general_purpose::STANDARD.decode(repaired.as_bytes())?;
    Ok(bytes)
}

/// Configuration for the batch transcription client.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    /// Base URL of the provider API, e.g. `https://api.example.com/v2`.
    pub base_url: String,
    pub api_key: String,
    /// Fixed interval between status polls.
    pub poll_interval_ms: u64,
    /// Poll budget before giving up on a job.
    pub max_poll_attempts: u32,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            poll_interval_ms: 3_000,
            max_poll_attempts: 40,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    text: Option<String>,
    error: Option<String>,
}

/// HTTP client for an upload-then-poll batch transcription provider.
#[derive(Debug, Clone)]
pub struct BatchTranscriber {
    config: TranscriberConfig,
    client: reqwest::Client,
}

impl BatchTranscriber {
    pub fn new(config: TranscriberConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Uploads raw audio bytes, returning the provider's reference URL.
    async fn upload(&self, audio: &[u8]) -> Result<String, TranscribeError> {
        let resp = self
            .client
            .post(format!("{}/upload", self.config.base_url))
            .header("authorization", &self.config.api_key)
            .body(audio.to_vec())
            .send()
            .await?
            .error_for_status()?;
        let body: UploadResponse = resp.json().await?;
        Ok(body.upload_url)
    }

    /// Submits an uploaded audio URL for transcription, returning the job id.
    async fn submit(&self, audio_url: &str) -> Result<String, TranscribeError> {
        let resp = self
            .client
            .post(format!("{}/transcript", self.config.base_url))
            .header("authorization", &self.config.api_key)
            .json(&serde_json::json!({ "audio_url": audio_url }))
            .send()
            .await?
            .error_for_status()?;
        let body: SubmitResponse = resp.json().await?;
        Ok(body.id)
    }

    /// Polls the job until it reaches a terminal status or the budget runs out.
    async fn poll(&self, job_id: &str) -> Result<String, TranscribeError> {
        for attempt in 1..=self.config.max_poll_attempts {
            let resp = self
                .client
                .get(format!("{}/transcript/{}", self.config.base_url, job_id))
                .header("authorization", &self.config.api_key)
                .send()
                .await?
                .error_for_status()?;
            let body: JobStatusResponse = resp.json().await?;

            match body.status.as_str() {
                "completed" => return Ok(body.text.unwrap_or_default()),
                "error" | "failed" => {
                    return Err(TranscribeError::Failed(
                        body.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                other => {
                    tracing::debug!(job_id, status = other, attempt, "transcription pending");
                }
            }

            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }

        Err(TranscribeError::DeadlineExceeded(
            self.config.max_poll_attempts,
        ))
    }
}

#[async_trait]
impl Transcriber for BatchTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscribeError> {
        let audio_url = self.upload(audio).await?;
        let job_id = self.submit(&audio_url).await?;
        self.poll(&job_id).await
    }
}
