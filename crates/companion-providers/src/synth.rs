//! Speech synthesis client.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesis request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("synthesis produced no audio")]
    EmptyAudio,
}

/// Speech synthesis seam. Failures are surfaced to the caller, which
/// decides whether audio is essential for its result.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError>;
}

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// Base URL of the synthesis API, e.g. `https://api.elevenlabs.io/v1`.
    pub base_url: String,
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub request_timeout_secs: u64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            voice_id: String::new(),
            model_id: "eleven_multilingual_v2".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Debug, Serialize)]
struct SynthRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

/// HTTP text-to-speech client returning raw MP3 bytes.
#[derive(Debug, Clone)]
pub struct VoiceSynthesizer {
    config: SynthesizerConfig,
    client: reqwest::Client,
}

impl VoiceSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Synthesizer for VoiceSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let url = format!(
            "{}/text-to-speech/{}",
            self.config.base_url, self.config.voice_id
        );
        let body = SynthRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .header("accept", "audio/mpeg")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(bytes.to_vec())
    }
}
