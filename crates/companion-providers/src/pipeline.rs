//! The interaction pipeline: input normalization, transcription, response
//! generation, animation mapping, and speech synthesis, in that order.

use crate::respond::{Responder, ResponderReply};
use crate::synth::Synthesizer;
use crate::transcribe::{decode_audio_base64, TranscribeError, Transcriber};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use companion_types::{map_emotion_to_animation, EmotionData, InputKind};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InteractionError {
    /// Neither text nor audio was supplied, or the effective text was blank.
    #[error("no usable input in request")]
    EmptyInput,
    #[error(transparent)]
    Transcription(#[from] TranscribeError),
}

/// One interaction request, before normalization. Audio wins when both
/// fields are present.
#[derive(Debug, Clone, Default)]
pub struct InteractionRequest {
    pub text: Option<String>,
    pub audio_base64: Option<String>,
    /// Correlation token. Echoed when present, generated when absent.
    pub session_id: Option<String>,
}

/// The assembled pipeline result.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionResult {
    pub session_id: String,
    pub input_kind: InputKind,
    /// What the user said, post-transcription for audio input.
    pub user_text: String,
    pub response_text: String,
    pub emotion: EmotionData,
    pub animation: String,
    /// Base64-encoded reply audio. Empty when synthesis is unavailable.
    pub audio_base64: String,
    pub model_used: String,
    pub fallback_used: bool,
}

/// Runs one interaction end to end.
///
/// Synthesis failure does not fail the interaction: the text reply and
/// annotation are still valuable without audio, so the result carries an
/// empty audio payload instead.
pub struct InteractionPipeline {
    transcriber: Arc<dyn Transcriber>,
    responder: Arc<dyn Responder>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl InteractionPipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            transcriber,
            responder,
            synthesizer,
        }
    }

    /// Resolves the request to (kind, user text), transcribing audio input.
    async fn normalize(
        &self,
        request: &InteractionRequest,
    ) -> Result<(InputKind, String), InteractionError> {
        if let Some(audio) = request.audio_base64.as_deref() {
            if !audio.trim().is_empty() {
                let bytes = decode_audio_base64(audio)?;
                let text = self.transcriber.transcribe(&bytes).await?;
                return Ok((InputKind::Audio, text));
            }
        }
        match request.text.as_deref() {
            Some(text) if !text.trim().is_empty() => Ok((InputKind::Text, text.to_string())),
            _ => Err(InteractionError::EmptyInput),
        }
    }

    pub async fn run(
        &self,
        request: &InteractionRequest,
        history: &[companion_types::HistoryTurn],
    ) -> Result<InteractionResult, InteractionError> {
        let (input_kind, user_text) = self.normalize(request).await?;
        if user_text.trim().is_empty() {
            // Transcription can legitimately return nothing for silence.
            return Err(InteractionError::EmptyInput);
        }

        let ResponderReply {
            text: response_text,
            emotion,
            meta,
        } = self.responder.respond(&user_text, history).await;

        let animation =
            map_emotion_to_animation(emotion.emotion.as_str(), emotion.intensity).to_string();

        let audio_base64 = match self.synthesizer.synthesize(&response_text).await {
            Ok(bytes) => BASE64.encode(bytes),
            Err(err) => {
                tracing::warn!(error = %err, "speech synthesis unavailable, replying text-only");
                String::new()
            }
        };

        let session_id = request
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(InteractionResult {
            session_id,
            input_kind,
            user_text,
            response_text,
            emotion,
            animation,
            audio_base64,
            model_used: meta.model_used,
            fallback_used: meta.fallback_used,
        })
    }
}
