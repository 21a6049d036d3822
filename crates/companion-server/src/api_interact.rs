//! The voice/text interaction endpoint.

use crate::middleware::CurrentUser;
use crate::{ApiError, AppState};
use axum::{extract::Extension, http::StatusCode, response::Json};
use chrono::Utc;
use companion_chat::{recent_history, record_exchange, sentiment, NewExchange, HISTORY_CONTEXT_TURNS};
use companion_providers::{InteractionError, InteractionRequest, TranscribeError};
use companion_types::{EmotionData, InputKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractRequest {
    pub input_type: InputKind,
    pub data: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractResponse {
    pub response_text: String,
    /// Base64-encoded reply audio; empty when synthesis is unavailable.
    pub audio_content: String,
    pub emotion_data: EmotionData,
    pub animation_name: String,
    pub session_id: String,
}

fn interaction_err_to_api(e: InteractionError) -> ApiError {
    match e {
        InteractionError::EmptyInput => ApiError(
            StatusCode::BAD_REQUEST,
            "request contained no usable input".to_string(),
        ),
        InteractionError::Transcription(TranscribeError::Decode(_)) => ApiError(
            StatusCode::BAD_REQUEST,
            "audio payload is not valid base64".to_string(),
        ),
        InteractionError::Transcription(err) => {
            tracing::error!(error = %err, "transcription failed");
            ApiError(
                StatusCode::BAD_GATEWAY,
                "transcription service is unavailable".to_string(),
            )
        }
    }
}

/// POST /api/interact
///
/// Runs the full pipeline and records the exchange in the conversation
/// store so later turns see it as context.
pub async fn interact_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<InteractRequest>,
) -> Result<Json<InteractResponse>, ApiError> {
    let started_at = Utc::now();

    let request = match payload.input_type {
        InputKind::Text => InteractionRequest {
            text: Some(payload.data),
            audio_base64: None,
            session_id: payload.session_id,
        },
        InputKind::Audio => InteractionRequest {
            text: None,
            audio_base64: Some(payload.data),
            session_id: payload.session_id,
        },
    };

    let pool = state.pool.clone();
    let user_id = user.id;
    let history = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))?;
        recent_history(&conn, user_id, HISTORY_CONTEXT_TURNS).map_err(|e| {
            tracing::error!(error = %e, "loading history context failed");
            ApiError::from(StatusCode::INTERNAL_SERVER_ERROR)
        })
    })
    .await
    .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))??;

    let result = state
        .pipeline
        .run(&request, &history)
        .await
        .map_err(interaction_err_to_api)?;

    let responded_at = Utc::now();

    // Record the exchange so it feeds future context. A store failure is
    // logged but does not fail the already-produced interaction.
    let pool = state.pool.clone();
    let user_text = result.user_text.clone();
    let response_text = result.response_text.clone();
    let model_used = result.model_used.clone();
    let store_result = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let message_sentiment = sentiment::analyze(&user_text);
        record_exchange(
            &conn,
            &NewExchange {
                user_id,
                user_message: &user_text,
                ai_response: &response_text,
                sentiment: message_sentiment.as_str(),
                response_time_ms: (responded_at - started_at).num_milliseconds(),
                ai_model: &model_used,
                started_at,
                responded_at,
            },
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    })
    .await;
    match store_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(user_id, error = %e, "failed to record interaction exchange"),
        Err(e) => tracing::warn!(user_id, error = %e, "exchange store task panicked"),
    }

    Ok(Json(InteractResponse {
        response_text: result.response_text,
        audio_content: result.audio_base64,
        emotion_data: result.emotion,
        animation_name: result.animation,
        session_id: result.session_id,
    }))
}
