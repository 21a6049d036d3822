//! Text chat endpoints: send, history, stats.

use crate::middleware::CurrentUser;
use crate::{ApiError, AppState};
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use companion_chat::{
    clear_history, history_page, message_count, recent_history, record_exchange, sentiment, stats,
    NewExchange, HISTORY_CONTEXT_TURNS,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Maximum accepted message length, in characters.
const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Deserialize)]
pub struct SendRequest {
    pub message: String,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn internal() -> ApiError {
    ApiError::from(StatusCode::INTERNAL_SERVER_ERROR)
}

fn chat_err_to_api(e: companion_chat::ChatError) -> ApiError {
    tracing::error!(error = %e, "chat store operation failed");
    internal()
}

/// POST /api/chat/send
pub async fn send_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<SendRequest>,
) -> Result<Json<Value>, ApiError> {
    let message = payload.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "message must not be empty".to_string(),
        ));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("message must be at most {MAX_MESSAGE_CHARS} characters"),
        ));
    }

    let started_at = Utc::now();

    let pool = state.pool.clone();
    let user_id = user.id;
    let history = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| internal())?;
        recent_history(&conn, user_id, HISTORY_CONTEXT_TURNS).map_err(chat_err_to_api)
    })
    .await
    .map_err(|_| internal())??;

    let reply = state.responder.respond(&message, &history).await;
    let responded_at = Utc::now();
    let response_time_ms = (responded_at - started_at).num_milliseconds();
    let message_sentiment = sentiment::analyze(&message);

    let pool = state.pool.clone();
    let reply_text = reply.text.clone();
    let model_used = reply.meta.model_used.clone();
    let stored = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| internal())?;
        record_exchange(
            &conn,
            &NewExchange {
                user_id,
                user_message: &message,
                ai_response: &reply_text,
                sentiment: message_sentiment.as_str(),
                response_time_ms,
                ai_model: &model_used,
                started_at,
                responded_at,
            },
        )
        .map_err(chat_err_to_api)
    })
    .await
    .map_err(|_| internal())??;

    Ok(Json(json!({
        "message_id": stored.message_id,
        "response": reply.text,
        "sentiment": message_sentiment.as_str(),
        "metadata": {
            "model_used": reply.meta.model_used,
            "fallback_used": reply.meta.fallback_used,
        },
        "timestamp": stored.responded_at,
    })))
}

/// GET /api/chat/history
pub async fn history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(0);
    let offset = params.offset.unwrap_or(0);

    let pool = state.pool.clone();
    let user_id = user.id;
    let page = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| internal())?;
        history_page(&conn, user_id, limit, offset).map_err(chat_err_to_api)
    })
    .await
    .map_err(|_| internal())??;

    Ok(Json(json!({
        "messages": page.messages,
        "total_count": page.total_count,
    })))
}

/// DELETE /api/chat/history
pub async fn clear_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let user_id = user.id;
    let deleted = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| internal())?;
        clear_history(&conn, user_id).map_err(chat_err_to_api)
    })
    .await
    .map_err(|_| internal())??;

    tracing::info!(user_id, deleted, "chat history cleared");
    Ok(Json(json!({ "deleted_count": deleted })))
}

/// How far the relationship has progressed, by conversation volume.
fn character_status(interaction_count: i64) -> &'static str {
    if interaction_count == 0 {
        "Ready to chat"
    } else if interaction_count < 5 {
        "Just getting to know you"
    } else if interaction_count < 10 {
        "Becoming good friends"
    } else {
        "Your close companion"
    }
}

/// GET /api/chat/character
pub async fn character_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let user_id = user.id;
    let interaction_count = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| internal())?;
        message_count(&conn, user_id).map_err(chat_err_to_api)
    })
    .await
    .map_err(|_| internal())??;

    Ok(Json(json!({
        "character": {
            "name": "Azusa",
            "personality": "Warm, attentive, and a little playful",
            "hobbies": ["music", "stargazing", "learning new words"],
            "conversation_style": "Casual and encouraging, always curious about your day",
            "ai_model": state.primary_model,
            "capabilities": [
                "text chat",
                "voice conversation",
                "emotion-aware replies",
                "animated expressions",
            ],
        },
        "status": character_status(interaction_count),
        "interaction_count": interaction_count,
    })))
}

/// GET /api/chat/stats
pub async fn stats_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let user_id = user.id;
    let user_stats = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| internal())?;
        stats(&conn, user_id, Utc::now()).map_err(chat_err_to_api)
    })
    .await
    .map_err(|_| internal())??;

    let mut distribution = Map::new();
    for (label, count) in &user_stats.sentiment_distribution {
        distribution.insert(label.clone(), json!(count));
    }

    Ok(Json(json!({
        "total_messages": user_stats.total_messages,
        "recent_messages_7d": user_stats.recent_messages_7d,
        "average_response_time_ms": user_stats.average_response_time_ms,
        "sentiment_distribution": distribution,
    })))
}
