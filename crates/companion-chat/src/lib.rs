//! Conversation persistence and history windowing.
//!
//! Stores per-user message pairs (user message + AI reply) and serves two
//! consumers: the responder, which wants a short chronological window of
//! recent turns for context, and the history endpoints, which page through
//! the full record. Message pairs are written atomically — a turn is never
//! stored with only one side — and deleted only en masse.

pub mod sentiment;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use companion_types::HistoryTurn;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// History page size bounds.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Turns of context handed to the responder.
pub const HISTORY_CONTEXT_TURNS: u32 = 5;

/// Errors from conversation store operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A stored conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: i64,
    /// Opaque unique token for client-side correlation.
    pub message_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub sentiment: Option<String>,
    pub response_time_ms: Option<i64>,
    pub ai_model: Option<String>,
    pub created_at: String,
    pub responded_at: Option<String>,
}

/// Fields recorded for a completed exchange.
#[derive(Debug, Clone)]
pub struct NewExchange<'a> {
    pub user_id: i64,
    pub user_message: &'a str,
    pub ai_response: &'a str,
    pub sentiment: &'a str,
    pub response_time_ms: i64,
    pub ai_model: &'a str,
    pub started_at: DateTime<Utc>,
    pub responded_at: DateTime<Utc>,
}

/// One page of history plus counts.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    pub total_count: i64,
}

/// Per-user conversation statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub total_messages: i64,
    pub recent_messages_7d: i64,
    pub average_response_time_ms: Option<i64>,
    pub sentiment_distribution: Vec<(String, i64)>,
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn map_row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message_id: row.get(2)?,
        user_message: row.get(3)?,
        ai_response: row.get(4)?,
        sentiment: row.get(5)?,
        response_time_ms: row.get(6)?,
        ai_model: row.get(7)?,
        created_at: row.get(8)?,
        responded_at: row.get(9)?,
    })
}

const MESSAGE_COLS: &str = "id, user_id, message_id, user_message, ai_response,
    sentiment, response_time_ms, ai_model, created_at, responded_at";

/// Records a completed exchange as one row. Returns the stored message.
///
/// Both sides of the turn arrive together; there is no partially-written
/// state to clean up if the responder had failed earlier in the request.
pub fn record_exchange(conn: &Connection, ex: &NewExchange<'_>) -> Result<ChatMessage, ChatError> {
    let message_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO chat_messages (
            user_id, message_id, user_message, ai_response, sentiment,
            response_time_ms, ai_model, created_at, responded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            ex.user_id,
            message_id,
            ex.user_message,
            ex.ai_response,
            ex.sentiment,
            ex.response_time_ms,
            ex.ai_model,
            format_ts(ex.started_at),
            format_ts(ex.responded_at),
        ],
    )?;

    let stored = conn.query_row(
        &format!("SELECT {MESSAGE_COLS} FROM chat_messages WHERE message_id = ?1"),
        [&message_id],
        map_row_to_message,
    )?;
    Ok(stored)
}

/// Returns the most recent `limit` turns in chronological order, as context
/// for the responder.
pub fn recent_history(
    conn: &Connection,
    user_id: i64,
    limit: u32,
) -> Result<Vec<HistoryTurn>, ChatError> {
    let mut stmt = conn.prepare(
        "SELECT user_message, ai_response FROM chat_messages
         WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id, limit], |row| {
        Ok(HistoryTurn {
            user_message: row.get(0)?,
            ai_response: row.get(1)?,
        })
    })?;

    let mut turns = Vec::new();
    for row in rows {
        turns.push(row?);
    }
    // Newest-first from the query; the responder wants chronological.
    turns.reverse();
    Ok(turns)
}

/// Returns one page of history, oldest-first within the page, plus the
/// user's total message count.
///
/// `limit` is clamped to `[1, MAX_PAGE_LIMIT]` (0 means the default);
/// negative offsets are treated as 0 by the caller's type.
pub fn history_page(
    conn: &Connection,
    user_id: i64,
    limit: u32,
    offset: u32,
) -> Result<HistoryPage, ChatError> {
    let limit = match limit {
        0 => DEFAULT_PAGE_LIMIT,
        n => n.min(MAX_PAGE_LIMIT),
    };

    let total_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chat_messages WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLS} FROM chat_messages
         WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![user_id, limit, offset], map_row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    messages.reverse();

    Ok(HistoryPage {
        messages,
        total_count,
    })
}

/// Deletes the user's entire history. Returns the number of rows removed.
pub fn clear_history(conn: &Connection, user_id: i64) -> Result<usize, ChatError> {
    let deleted = conn.execute("DELETE FROM chat_messages WHERE user_id = ?1", [user_id])?;
    Ok(deleted)
}

/// Counts the user's stored messages.
pub fn message_count(conn: &Connection, user_id: i64) -> Result<i64, ChatError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM chat_messages WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Computes per-user conversation statistics.
pub fn stats(conn: &Connection, user_id: i64, now: DateTime<Utc>) -> Result<ChatStats, ChatError> {
    let total_messages: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chat_messages WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;

    let week_ago = format_ts(now - Duration::days(7));
    let recent_messages_7d: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chat_messages WHERE user_id = ?1 AND created_at >= ?2",
        params![user_id, week_ago],
        |row| row.get(0),
    )?;

    let average_response_time_ms: Option<f64> = conn.query_row(
        "SELECT AVG(response_time_ms) FROM chat_messages
         WHERE user_id = ?1 AND response_time_ms IS NOT NULL",
        [user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT sentiment, COUNT(*) FROM chat_messages
         WHERE user_id = ?1 AND sentiment IS NOT NULL
         GROUP BY sentiment ORDER BY sentiment",
    )?;
    let rows = stmt.query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut sentiment_distribution = Vec::new();
    for row in rows {
        sentiment_distribution.push(row?);
    }

    Ok(ChatStats {
        total_messages,
        recent_messages_7d,
        average_response_time_ms: average_response_time_ms.map(|v| v.round() as i64),
        sentiment_distribution,
    })
}
