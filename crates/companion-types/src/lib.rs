//! Shared types and constants for the companion backend.
//!
//! This crate provides the foundational types used across all companion
//! crates: the emotion taxonomy produced by the responder, the input kinds
//! accepted by the interaction endpoint, OTP actions, coarse sentiment
//! labels, and the pure emotion-to-animation mapping.
//!
//! No crate in the workspace depends on anything *except* `companion-types`
//! for cross-cutting type definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

pub mod animation;

pub use animation::map_emotion_to_animation;

use serde::{Deserialize, Serialize};

/// Emotions the responder is allowed to annotate a reply with.
///
/// The generative model is instructed to pick exactly one of these; anything
/// else coming back from the provider is treated as a parse failure and
/// degraded to [`Emotion::Neutral`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Sadness,
    Agreement,
    Surprise,
    Neutral,
    Anger,
    Curiosity,
    Thoughtful,
}

impl Emotion {
    /// Returns the lowercase wire label for this emotion.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Joy => "joy",
            Self::Sadness => "sadness",
            Self::Agreement => "agreement",
            Self::Surprise => "surprise",
            Self::Neutral => "neutral",
            Self::Anger => "anger",
            Self::Curiosity => "curiosity",
            Self::Thoughtful => "thoughtful",
        }
    }

    /// Parses a wire label, case-insensitively.
    ///
    /// Returns `None` for unknown labels.
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "joy" => Some(Self::Joy),
            "sadness" => Some(Self::Sadness),
            "agreement" => Some(Self::Agreement),
            "surprise" => Some(Self::Surprise),
            "neutral" => Some(Self::Neutral),
            "anger" => Some(Self::Anger),
            "curiosity" => Some(Self::Curiosity),
            "thoughtful" => Some(Self::Thoughtful),
            _ => None,
        }
    }
}

/// An emotion annotation attached to a generated reply.
///
/// Produced exclusively by the responder and immutable once created.
/// `intensity` is clamped to `[0.0, 1.0]` at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionData {
    pub emotion: Emotion,
    pub intensity: f32,
}

impl EmotionData {
    /// Creates an annotation, clamping intensity into `[0.0, 1.0]`.
    pub fn new(emotion: Emotion, intensity: f32) -> Self {
        Self {
            emotion,
            intensity: intensity.clamp(0.0, 1.0),
        }
    }

    /// The neutral annotation used whenever the provider output cannot be
    /// parsed into a valid annotation.
    pub fn neutral() -> Self {
        Self {
            emotion: Emotion::Neutral,
            intensity: 0.5,
        }
    }
}

/// Kind of payload carried by an interaction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// `data` is plain text.
    Text,
    /// `data` is base64-encoded audio to be transcribed first.
    Audio,
}

/// The action an OTP code was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpAction {
    Login,
    Register,
}

impl OtpAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
        }
    }

    /// Parses a stored action label.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "login" => Some(Self::Login),
            "register" => Some(Self::Register),
            _ => None,
        }
    }
}

/// One completed conversation turn: a user message and the reply it got.
///
/// The responder inlines a bounded window of these as prior-turn context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub user_message: String,
    pub ai_response: String,
}

/// Coarse conversation sentiment, computed by keyword matching.
///
/// Separate from (and coarser than) [`Emotion`]; only the chat-history flow
/// records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Surprised,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Surprised => "surprised",
            Self::Neutral => "neutral",
        }
    }
}
