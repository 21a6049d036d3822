//! Emotion-aware response generation.
//!
//! One generation call per user message, carrying a fixed persona that
//! demands a strict JSON reply `{"responseText", "emotionData"}`. The
//! contract to callers is total: `respond` always produces a valid
//! (text, annotation) pair. Upstream trouble is folded into the result —
//! unparseable provider output degrades to a fixed neutral reply, a failed
//! primary model retries once on the fallback model, and a double failure
//! yields a fixed apology. What actually happened is recorded in the reply
//! metadata, never raised.

use async_trait::async_trait;
use companion_types::{Emotion, EmotionData, HistoryTurn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persona sent as the system instruction on every generation call.
///
/// The schema demand is part of the persona on purpose: the model must
/// produce the annotation in the same call that produces the reply, so the
/// two can never disagree about which exchange they describe.
const PERSONA: &str = r#"You are an emotionally intelligent AI companion. Your role is to respond to the user's message in a supportive and engaging way.
After crafting your response, you MUST analyze the user's input and your response to determine the most appropriate emotional context.
You MUST return a single, valid JSON object with two keys: "responseText" and "emotionData".
"responseText" should be your natural language reply as a string.
"emotionData" should be a JSON object containing "emotion" and "intensity".
The "emotion" must be one of the following strings: "joy", "sadness", "agreement", "surprise", "neutral", "anger", "curiosity", "thoughtful".
The "intensity" must be a float between 0.0 and 1.0.

Example:
User input: "I finally finished my big project!"
Your output:
{
  "responseText": "That's fantastic news! Congratulations on getting it done. You must feel so relieved and proud.",
  "emotionData": {
    "emotion": "joy",
    "intensity": 0.9
  }
}"#;

/// Reply used when the provider output cannot be parsed into the schema.
pub const PARSE_FALLBACK_TEXT: &str =
    "I'm having a little trouble expressing myself right now, but I'm listening.";

/// Reply used when both models fail at the provider level.
pub const APOLOGY_TEXT: &str =
    "I'm sorry, I'm not feeling quite myself right now. Please try talking to me again in a little while.";

/// History turns inlined into the prompt, newest last.
const MAX_CONTEXT_TURNS: usize = 5;

/// Why a reply is not the model's own words and annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// The model answered but its output failed schema parsing.
    AnnotationFallback,
    /// Primary and fallback models both failed at the provider level.
    AllModelsFailed,
}

/// Auxiliary facts about how a reply was produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyMeta {
    /// Model that produced the reply, or `"none"` if both failed.
    pub model_used: String,
    /// Whether the fallback model was attempted.
    pub fallback_used: bool,
    /// Present when the reply is a degraded substitute.
    pub degraded: Option<DegradedReason>,
    /// Last provider error, when one occurred.
    pub error: Option<String>,
}

/// A complete responder result. Always well-formed.
#[derive(Debug, Clone)]
pub struct ResponderReply {
    pub text: String,
    pub emotion: EmotionData,
    pub meta: ReplyMeta,
}

/// Text generation seam. Implementations must be total: every input maps
/// to a valid reply, with failures reported only through the metadata.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, user_text: &str, history: &[HistoryTurn]) -> ResponderReply;
}

/// Strips a Markdown code fence from around a JSON payload.
///
/// Models frequently wrap their JSON in ```json fences despite instructions
/// not to; the wrapping is cosmetic and removed before parsing.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .trim_start()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[derive(Debug, Deserialize)]
struct WireEmotion {
    emotion: String,
    intensity: f32,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(rename = "responseText")]
    response_text: String,
    #[serde(rename = "emotionData")]
    emotion_data: WireEmotion,
}

/// Parses a raw model reply into (text, annotation).
///
/// Returns `None` on malformed JSON, missing keys, wrong types, or an
/// emotion label outside the allowed set — the caller substitutes the
/// neutral fallback in all of those cases.
pub fn parse_reply(raw: &str) -> Option<(String, EmotionData)> {
    let cleaned = strip_code_fences(raw);
    let wire: WireReply = serde_json::from_str(cleaned).ok()?;
    let emotion = Emotion::parse(&wire.emotion_data.emotion)?;
    Some((
        wire.response_text,
        EmotionData::new(emotion, wire.emotion_data.intensity),
    ))
}

/// Configuration for the generation client.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Base URL of the generation API, e.g.
    /// `https://generativelanguage.googleapis.com/v1beta`.
    pub base_url: String,
    pub api_key: String,
    pub primary_model: String,
    pub fallback_model: String,
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            primary_model: "gemini-2.0-flash".to_string(),
            fallback_model: "gemini-1.5-flash".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenContent {
    parts: Vec<GenPart>,
}

#[derive(Debug, Serialize)]
struct GenRequest {
    system_instruction: GenContent,
    contents: Vec<GenContent>,
}

#[derive(Debug, Deserialize)]
struct GenPartOut {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenContentOut {
    parts: Vec<GenPartOut>,
}

#[derive(Debug, Deserialize)]
struct GenCandidate {
    content: GenContentOut,
}

#[derive(Debug, Deserialize)]
struct GenResponse {
    candidates: Option<Vec<GenCandidate>>,
}

/// HTTP client for the generative language API, with primary/fallback
/// model selection.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    config: GenerationConfig,
    client: reqwest::Client,
}

impl GenerationClient {
    pub fn new(config: GenerationConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Builds the prompt: a bounded window of prior turns, then the new
    /// user message.
    fn build_prompt(user_text: &str, history: &[HistoryTurn]) -> String {
        let mut parts = Vec::new();
        let window = if history.len() > MAX_CONTEXT_TURNS {
            &history[history.len() - MAX_CONTEXT_TURNS..]
        } else {
            history
        };

        if !window.is_empty() {
            parts.push("Recent conversation:".to_string());
            for turn in window {
                parts.push(format!("User: {}", turn.user_message));
                parts.push(format!("Companion: {}", turn.ai_response));
            }
            parts.push(String::new());
        }

        parts.push(format!("User input: \"{user_text}\""));
        parts.join("\n")
    }

    /// One generation call against a specific model. Returns the raw reply
    /// text; transport, HTTP, and empty-candidate failures all surface.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, model, self.config.api_key
        );
        let request = GenRequest {
            system_instruction: GenContent {
                parts: vec![GenPart {
                    text: PERSONA.to_string(),
                }],
            },
            contents: vec![GenContent {
                parts: vec![GenPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let body: GenResponse = resp.json().await.map_err(|e| e.to_string())?;
        body.candidates
            .and_then(|mut c| {
                if c.is_empty() {
                    None
                } else {
                    c.remove(0).content.parts.into_iter().next()
                }
            })
            .map(|part| part.text)
            .ok_or_else(|| "model returned no candidates".to_string())
    }
}

#[async_trait]
impl Responder for GenerationClient {
    async fn respond(&self, user_text: &str, history: &[HistoryTurn]) -> ResponderReply {
        let prompt = Self::build_prompt(user_text, history);

        let (raw, model_used, fallback_used, provider_error) =
            match self.generate(&self.config.primary_model, &prompt).await {
                Ok(raw) => (Some(raw), self.config.primary_model.clone(), false, None),
                Err(primary_err) => {
                    tracing::warn!(
                        model = %self.config.primary_model,
                        error = %primary_err,
                        "primary model failed, trying fallback"
                    );
                    match self.generate(&self.config.fallback_model, &prompt).await {
                        Ok(raw) => (Some(raw), self.config.fallback_model.clone(), true, None),
                        Err(fallback_err) => {
                            tracing::error!(
                                model = %self.config.fallback_model,
                                error = %fallback_err,
                                "fallback model also failed"
                            );
                            (None, "none".to_string(), true, Some(fallback_err))
                        }
                    }
                }
            };

        let Some(raw) = raw else {
            return ResponderReply {
                text: APOLOGY_TEXT.to_string(),
                emotion: EmotionData::neutral(),
                meta: ReplyMeta {
                    model_used,
                    fallback_used,
                    degraded: Some(DegradedReason::AllModelsFailed),
                    error: provider_error,
                },
            };
        };

        match parse_reply(&raw) {
            Some((text, emotion)) => ResponderReply {
                text,
                emotion,
                meta: ReplyMeta {
                    model_used,
                    fallback_used,
                    degraded: None,
                    error: None,
                },
            },
            None => {
                tracing::warn!(model = %model_used, "reply failed schema parsing, degrading");
                ResponderReply {
                    text: PARSE_FALLBACK_TEXT.to_string(),
                    emotion: EmotionData::neutral(),
                    meta: ReplyMeta {
                        model_used,
                        fallback_used,
                        degraded: Some(DegradedReason::AnnotationFallback),
                        error: None,
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_reply() {
        let raw = r#"{"responseText": "Nice!", "emotionData": {"emotion": "joy", "intensity": 0.9}}"#;
        let (text, emotion) = parse_reply(raw).unwrap();
        assert_eq!(text, "Nice!");
        assert_eq!(emotion.emotion, Emotion::Joy);
        assert_eq!(emotion.intensity, 0.9);
    }

    #[test]
    fn strips_json_code_fences() {
        let raw = "```json\n{\"responseText\": \"ok\", \"emotionData\": {\"emotion\": \"neutral\", \"intensity\": 0.5}}\n```";
        let (text, emotion) = parse_reply(raw).unwrap();
        assert_eq!(text, "ok");
        assert_eq!(emotion.emotion, Emotion::Neutral);
    }

    #[test]
    fn strips_bare_code_fences() {
        let raw = "```\n{\"responseText\": \"ok\", \"emotionData\": {\"emotion\": \"anger\", \"intensity\": 1.0}}\n```";
        assert!(parse_reply(raw).is_some());
    }

    #[test]
    fn malformed_replies_are_rejected() {
        // Not JSON at all.
        assert!(parse_reply("hello there").is_none());
        // Missing emotionData.
        assert!(parse_reply(r#"{"responseText": "hi"}"#).is_none());
        // Wrong type for intensity.
        assert!(parse_reply(
            r#"{"responseText": "hi", "emotionData": {"emotion": "joy", "intensity": "high"}}"#
        )
        .is_none());
        // Emotion outside the allowed set.
        assert!(parse_reply(
            r#"{"responseText": "hi", "emotionData": {"emotion": "bored", "intensity": 0.5}}"#
        )
        .is_none());
    }

    #[test]
    fn out_of_range_intensity_is_clamped() {
        let raw = r#"{"responseText": "hi", "emotionData": {"emotion": "joy", "intensity": 3.5}}"#;
        let (_, emotion) = parse_reply(raw).unwrap();
        assert_eq!(emotion.intensity, 1.0);
    }

    #[test]
    fn prompt_windows_history_to_last_five_turns() {
        let history: Vec<HistoryTurn> = (0..8)
            .map(|n| HistoryTurn {
                user_message: format!("q{n}"),
                ai_response: format!("a{n}"),
            })
            .collect();

        let prompt = GenerationClient::build_prompt("new question", &history);
        assert!(!prompt.contains("q2"));
        assert!(prompt.contains("q3"));
        assert!(prompt.contains("q7"));
        assert!(prompt.contains("User input: \"new question\""));
    }

    #[test]
    fn prompt_without_history_has_no_context_header() {
        let prompt = GenerationClient::build_prompt("hello", &[]);
        assert!(!prompt.contains("Recent conversation"));
        assert!(prompt.contains("hello"));
    }

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response per expected request, then stops.
    async fn serve_scripted(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = stream.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                        let body_len = headers
                            .lines()
                            .find_map(|l| l.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() >= end + 4 + body_len {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(reply.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        base_url
    }

    fn candidate_body(text: &str) -> String {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
        .to_string()
    }

    fn test_config(base_url: String) -> GenerationConfig {
        GenerationConfig {
            base_url,
            api_key: "test-key".to_string(),
            request_timeout_secs: 5,
            ..GenerationConfig::default()
        }
    }

    const WELL_FORMED: &str =
        r#"{"responseText": "Hello!", "emotionData": {"emotion": "joy", "intensity": 0.8}}"#;

    #[tokio::test]
    async fn successful_primary_reply_reports_its_model() {
        let base_url = serve_scripted(vec![(200, candidate_body(WELL_FORMED))]).await;
        let client = GenerationClient::new(test_config(base_url)).unwrap();

        let reply = client.respond("hi", &[]).await;
        assert_eq!(reply.text, "Hello!");
        assert_eq!(reply.emotion.emotion, Emotion::Joy);
        assert_eq!(reply.meta.model_used, "gemini-2.0-flash");
        assert!(!reply.meta.fallback_used);
        assert_eq!(reply.meta.degraded, None);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_to_the_second_model() {
        let base_url = serve_scripted(vec![
            (500, "{}".to_string()),
            (200, candidate_body(WELL_FORMED)),
        ])
        .await;
        let client = GenerationClient::new(test_config(base_url)).unwrap();

        let reply = client.respond("hi", &[]).await;
        assert_eq!(reply.text, "Hello!");
        assert_eq!(reply.meta.model_used, "gemini-1.5-flash");
        assert!(reply.meta.fallback_used);
        assert_eq!(reply.meta.degraded, None);
        assert_eq!(reply.meta.error, None);
    }

    #[tokio::test]
    async fn unparseable_model_output_degrades_to_the_neutral_reply() {
        let base_url =
            serve_scripted(vec![(200, candidate_body("sorry, plain prose today"))]).await;
        let client = GenerationClient::new(test_config(base_url)).unwrap();

        let reply = client.respond("hi", &[]).await;
        assert_eq!(reply.text, PARSE_FALLBACK_TEXT);
        assert_eq!(reply.emotion.emotion, Emotion::Neutral);
        assert_eq!(reply.emotion.intensity, 0.5);
        assert_eq!(reply.meta.model_used, "gemini-2.0-flash");
        assert!(!reply.meta.fallback_used);
        assert_eq!(reply.meta.degraded, Some(DegradedReason::AnnotationFallback));
    }

    #[tokio::test]
    async fn both_models_failing_yields_the_apology() {
        // Bind then drop so nothing is listening on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut config = test_config(base_url);
        config.request_timeout_secs = 1;
        let client = GenerationClient::new(config).unwrap();

        let reply = client.respond("hi", &[]).await;
        assert_eq!(reply.text, APOLOGY_TEXT);
        assert_eq!(reply.emotion.emotion, Emotion::Neutral);
        assert_eq!(reply.meta.model_used, "none");
        assert!(reply.meta.fallback_used);
        assert_eq!(reply.meta.degraded, Some(DegradedReason::AllModelsFailed));
        assert!(reply.meta.error.is_some());
    }
}
