//! Shared harness for the HTTP integration tests: a real SQLite-backed app
//! with scripted provider fakes.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use companion_providers::{
    InteractionPipeline, MailError, Mailer, Responder, ResponderReply, ReplyMeta, SynthesisError,
    Synthesizer, TranscribeError, Transcriber,
};
use companion_server::{app, AppState};
use companion_types::{EmotionData, HistoryTurn, OtpAction};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// What the fake transcriber "hears" for any audio payload.
pub const TRANSCRIBED_TEXT: &str = "hello from the microphone";

/// One captured outbound mail.
#[derive(Debug, Clone)]
pub struct SentMail {
    pub email: String,
    pub code: Option<String>,
    pub kind: &'static str,
}

/// Mailer fake that records every delivery instead of sending.
#[derive(Clone, Default)]
pub struct CapturingMailer {
    pub sent: Arc<Mutex<Vec<SentMail>>>,
}

impl CapturingMailer {
    /// The most recently delivered OTP code for `email`.
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.email == email && m.code.is_some())
            .and_then(|m| m.code.clone())
    }
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send_otp(&self, email: &str, code: &str, _action: OtpAction) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            email: email.to_string(),
            code: Some(code.to_string()),
            kind: "otp",
        });
        Ok(())
    }

    async fn send_welcome(&self, email: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            email: email.to_string(),
            code: None,
            kind: "welcome",
        });
        Ok(())
    }
}

/// Responder fake returning a fixed reply and annotation.
pub struct ScriptedResponder {
    pub text: String,
    pub emotion: EmotionData,
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(&self, _user_text: &str, _history: &[HistoryTurn]) -> ResponderReply {
        ResponderReply {
            text: self.text.clone(),
            emotion: self.emotion,
            meta: ReplyMeta {
                model_used: "scripted".to_string(),
                fallback_used: false,
                degraded: None,
                error: None,
            },
        }
    }
}

pub struct FixedTranscriber;

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, TranscribeError> {
        Ok(TRANSCRIBED_TEXT.to_string())
    }
}

pub struct FixedSynth(pub Vec<u8>);

#[async_trait]
impl Synthesizer for FixedSynth {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, SynthesisError> {
        Ok(self.0.clone())
    }
}

pub struct FailingSynth;

#[async_trait]
impl Synthesizer for FailingSynth {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, SynthesisError> {
        Err(SynthesisError::EmptyAudio)
    }
}

/// A running test app plus handles to its fakes. The tempfile keeps the
/// SQLite database alive for the duration of the test.
pub struct TestApp {
    pub router: Router,
    pub mailer: CapturingMailer,
    _db_file: tempfile::NamedTempFile,
}

/// Builds an app with the given responder/synthesizer and a fresh database.
pub fn spawn_app(responder: Arc<dyn Responder>, synthesizer: Arc<dyn Synthesizer>) -> TestApp {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let db_path = db_file.path().to_str().unwrap();
    let pool = companion_db::open_pool(db_path, companion_db::PoolSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        companion_db::run_migrations(&conn).unwrap();
    }

    let mailer = CapturingMailer::default();
    let pipeline = Arc::new(InteractionPipeline::new(
        Arc::new(FixedTranscriber),
        responder.clone(),
        synthesizer,
    ));

    let state = AppState {
        pool,
        pipeline,
        responder,
        mailer: Arc::new(mailer.clone()),
        primary_model: "scripted".to_string(),
        jwt_secret: b"integration-test-secret".to_vec(),
        token_ttl_minutes: 60,
    };

    TestApp {
        router: app(state),
        mailer,
        _db_file: db_file,
    }
}

/// An app with a joy-annotating responder and working synthesis.
pub fn default_app() -> TestApp {
    spawn_app(
        Arc::new(ScriptedResponder {
            text: "That's wonderful to hear!".to_string(),
            emotion: EmotionData::new(companion_types::Emotion::Joy, 0.9),
        }),
        Arc::new(FixedSynth(vec![0x4d, 0x50, 0x33])),
    )
}

/// Sends a JSON request and returns (status, parsed body).
pub async fn request_json(
    router: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Registers and activates a user, returning a bearer token.
pub async fn register_and_activate(app: &TestApp, email: &str, password: &str) -> String {
    let (status, _) = request_json(
        &app.router,
        "POST",
        "/api/auth/register",
        None,
        Some(serde_json::json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let code = app.mailer.last_code_for(email).expect("otp not delivered");
    let (status, body) = request_json(
        &app.router,
        "POST",
        "/api/auth/verify-otp",
        None,
        Some(serde_json::json!({ "email": email, "otp_code": code, "action": "register" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().expect("token missing").to_string()
}
