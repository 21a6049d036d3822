//! External provider clients and the interaction pipeline.
//!
//! Each outbound dependency (batch transcription, text generation, speech
//! synthesis, email delivery) sits behind a trait so the pipeline and the
//! HTTP layer can be exercised with substitutable fakes. The concrete
//! implementations are thin `reqwest` clients with per-call timeouts,
//! constructed once at startup and injected.
//!
//! Failure policy differs per provider. The responder absorbs upstream
//! failures into degraded but valid replies, and the pipeline treats missing
//! synthesis audio the same way. The transcription gateway and mailer
//! surface typed errors instead: there is no safe default transcript and no
//! safe "pretend it sent".

pub mod mail;
pub mod pipeline;
pub mod respond;
pub mod synth;
pub mod transcribe;

pub use mail::{HttpMailer, LogMailer, MailError, Mailer, MailerConfig};
pub use pipeline::{
    InteractionError, InteractionPipeline, InteractionRequest, InteractionResult,
};
pub use respond::{
    DegradedReason, GenerationClient, GenerationConfig, ReplyMeta, Responder, ResponderReply,
};
pub use synth::{SynthesisError, Synthesizer, SynthesizerConfig, VoiceSynthesizer};
pub use transcribe::{
    decode_audio_base64, repair_padding, BatchTranscriber, Transcriber, TranscriberConfig,
    TranscribeError,
};
