//! Companion server binary.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, provider wiring, and graceful shutdown on SIGTERM/SIGINT.

use companion_providers::{
    BatchTranscriber, GenerationClient, GenerationConfig, HttpMailer, InteractionPipeline,
    LogMailer, Mailer, MailerConfig, Responder, SynthesizerConfig, TranscriberConfig,
    VoiceSynthesizer,
};
use companion_server::{app, config, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("COMPANION_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = companion_db::open_pool(
        &config.database.path,
        companion_db::PoolSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            max_connections: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            companion_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Wire up the provider clients
    let transcriber = BatchTranscriber::new(TranscriberConfig {
        base_url: config.providers.transcription.base_url.clone(),
        api_key: config.providers.transcription.api_key.clone(),
        poll_interval_ms: config.providers.transcription.poll_interval_ms,
        max_poll_attempts: config.providers.transcription.max_poll_attempts,
        ..TranscriberConfig::default()
    })
    .expect("failed to build transcription client");

    let responder: Arc<dyn Responder> = Arc::new(
        GenerationClient::new(GenerationConfig {
            base_url: config.providers.generation.base_url.clone(),
            api_key: config.providers.generation.api_key.clone(),
            primary_model: config.providers.generation.primary_model.clone(),
            fallback_model: config.providers.generation.fallback_model.clone(),
            ..GenerationConfig::default()
        })
        .expect("failed to build generation client"),
    );

    let synthesizer = VoiceSynthesizer::new(SynthesizerConfig {
        base_url: config.providers.synthesis.base_url.clone(),
        api_key: config.providers.synthesis.api_key.clone(),
        voice_id: config.providers.synthesis.voice_id.clone(),
        model_id: config.providers.synthesis.model_id.clone(),
        ..SynthesizerConfig::default()
    })
    .expect("failed to build synthesis client");

    let mailer: Arc<dyn Mailer> = if config.providers.mail.enabled {
        Arc::new(
            HttpMailer::new(MailerConfig {
                base_url: config.providers.mail.base_url.clone(),
                api_key: config.providers.mail.api_key.clone(),
                from_address: config.providers.mail.from_address.clone(),
                ..MailerConfig::default()
            })
            .expect("failed to build mail client"),
        )
    } else {
        tracing::warn!("mail delivery disabled; verification codes will be logged");
        Arc::new(LogMailer)
    };

    let pipeline = Arc::new(InteractionPipeline::new(
        Arc::new(transcriber),
        responder.clone(),
        Arc::new(synthesizer),
    ));

    let state = AppState {
        pool,
        pipeline,
        responder,
        mailer,
        primary_model: config.providers.generation.primary_model.clone(),
        jwt_secret: config.auth.jwt_secret.clone().into_bytes(),
        token_ttl_minutes: config.auth.token_ttl_minutes,
    };

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting companion server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("companion server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
