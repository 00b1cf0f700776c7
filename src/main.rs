//! # Duplex Voice Server - Main Application Entry Point
//!
//! Serves a real-time, full-duplex voice conversation over a websocket.
//! Browser audio arrives as Ogg/Opus, is cut into 80 ms frames, tokenized by
//! the Mimi codec, answered by the inference engine one frame at a time, and
//! streamed back as Ogg/Opus.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **frame / protocol**: core data types and the binary wire format
//! - **transport**: channels between the async side and the engine thread
//! - **codec**: the streaming neural audio codec
//! - **engine**: the per-frame inference loop on its own thread
//! - **pipeline**: warmup, bridge tasks and pipeline health
//! - **audio / gateway**: Ogg/Opus handling and the `/api/chat` websocket
//! - **state / health / error**: shared state, health endpoint, error types
//!
//! ## Startup order:
//! The codec and engine are loaded and warmed up before the HTTP server binds,
//! so no client can ever reach a cold pipeline.

mod audio;
mod codec;
mod config;
mod device;
mod engine;
mod error;
mod frame;
mod gateway;
mod health;
mod pipeline;
mod protocol;
mod state;
mod transport;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use device::{DeviceManager, DevicePreference};
use gateway::SessionLock;
use pipeline::{Pipeline, PipelineHealth};
use state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** and refuses to start on invalid settings
/// 2. **Loads the codec and model** on the selected device
/// 3. **Launches the pipeline**: engine thread, warmup, bridge tasks
/// 4. **Serves HTTP** until a signal arrives or the pipeline fails
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting duplex-voice-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let preference: DevicePreference = config
        .models
        .device
        .parse()
        .map_err(anyhow::Error::msg)?;
    let device = DeviceManager::get_device(preference);
    info!("Using {} device", DeviceManager::describe(&device));

    let mimi_file = config
        .models
        .mimi_model_file
        .as_deref()
        .context("models.mimi_model_file is not set")?;
    let codec = Arc::new(codec::MimiCodec::load(
        mimi_file,
        config.models.num_codebooks,
        &device,
    )?);
    let model = engine::model::build(&config.models.engine, config.models.echo_delay_steps)?;
    let tokenizer = engine::TextTokenizer::new(config.models.text_tokenizer_file.as_deref())?;
    info!("Inference model: {}", model.name());

    let health = PipelineHealth::new();
    let audio = Pipeline::launch(codec, model, tokenizer, &config.pipeline, health.clone()).await?;

    let app_state = AppState::new(config.clone(), SessionLock::new(), health.clone(), audio);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(web::scope("/api/v1").route("/health", web::get().to(health::health_check)))
            .route("/health", web::get().to(health::health_check))
            .configure(gateway::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let outcome = tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::Error::from(e).context("server error")),
                Err(e) => Err(anyhow::Error::from(e).context("server task error")),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
            Ok(())
        }
        reason = health.wait_failed() => {
            error!("Pipeline failed, stopping server: {}", reason);
            server_handle.stop(false).await;
            Err(error::PipelineError::EngineFailure(reason).into())
        }
    };

    if outcome.is_ok() {
        info!("Server stopped gracefully");
    }
    outcome
}

/// Initialize the tracing system.
///
/// `RUST_LOG` overrides the default filter
/// `duplex_voice_server=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duplex_voice_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolve on SIGTERM or SIGINT.
///
/// If a handler cannot be installed that signal is simply never observed;
/// Ctrl+C through `tokio::signal::ctrl_c` is the fallback.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => warn!("Failed to install signal handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
}
