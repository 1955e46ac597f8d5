//! Tutor application binary - composition root.
//!
//! 1. Load `.env`, configuration and environment overrides
//! 2. Initialize tracing
//! 3. `serve`: build retrieval, dialogue, speech, then run the axum server
//! 4. `ingest`: add a document to the persisted retrieval index

mod cli;
mod startup;

use std::sync::Arc;

use clap::Parser;

use tutor_api::AppState;
use tutor_chat::DialogueController;
use tutor_core::config::TutorConfig;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    let config_file = args.resolve_config_path();
    let mut config = TutorConfig::load_or_default(&config_file);
    config.apply_env();

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.general.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    tracing::info!("Starting tutor v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    match args.command() {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.general.host = host;
            }
            if let Some(port) = port {
                config.general.port = port;
            }
            serve(config).await
        }
        Command::Ingest { file } => {
            let added = startup::ingest_file(&config, &file).await?;
            println!(
                "Ingested {} chunks from {} into {}",
                added,
                file.display(),
                startup::index_path(&config).display()
            );
            Ok(())
        }
    }
}

async fn serve(config: TutorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let retriever = startup::load_retriever(&config);
    let controller = DialogueController::from_config(&config, retriever);
    if !controller.is_available() {
        tracing::warn!("No generation provider configured; /query, /chat and /ws/chat will report errors");
    }

    let transcriber = startup::build_transcriber(&config);
    let synthesizer = tutor_speech::build_synthesizer(&config.speech)?;
    tracing::info!(backend = synthesizer.name(), "Speech synthesis ready");

    let state = AppState::new(Arc::new(controller), transcriber, synthesizer)
        .with_frame_size(config.speech.frame_size);

    tutor_api::start_server(&config.general.host, config.general.port, state).await?;
    Ok(())
}
