//! speech-relay-daemon: hands-free speech recognition with streaming translation
//!
//! The daemon keeps a recognizer listening, hands every final transcript to a
//! local LLM for translation, and streams the tokens to whoever is watching:
//! - Session controller driving the recognize -> translate -> relaunch loop
//! - Translation via llama.cpp with cancellation of superseded jobs
//! - IPC server for capture control and presentation updates
//!
//! Recognition input comes from stdin, one utterance per line.

mod config;
mod events;
mod ipc;
mod lifecycle;
mod recognition;
mod session;
#[cfg(test)]
mod testing;
mod translation;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TranslationConfig};
use crate::events::{status, BroadcastPresenter, PresentationEvent, Presenter};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::recognition::ConsoleRecognizer;
use crate::session::{ControlCommand, SessionController};
use crate::translation::{LlamaCliTranslator, TranslationEngine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "speech-relay-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        model_dir = ?config.translation.model_dir,
        model_file = %config.translation.model_file,
        prefer_offline = config.recognition.prefer_offline,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    // Create channels for inter-component communication
    // Recognizer -> session controller
    let (recognition_tx, recognition_rx) = mpsc::unbounded_channel();
    // IPC server / startup -> session controller
    let (command_tx, command_rx) = mpsc::channel::<ControlCommand>(32);
    // Core -> log, IPC view and subscribed clients
    let (event_tx, _event_rx) = broadcast::channel::<PresentationEvent>(256);
    let mut presentation_rx = event_tx.subscribe();

    let presenter = Arc::new(BroadcastPresenter::new(event_tx.clone()));
    let translator = Arc::new(LlamaCliTranslator::new(config.translation.clone()));
    let recognizer = Arc::new(ConsoleRecognizer::stdin(
        recognition_tx,
        config.recognition.offline_available,
    ));

    let mut controller = SessionController::new(
        recognizer,
        translator.clone(),
        presenter.clone(),
        &config.recognition,
    );

    // Create IPC server with presentation updates for subscribers
    let server = Server::new(&config.socket_path, command_tx.clone(), event_tx.clone())?;

    // Capture stays disabled until the model is ready
    presenter.set_capture_enabled(false);
    presenter.set_status(status::LOADING_MODEL);
    tokio::spawn(load_model(
        translator,
        presenter,
        config.translation.clone(),
        config.auto_start.then(|| command_tx.clone()),
    ));

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the session controller (processes recognition events and commands)
        _ = controller.run(recognition_rx, command_rx) => {
            info!("session controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Follow presentation updates for the log and the IPC status view
        _ = async {
            loop {
                match presentation_rx.recv().await {
                    Ok(event) => {
                        match &event {
                            PresentationEvent::Status { .. }
                            | PresentationEvent::Transcript { .. }
                            | PresentationEvent::CaptureEnabled { .. } => {
                                info!(%event, "presentation update");
                            }
                            _ => debug!(%event, "presentation update"),
                        }
                        server.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "presentation receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("presentation handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    controller.stop();
    server.shutdown().await;

    info!("speech-relay-daemon stopped");

    Ok(())
}

/// Load the translation model, then enable capture (and optionally start it)
async fn load_model(
    translator: Arc<LlamaCliTranslator>,
    presenter: Arc<BroadcastPresenter>,
    config: TranslationConfig,
    auto_start: Option<mpsc::Sender<ControlCommand>>,
) {
    let model_path = config.model_dir.join(&config.model_file);
    info!(?model_path, engine = translator.name(), "initializing translation engine");

    if let Err(e) = translator
        .initialize(&config.model_dir, &config.model_file)
        .await
    {
        error!(%e, "failed to load translation model");
        presenter.set_status(&status::error(&e.to_string()));
        return;
    }

    info!("translation model ready");
    presenter.set_status(status::READY);
    presenter.set_capture_enabled(true);

    if let Some(commands) = auto_start {
        if commands.send(ControlCommand::Start).await.is_err() {
            warn!("session controller gone, auto start skipped");
        }
    }
}
