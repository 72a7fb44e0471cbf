//! Events module for the presentation boundary
//!
//! The core never renders anything. It reports status, transcript and
//! translation updates through [`Presenter`], and the daemon turns those into
//! [`PresentationEvent`]s that IPC clients and the log can follow.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Status line texts
pub mod status {
    pub const READY: &str = "Ready";
    pub const LOADING_MODEL: &str = "Loading translation model…";
    pub const LISTENING: &str = "● Listening";
    pub const SPEAK_NOW: &str = "● Listening — speak now";
    pub const HEARING: &str = "● Hearing you…";
    pub const PROCESSING: &str = "● Processing…";
    pub const TRANSLATING: &str = "● Translating…";
    pub const ONLINE_FALLBACK: &str =
        "● Using online recognition (download offline pack for offline use)";

    /// Status shown while recovering from a recognition error
    pub fn retrying(reason: &str) -> String {
        format!("● {} — retrying…", reason)
    }

    /// Status shown for errors that stop capture
    pub fn error(message: &str) -> String {
        format!("Error: {}", message)
    }
}

/// Notifications the core sends to whatever renders its output
pub trait Presenter: Send + Sync {
    fn set_status(&self, text: &str);
    fn append_transcript(&self, text: &str);
    fn append_translation(&self, token: &str);
    fn clear_transcript(&self);
    fn clear_translation(&self);
    fn set_capture_enabled(&self, enabled: bool);
}

/// Presentation updates, in the order the core produced them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresentationEvent {
    /// Status line changed
    Status { text: String },

    /// Text appended to the transcript
    Transcript { text: String },

    /// Token appended to the translation
    Translation { token: String },

    /// Transcript emptied
    TranscriptCleared,

    /// Translation emptied
    TranslationCleared,

    /// Capture became available or unavailable
    CaptureEnabled { enabled: bool },
}

impl std::fmt::Display for PresentationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresentationEvent::Status { text } => write!(f, "STATUS {}", text),
            PresentationEvent::Transcript { text } => write!(f, "TRANSCRIPT {:?}", text),
            PresentationEvent::Translation { token } => write!(f, "TRANSLATION {:?}", token),
            PresentationEvent::TranscriptCleared => write!(f, "TRANSCRIPT_CLEARED"),
            PresentationEvent::TranslationCleared => write!(f, "TRANSLATION_CLEARED"),
            PresentationEvent::CaptureEnabled { enabled } => {
                write!(f, "CAPTURE_ENABLED ({})", enabled)
            }
        }
    }
}

/// Presenter that publishes every call on a broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPresenter {
    event_tx: broadcast::Sender<PresentationEvent>,
}

impl BroadcastPresenter {
    pub fn new(event_tx: broadcast::Sender<PresentationEvent>) -> Self {
        Self { event_tx }
    }

    fn emit(&self, event: PresentationEvent) {
        trace!(%event, "presentation event");
        // No subscribers is fine: nobody is watching yet
        let _ = self.event_tx.send(event);
    }
}

impl Presenter for BroadcastPresenter {
    fn set_status(&self, text: &str) {
        self.emit(PresentationEvent::Status {
            text: text.to_string(),
        });
    }

    fn append_transcript(&self, text: &str) {
        self.emit(PresentationEvent::Transcript {
            text: text.to_string(),
        });
    }

    fn append_translation(&self, token: &str) {
        self.emit(PresentationEvent::Translation {
            token: token.to_string(),
        });
    }

    fn clear_transcript(&self) {
        self.emit(PresentationEvent::TranscriptCleared);
    }

    fn clear_translation(&self) {
        self.emit(PresentationEvent::TranslationCleared);
    }

    fn set_capture_enabled(&self, enabled: bool) {
        self.emit(PresentationEvent::CaptureEnabled { enabled });
    }
}

/// Rendered state obtained by folding presentation events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationView {
    pub status: String,
    pub transcript: String,
    pub translation: String,
    pub capture_enabled: bool,
}

impl PresentationView {
    /// Apply one event to the view
    pub fn apply(&mut self, event: &PresentationEvent) {
        match event {
            PresentationEvent::Status { text } => self.status = text.clone(),
            PresentationEvent::Transcript { text } => self.transcript.push_str(text),
            PresentationEvent::Translation { token } => self.translation.push_str(token),
            PresentationEvent::TranscriptCleared => self.transcript.clear(),
            PresentationEvent::TranslationCleared => self.translation.clear(),
            PresentationEvent::CaptureEnabled { enabled } => self.capture_enabled = *enabled,
        }
    }
}
