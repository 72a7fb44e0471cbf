//! Speech recognition boundary
//!
//! The controller drives a recognizer through [`RecognitionEngine`] and reads
//! its [`RecognitionEvent`]s from a channel. [`ConsoleRecognizer`] is the
//! terminal-driven engine the daemon ships with.

mod console;
mod engine;

pub use console::ConsoleRecognizer;
pub use engine::{
    AttemptId, ErrorCode, RecognitionEngine, RecognitionEvent, RecognitionEventKind,
};
