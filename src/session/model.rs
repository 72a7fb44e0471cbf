//! Session data model

use serde::{Deserialize, Serialize};

use crate::recognition::AttemptId;

/// Where the recognition loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session running
    Idle,
    /// Attempt launched, waiting for the engine to get ready
    Starting,
    /// Engine ready, waiting for speech
    Listening,
    /// Speech in progress
    Hearing,
    /// Speech ended, waiting for the result
    Processing,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Starting => write!(f, "Starting"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::Hearing => write!(f, "Hearing"),
            SessionState::Processing => write!(f, "Processing"),
        }
    }
}

impl SessionState {
    /// Whether an engine lifecycle event may move the machine from `self` to `target`.
    ///
    /// Relaunching (`Starting`) and stopping (`Idle`) are allowed from anywhere.
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        matches!(
            (self, target),
            (_, SessionState::Starting)
                | (_, SessionState::Idle)
                | (SessionState::Starting, SessionState::Listening)
                | (SessionState::Listening, SessionState::Hearing)
                // Some engines report speech before readiness
                | (SessionState::Starting, SessionState::Hearing)
                | (SessionState::Hearing, SessionState::Processing)
        )
    }
}

/// One hands-free capture lifecycle, from start to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: u64,
    pub state: SessionState,
    /// Ask the recognizer for offline recognition. Only ever goes true -> false.
    pub prefer_offline: bool,
    pub active: bool,
    /// Attempt whose events are currently accepted
    pub attempt: AttemptId,
}

impl Session {
    pub fn new(id: u64, prefer_offline: bool) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            prefer_offline,
            active: true,
            attempt: 0,
        }
    }

    /// Drop the offline preference. Returns false if it was already dropped.
    pub fn fall_back_to_online(&mut self) -> bool {
        std::mem::replace(&mut self.prefer_offline, false)
    }
}

/// A finalized piece of recognized speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub sequence: u64,
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub active: bool,
    pub prefer_offline: bool,
    pub session_id: Option<u64>,
    /// Utterances handed to translation since the daemon started
    pub utterances: u64,
}
