//! Recognition engine boundary
//!
//! Defines the events a recognizer emits for one attempt and the error
//! codes it may report.

use std::fmt;
use std::str::FromStr;

/// Identifies one recognition attempt. Events carry the attempt they belong to.
pub type AttemptId = u64;

/// Error codes reported by a recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Nothing recognizable was heard
    NoMatch,
    /// No speech before the engine gave up
    SpeechTimeout,
    /// Audio capture failed
    Audio,
    /// Online recognizer could not be reached
    Network,
    /// Online recognizer did not answer in time
    NetworkTimeout,
    /// The offline language pack is not installed
    OfflineUnavailable,
    /// Any code without a dedicated meaning (0 when the number is unknown)
    Unrecognized(i32),
}

impl ErrorCode {
    /// Map a platform recognizer's numeric error code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::NetworkTimeout,
            2 => Self::Network,
            3 => Self::Audio,
            6 => Self::SpeechTimeout,
            7 => Self::NoMatch,
            13 => Self::OfflineUnavailable,
            other => Self::Unrecognized(other),
        }
    }

    /// Human-readable reason shown to the user
    pub fn reason(&self) -> String {
        match self {
            Self::NoMatch => "No speech detected".to_string(),
            Self::SpeechTimeout => "Speech timeout".to_string(),
            Self::Audio => "Audio error".to_string(),
            Self::Network => "Network error (try online mode)".to_string(),
            Self::NetworkTimeout => "Network timeout".to_string(),
            Self::OfflineUnavailable => "Offline language unavailable".to_string(),
            Self::Unrecognized(code) => format!("Error code: {}", code),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch => write!(f, "no-match"),
            Self::SpeechTimeout => write!(f, "speech-timeout"),
            Self::Audio => write!(f, "audio-error"),
            Self::Network => write!(f, "network-error"),
            Self::NetworkTimeout => write!(f, "network-timeout"),
            Self::OfflineUnavailable => write!(f, "offline-engine-unavailable"),
            Self::Unrecognized(code) => write!(f, "unrecognized({})", code),
        }
    }
}

/// Error returned when a code name cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown recognition error code: {0:?}")]
pub struct ErrorCodeParseError(pub String);

impl FromStr for ErrorCode {
    type Err = ErrorCodeParseError;

    /// Accepts kebab-case names or the platform's numeric codes
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if let Ok(code) = name.parse::<i32>() {
            return Ok(Self::from_code(code));
        }

        match name.as_str() {
            "no-match" => Ok(Self::NoMatch),
            "speech-timeout" => Ok(Self::SpeechTimeout),
            "audio" | "audio-error" => Ok(Self::Audio),
            "network" | "network-error" => Ok(Self::Network),
            "network-timeout" => Ok(Self::NetworkTimeout),
            "offline-unavailable" | "offline-engine-unavailable" => Ok(Self::OfflineUnavailable),
            "unrecognized" => Ok(Self::Unrecognized(0)),
            _ => Err(ErrorCodeParseError(s.to_string())),
        }
    }
}

/// What happened during an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEventKind {
    /// Engine is ready for speech
    Ready,
    /// Speech onset detected
    SpeechStart,
    /// Interim hypothesis while speech is in progress
    Partial(String),
    /// Speech ended, result pending
    SpeechEnd,
    /// Final result of the attempt (may be empty)
    Result(String),
    /// Attempt failed
    Error(ErrorCode),
}

/// Event emitted by a recognition engine, tagged with its attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionEvent {
    pub attempt: AttemptId,
    pub kind: RecognitionEventKind,
}

impl RecognitionEvent {
    pub fn new(attempt: AttemptId, kind: RecognitionEventKind) -> Self {
        Self { attempt, kind }
    }

    /// Result and Error end an attempt
    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            RecognitionEventKind::Result(_) | RecognitionEventKind::Error(_)
        )
    }
}

/// A speech recognizer that runs one attempt at a time.
///
/// Both calls are fire-and-forget: outcomes, including failures to start,
/// come back as [`RecognitionEvent`]s on the channel the engine was built with.
pub trait RecognitionEngine: Send + Sync {
    /// Launch an attempt. Replaces any attempt still in flight.
    fn start_attempt(&self, attempt: AttemptId, prefer_offline: bool);

    /// Abandon the attempt in flight, if any, and release capture resources
    fn stop_attempt(&self);

    /// Engine name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_platform_codes() {
        assert_eq!(ErrorCode::from_code(1), ErrorCode::NetworkTimeout);
        assert_eq!(ErrorCode::from_code(7), ErrorCode::NoMatch);
        assert_eq!(ErrorCode::from_code(13), ErrorCode::OfflineUnavailable);
        assert_eq!(ErrorCode::from_code(9), ErrorCode::Unrecognized(9));
    }

    #[test]
    fn test_parse_names_and_numbers() {
        assert_eq!("network-timeout".parse::<ErrorCode>(), Ok(ErrorCode::NetworkTimeout));
        assert_eq!(" No-Match ".parse::<ErrorCode>(), Ok(ErrorCode::NoMatch));
        assert_eq!("offline-engine-unavailable".parse::<ErrorCode>(), Ok(ErrorCode::OfflineUnavailable));
        assert_eq!("6".parse::<ErrorCode>(), Ok(ErrorCode::SpeechTimeout));
        assert_eq!("42".parse::<ErrorCode>(), Ok(ErrorCode::Unrecognized(42)));
        assert!("bogus".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn test_display_roundtrips_named_codes() {
        for code in [
            ErrorCode::NoMatch,
            ErrorCode::SpeechTimeout,
            ErrorCode::Audio,
            ErrorCode::Network,
            ErrorCode::NetworkTimeout,
            ErrorCode::OfflineUnavailable,
        ] {
            assert_eq!(code.to_string().parse::<ErrorCode>(), Ok(code));
        }
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(ErrorCode::NoMatch.reason(), "No speech detected");
        assert_eq!(ErrorCode::Unrecognized(5).reason(), "Error code: 5");
    }

    #[test]
    fn test_terminal_events() {
        assert!(RecognitionEvent::new(1, RecognitionEventKind::Result(String::new())).is_terminal());
        assert!(RecognitionEvent::new(1, RecognitionEventKind::Error(ErrorCode::Audio)).is_terminal());
        assert!(!RecognitionEvent::new(1, RecognitionEventKind::Ready).is_terminal());
    }
}
