//! Recognition error classification

use std::collections::HashSet;

use crate::recognition::ErrorCode;

/// What to do about a recognition error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Launch another attempt with the same settings
    Retry,
    /// Stop preferring offline recognition, then launch another attempt
    FallbackToOnline,
    /// End the session
    Fatal,
}

/// Maps error codes to outcomes
#[derive(Debug, Clone, Default)]
pub struct ErrorPolicy {
    fatal: HashSet<ErrorCode>,
}

impl ErrorPolicy {
    /// Policy that treats `codes` as fatal. The default policy has none.
    pub fn with_fatal_codes<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = ErrorCode>,
    {
        Self {
            fatal: codes.into_iter().collect(),
        }
    }

    pub fn classify(&self, code: ErrorCode, prefer_offline: bool) -> Outcome {
        if self.fatal.contains(&code) {
            return Outcome::Fatal;
        }
        classify(code, prefer_offline)
    }
}

/// Default policy: keep listening no matter what.
///
/// Offline unavailability triggers the one-shot fallback only while offline
/// recognition is still preferred; afterwards it is just another transient error.
pub fn classify(code: ErrorCode, prefer_offline: bool) -> Outcome {
    match code {
        ErrorCode::OfflineUnavailable if prefer_offline => Outcome::FallbackToOnline,
        ErrorCode::OfflineUnavailable
        | ErrorCode::NoMatch
        | ErrorCode::SpeechTimeout
        | ErrorCode::Audio
        | ErrorCode::Network
        | ErrorCode::NetworkTimeout
        | ErrorCode::Unrecognized(_) => Outcome::Retry,
    }
}
