//! Speech engine errors

use thiserror::Error;

/// Broad category of a [`SpeechError`].
///
/// Only `Availability` is expected during normal operation; it means "try the
/// next backend". The other classes indicate misuse of the engine contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Availability,
    Value,
    Type,
    NotImplemented,
    Backend,
}

/// Errors raised by speech engines.
#[derive(Debug, Error)]
pub enum SpeechError {
    /// The engine cannot run on this host
    #[error("Synthesizer {engine} is unavailable")]
    Unavailable { engine: String },

    /// The backend refused to use the voice
    #[error("Can not set voice to {0}")]
    InvalidVoice(String),

    /// No installed voice has this id
    #[error("Invalid voice {0}")]
    UnknownVoice(String),

    #[error("The provided rate {0} is out of range")]
    RateOutOfRange(i32),

    #[error("The provided volume level {0} is out of range")]
    VolumeOutOfRange(i32),

    /// The native synthesizer rejected the volume
    #[error("Invalid volume level: {0}")]
    InvalidVolume(String),

    /// The input is not a speech utterance
    #[error("Invalid utterance: {0}")]
    InvalidUtterance(String),

    /// Only bookmark and state events can be bound
    #[error("Event {0} is not supported by this engine")]
    UnsupportedEvent(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl SpeechError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SpeechError::Unavailable { .. } => ErrorClass::Availability,
            SpeechError::InvalidVoice(_)
            | SpeechError::UnknownVoice(_)
            | SpeechError::RateOutOfRange(_)
            | SpeechError::VolumeOutOfRange(_)
            | SpeechError::InvalidVolume(_) => ErrorClass::Value,
            SpeechError::InvalidUtterance(_) => ErrorClass::Type,
            SpeechError::UnsupportedEvent(_) => ErrorClass::NotImplemented,
            SpeechError::Backend(_) => ErrorClass::Backend,
        }
    }

    /// Short kebab-case name, used by the scenario harness and the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            SpeechError::Unavailable { .. } => "unavailable",
            SpeechError::InvalidVoice(_) => "invalid-voice",
            SpeechError::UnknownVoice(_) => "unknown-voice",
            SpeechError::RateOutOfRange(_) => "rate-out-of-range",
            SpeechError::VolumeOutOfRange(_) => "volume-out-of-range",
            SpeechError::InvalidVolume(_) => "invalid-volume",
            SpeechError::InvalidUtterance(_) => "invalid-utterance",
            SpeechError::UnsupportedEvent(_) => "unsupported-event",
            SpeechError::Backend(_) => "backend",
        }
    }
}

pub type Result<T, E = SpeechError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{ErrorClass, SpeechError};

    #[test]
    fn classes_follow_taxonomy() {
        let unavailable = SpeechError::Unavailable {
            engine: "onecore".into(),
        };
        assert_eq!(unavailable.class(), ErrorClass::Availability);
        assert_eq!(SpeechError::RateOutOfRange(101).class(), ErrorClass::Value);
        assert_eq!(SpeechError::UnknownVoice("x".into()).class(), ErrorClass::Value);
        assert_eq!(
            SpeechError::InvalidUtterance("42".into()).class(),
            ErrorClass::Type
        );
        assert_eq!(
            SpeechError::UnsupportedEvent("speech_progress".into()).class(),
            ErrorClass::NotImplemented
        );
    }

    #[test]
    fn backend_errors_keep_their_message() {
        let err = SpeechError::from(anyhow::anyhow!("pipe closed"));
        assert_eq!(err.class(), ErrorClass::Backend);
        assert_eq!(err.to_string(), "pipe closed");
    }
}
