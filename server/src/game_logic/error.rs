use thiserror::Error;

use super::model::PhaseKind;
use crate::error::StoreError;

/// Failure of a single lobby action. Reported to the caller only; a failed
/// action never leaves a partially applied lobby behind.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Cannot {action} while the lobby is {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: PhaseKind,
    },
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Already submitted {0} this round")]
    DuplicateSubmission(&'static str),
    #[error("Lobby is full ({capacity} players)")]
    Full { capacity: usize },
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Lobby store failure: {0}")]
    Store(#[from] StoreError),
    #[error("Lobby unavailable: {0}")]
    Unavailable(String),
}

impl GameError {
    /// Stable identifier sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::NotFound(_) => "NOT_FOUND",
            GameError::InvalidPhase { .. } => "INVALID_PHASE",
            GameError::Forbidden(_) => "FORBIDDEN",
            GameError::DuplicateSubmission(_) => "DUPLICATE_SUBMISSION",
            GameError::Full { .. } => "FULL",
            GameError::Validation(_) => "VALIDATION_ERROR",
            GameError::Store(_) => "STORE_FAILURE",
            GameError::Unavailable(_) => "UNAVAILABLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(GameError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(
            GameError::InvalidPhase {
                action: "join",
                phase: PhaseKind::Answering
            }
            .code(),
            "INVALID_PHASE"
        );
        assert_eq!(
            GameError::DuplicateSubmission("an answer").code(),
            "DUPLICATE_SUBMISSION"
        );
        assert_eq!(GameError::Full { capacity: 10 }.code(), "FULL");
    }

    #[test]
    fn test_invalid_phase_message_names_phase() {
        let err = GameError::InvalidPhase {
            action: "join",
            phase: PhaseKind::Voting,
        };
        assert_eq!(err.to_string(), "Cannot join while the lobby is voting");
    }
}
