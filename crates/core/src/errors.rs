use thiserror::Error;

use crate::flows::TransitionError;
use crate::ports::TemplateError;
use crate::registry::RegistryError;

/// Wiring or state-machine faults. None of these are caused by what the user typed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueError {
    #[error("no active session with id `{0}`")]
    UnknownSession(String),
    #[error("session `{0}` is closed")]
    SessionClosed(String),
    #[error("session `{0}` is still processing the previous turn")]
    TurnInProgress(String),
    #[error("active session limit of {limit} reached")]
    SessionLimitReached { limit: usize },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl From<TransitionError> for DialogueError {
    fn from(value: TransitionError) -> Self {
        Self::Domain(DomainError::Transition(value))
    }
}

impl From<RegistryError> for DialogueError {
    fn from(value: RegistryError) -> Self {
        Self::Domain(DomainError::Registry(value))
    }
}

impl DialogueError {
    /// Fatal errors mean broken wiring; the transport should drop the session rather
    /// than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Domain(_) | Self::Template(_))
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) | Self::SessionClosed(_) => {
                "This conversation has ended. Start a new one to get more recommendations."
            }
            Self::TurnInProgress(_) => "Still working on your last message, one moment please.",
            Self::SessionLimitReached { .. } => {
                "The adviser is busy right now. Please try again shortly."
            }
            Self::Domain(_) | Self::Template(_) => "An unexpected internal error occurred.",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{DialogueError, DomainError};
    use crate::flows::{DialogueEvent, DialoguePhase, TransitionError};
    use crate::ports::TemplateError;
    use crate::registry::RegistryError;

    #[test]
    fn transition_error_maps_to_fatal_domain_error() {
        let error = DialogueError::from(TransitionError::InvalidTransition {
            state: DialoguePhase::Closed,
            event: DialogueEvent::SessionStarted,
        });

        assert!(matches!(error, DialogueError::Domain(DomainError::Transition(_))));
        assert!(error.is_fatal());
        assert_eq!(error.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn registry_lookup_failure_is_fatal() {
        let error = DialogueError::from(RegistryError::UnknownSlot("budget".to_owned()));
        assert!(error.is_fatal());
        assert!(error.to_string().contains("budget"));
    }

    #[test]
    fn missing_template_is_fatal() {
        let error = DialogueError::from(TemplateError::Missing("reqmore".to_owned()));
        assert!(error.is_fatal());
    }

    #[test]
    fn session_errors_are_recoverable_with_user_safe_messages() {
        let busy = DialogueError::TurnInProgress("abc".to_owned());
        assert!(!busy.is_fatal());
        assert_eq!(busy.user_message(), "Still working on your last message, one moment please.");

        let limit = DialogueError::SessionLimitReached { limit: 4 };
        assert!(!limit.is_fatal());
        assert_eq!(limit.to_string(), "active session limit of 4 reached");
    }
}
