//! Error types for the effect runtime.

use std::fmt;

use thiserror::Error;

use crate::effect::EffectKey;

/// Why a captured continuation could not be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseError {
    /// Resumed from a different thread than the one that captured it.
    ForeignThread,
    /// The execution-unit primitive backing the replay could not be
    /// rebuilt or was torn down mid-rewind.
    TornDown,
    /// The body did not replay the same sequence of suspensions that was
    /// recorded at capture time.
    Diverged,
}

impl fmt::Display for ReuseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReuseError::ForeignThread => {
                write!(f, "resumed from a different thread than it was captured on")
            }
            ReuseError::TornDown => {
                write!(f, "execution resources were torn down before resume")
            }
            ReuseError::Diverged => {
                write!(f, "body diverged from the recorded suspension sequence")
            }
        }
    }
}

/// Errors surfaced by `capture`, `perform`, `escape`, and continuation
/// resumption.
///
/// All variants are unrecoverable at the point of occurrence and surface
/// to the nearest caller able to decide; nothing is suppressed silently.
#[derive(Debug, Clone, Error)]
pub enum EffectError {
    /// No handler matched anywhere on the context chain.
    #[error("no handler for effect `{0}`")]
    Unhandled(EffectKey),

    /// `perform` or a context lookup ran with no capture scope active on
    /// this thread.
    #[error("no effect context is active on this thread")]
    ContextMissing,

    /// `escape` ran with no enclosing capture scope.
    #[error("escape called outside of any capture scope")]
    EscapeOutsideCapture,

    /// A captured continuation could not be replayed.
    #[error("continuation cannot be resumed: {0}")]
    ContinuationReuse(ReuseError),

    /// A handler (or an effect's attached block) reported a failure of its
    /// own. These pass through `perform` like any call failure.
    #[error("handler failure: {message}")]
    HandlerFailure {
        /// Description of the failure.
        message: String,
    },

    /// The suspension protocol was violated. Indicates a bug in the
    /// engine or a body thread that died outside the protocol.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violation.
        message: String,
    },
}

impl EffectError {
    /// Wrap an arbitrary failure raised by a handler.
    pub fn failure(message: impl fmt::Display) -> Self {
        EffectError::HandlerFailure {
            message: message.to_string(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        EffectError::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is an unhandled-effect failure.
    pub fn is_unhandled(&self) -> bool {
        matches!(self, EffectError::Unhandled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EffectError::Unhandled(EffectKey::name("missing"));
        assert!(err.to_string().contains("no handler for effect `missing`"));

        let err = EffectError::ContinuationReuse(ReuseError::ForeignThread);
        assert!(err.to_string().contains("different thread"));

        let err = EffectError::failure("boom");
        assert!(err.to_string().contains("handler failure: boom"));
    }

    #[test]
    fn test_is_unhandled() {
        assert!(EffectError::Unhandled(EffectKey::name("x")).is_unhandled());
        assert!(!EffectError::ContextMissing.is_unhandled());
    }
}
