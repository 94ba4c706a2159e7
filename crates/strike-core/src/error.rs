//! Error types for the strike subsystem
//!
//! Provides error handling for:
//! - Invalid strike counts reaching the escalation policy
//! - Persistence failures of the strike ledger
//! - Confirmation protocol violations and interruptions
//! - Platform gateway failures
//! - Configuration loading and validation

use crate::reconciler::ReconcileState;
use crate::types::MemberId;
use std::path::PathBuf;

/// Main strike subsystem error type
#[derive(Debug, thiserror::Error)]
pub enum StrikeError {
    /// Escalation policy received a count outside its domain
    #[error(transparent)]
    InvalidStrikeCount(#[from] InvalidStrikeCountError),

    /// Ledger could not be read or written
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    /// Confirmation protocol failed
    #[error("confirmation failed: {0}")]
    Confirmation(#[from] ConfirmationError),

    /// Platform gateway failed
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Reconciliation attempted a transition its state machine forbids
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransitionError),
}

impl StrikeError {
    /// Check if the moderator may simply retry the command
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_)
                | Self::Confirmation(ConfirmationError::Interrupted)
                | Self::Gateway(GatewayError::Unavailable(_))
        )
    }

    /// Check if the error indicates a bug rather than an operational failure
    #[inline]
    #[must_use]
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidStrikeCount(_)
                | Self::IllegalTransition(_)
                | Self::Confirmation(ConfirmationError::IncompatibleDecision { .. })
        )
    }
}

/// Strike count outside the escalation policy's domain (`count >= 1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid strike count {count}: escalation requires at least one strike")]
pub struct InvalidStrikeCountError {
    /// Offending count
    pub count: u32,
}

/// Reconciliation state change outside the allowed transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal reconcile transition {from:?} -> {to:?}")]
pub struct IllegalTransitionError {
    /// State being left
    pub from: ReconcileState,
    /// Requested state
    pub to: ReconcileState,
}

/// Ledger persistence errors
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Storage backend reported a failure
    #[error("storage backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Stored data could not be decoded
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    /// Background storage task did not complete
    #[error("storage task aborted: {0}")]
    TaskAborted(String),
}

impl PersistenceError {
    /// Wrap a backend error
    #[inline]
    pub fn backend(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(error))
    }
}

/// Confirmation protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ConfirmationError {
    /// An activation carried both controls or neither
    #[error("incompatible decision: {activated} controls activated in a single signal")]
    IncompatibleDecision {
        /// Number of distinct controls in the signal
        activated: usize,
    },

    /// The owning session was torn down while waiting
    #[error("confirmation interrupted by shutdown")]
    Interrupted,

    /// The prompt could not be sent
    #[error("prompt delivery failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Platform gateway errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The bot lacks rank or permission over the subject
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The subject is no longer present in the community
    #[error("member {0} not found")]
    SubjectNotFound(MemberId),

    /// Transport or platform failure
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration is not valid TOML for the schema
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for `{key}`: {reason}")]
    Invalid {
        /// Offending key
        key: &'static str,
        /// Why it is rejected
        reason: String,
    },
}

impl ConfigError {
    /// Create an invalid-value error
    #[inline]
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
