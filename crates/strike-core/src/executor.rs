//! Consequence executor
//!
//! Translates a tier into the matching moderation primitive. Every action is
//! marked in the [`SelfActionRegistry`] before the platform call so the
//! platform event it triggers is not mistaken for manual moderation.

use crate::error::GatewayError;
use crate::gateway::ModerationGateway;
use crate::suppression::SelfActionRegistry;
use crate::types::{ConsequenceTier, MemberId};
use chrono::Utc;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Why a consequence was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionCause {
    /// The bot lacks rank or permission over the subject
    PermissionDenied(String),
    /// The subject is no longer in the community
    SubjectNotFound,
    /// The platform call failed
    Unavailable(String),
}

impl Display for RejectionCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied(detail) => write!(f, "missing permission ({detail})"),
            Self::SubjectNotFound => f.write_str("member is no longer present"),
            Self::Unavailable(detail) => write!(f, "platform unavailable ({detail})"),
        }
    }
}

impl From<GatewayError> for RejectionCause {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::PermissionDenied(detail) => Self::PermissionDenied(detail),
            GatewayError::SubjectNotFound(_) => Self::SubjectNotFound,
            GatewayError::Unavailable(detail) => Self::Unavailable(detail),
        }
    }
}

/// Result of applying a consequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The platform accepted the action
    Applied,
    /// The platform refused; not retried
    Rejected(RejectionCause),
}

impl ExecutionOutcome {
    /// Whether the action took effect
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Applies consequence tiers through the moderation gateway
pub struct ConsequenceExecutor {
    moderation: Arc<dyn ModerationGateway>,
    self_actions: SelfActionRegistry,
    timeout_duration: Duration,
}

impl fmt::Debug for ConsequenceExecutor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsequenceExecutor")
            .field("timeout_duration", &self.timeout_duration)
            .finish_non_exhaustive()
    }
}

impl ConsequenceExecutor {
    /// Create executor
    #[must_use]
    pub fn new(
        moderation: Arc<dyn ModerationGateway>,
        self_actions: SelfActionRegistry,
        timeout_duration: Duration,
    ) -> Self {
        Self {
            moderation,
            self_actions,
            timeout_duration,
        }
    }

    /// Apply `tier` to `subject`, passing `reason` to the platform audit trail
    pub async fn apply(&self, tier: ConsequenceTier, subject: MemberId, reason: &str) -> ExecutionOutcome {
        self.self_actions.mark(subject, tier, Utc::now()).await;

        let result = match tier {
            ConsequenceTier::Timeout => {
                self.moderation
                    .timeout(subject, self.timeout_duration, reason)
                    .await
            }
            ConsequenceTier::Remove => self.moderation.remove(subject, reason).await,
            ConsequenceTier::Ban => self.moderation.ban(subject, reason).await,
        };

        match result {
            Ok(()) => {
                tracing::info!(subject = %subject, tier = %tier, "consequence applied");
                ExecutionOutcome::Applied
            }
            Err(e) => {
                self.self_actions.forget(subject, tier).await;
                tracing::warn!(subject = %subject, tier = %tier, error = %e, "consequence rejected");
                ExecutionOutcome::Rejected(e.into())
            }
        }
    }
}
