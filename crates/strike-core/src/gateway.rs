//! Platform gateways
//!
//! Interfaces to the chat platform consumed by the strike components. The
//! surrounding bot provides the live implementations; tests use fakes.

use crate::error::GatewayError;
use crate::types::{AuditAction, ChannelId, MemberId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;

/// Platform moderation primitives
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModerationGateway: Send + Sync {
    /// Time the member out for `duration`
    async fn timeout(
        &self,
        member: MemberId,
        duration: Duration,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Remove (kick) the member
    async fn remove(&self, member: MemberId, reason: &str) -> Result<(), GatewayError>;

    /// Ban the member
    async fn ban(&self, member: MemberId, reason: &str) -> Result<(), GatewayError>;

    /// Whether the member is currently on the ban list
    async fn is_banned(&self, member: MemberId) -> Result<bool, GatewayError>;
}

/// Audit log entry attributing an administrative action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// Action type
    pub action: AuditAction,
    /// Member the action targeted
    pub target: MemberId,
    /// Member (or bot) that performed the action
    pub actor: MemberId,
    /// When the platform wrote the entry; may lag the action itself
    pub created_at: DateTime<Utc>,
}

/// Eventually-consistent platform audit log
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLogGateway: Send + Sync {
    /// Most recent entry of `action` targeting `subject` written at or after `since`
    async fn query_recent(
        &self,
        action: AuditAction,
        subject: MemberId,
        since: DateTime<Utc>,
    ) -> Result<Option<AuditEntry>, GatewayError>;
}

/// Identity of a prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromptId(pub u64);

/// The two controls attached to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Control {
    /// "Yes": perform the proposed consequence
    Affirm,
    /// "No": abort
    Deny,
}

impl Control {
    /// Component id sent to the platform
    #[must_use]
    pub const fn custom_id(self) -> &'static str {
        match self {
            Self::Affirm => "yes_strike_member",
            Self::Deny => "no_strike_member",
        }
    }

    /// Button label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Affirm => "Yes",
            Self::Deny => "No",
        }
    }
}

/// Prompt to present to moderators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// Where to send the prompt
    pub channel: ChannelId,
    /// Message text
    pub content: String,
    /// Controls to attach, affirmative first
    pub controls: [Control; 2],
}

impl PromptRequest {
    /// Yes/No prompt
    #[inline]
    #[must_use]
    pub fn yes_no(channel: ChannelId, content: impl Into<String>) -> Self {
        Self {
            channel,
            content: content.into(),
            controls: [Control::Affirm, Control::Deny],
        }
    }
}

/// Asynchronous events concerning a sent prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSignal {
    /// A member activated controls on the prompt
    Activated {
        /// Who activated
        by: MemberId,
        /// Controls carried by the activation
        controls: Vec<Control>,
    },
    /// The prompt can no longer be answered (message or channel deleted)
    Invalidated,
}

/// A sent prompt and the stream of its signals
#[derive(Debug)]
pub struct PromptSubscription {
    /// Prompt identity
    pub id: PromptId,
    /// Activation events; closing the channel invalidates the prompt
    pub signals: mpsc::Receiver<PromptSignal>,
}

/// Interactive prompts with two controls
#[async_trait]
pub trait InteractionGateway: Send + Sync {
    /// Send a prompt and subscribe to its control activations
    async fn send_prompt(&self, request: PromptRequest) -> Result<PromptSubscription, GatewayError>;

    /// Replace the prompt content and remove its controls
    async fn edit_prompt(&self, prompt: PromptId, content: &str) -> Result<(), GatewayError>;
}

/// An open direct-message channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectChannel: Send + Sync {
    /// Send a text message
    async fn send(&self, text: &str) -> Result<(), GatewayError>;
}

/// Direct messages to members
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectMessageGateway: Send + Sync {
    /// Open a DM channel; `Unavailable` if the member blocks the bot or left
    async fn open_channel(&self, member: MemberId) -> Result<Box<dyn DirectChannel>, GatewayError>;
}

/// Privileged-role membership lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// Whether the member currently holds the privileged role
    async fn has_privileged_role(&self, member: MemberId) -> Result<bool, GatewayError>;
}
