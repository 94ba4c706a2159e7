//! Strike system facade
//!
//! Wires the components to one set of gateways and exposes the two entry
//! points the surrounding bot calls: the strike command and the manual
//! action event handlers.

use crate::command::{StrikeCommand, StrikeOutcome, StrikeRequest};
use crate::config::StrikeConfig;
use crate::confirmation::ConfirmationProtocol;
use crate::error::StrikeError;
use crate::executor::ConsequenceExecutor;
use crate::gateway::{
    AuditLogGateway, DirectMessageGateway, InteractionGateway, ModerationGateway, RoleResolver,
};
use crate::ledger::StrikeLedger;
use crate::notify::NotificationDispatcher;
use crate::reconciler::{ManualActionReconciler, ReconcileOutcome};
use crate::shutdown::ShutdownSignal;
use crate::suppression::SelfActionRegistry;
use crate::types::MemberSnapshot;
use async_trait::async_trait;
use std::sync::Arc;

/// Platform gateways the strike system talks to
#[derive(Clone)]
pub struct Gateways {
    /// Moderation primitives
    pub moderation: Arc<dyn ModerationGateway>,
    /// Audit log
    pub audit: Arc<dyn AuditLogGateway>,
    /// Prompts and their controls
    pub interactions: Arc<dyn InteractionGateway>,
    /// Direct messages
    pub direct_messages: Arc<dyn DirectMessageGateway>,
    /// Privileged role membership
    pub roles: Arc<dyn RoleResolver>,
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateways").finish_non_exhaustive()
    }
}

/// Platform events that may indicate manual moderation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualTrigger {
    /// A member's state changed
    MemberUpdated {
        /// State before the update
        before: MemberSnapshot,
        /// State after the update
        after: MemberSnapshot,
    },
    /// A member left or was removed
    MemberRemoved(MemberSnapshot),
    /// A member was banned
    MemberBanned(MemberSnapshot),
}

/// Operations exposed to the command and event dispatch layers
#[async_trait]
pub trait StrikeService: Send + Sync {
    /// Moderator-initiated strike
    async fn issue_strike(&self, request: StrikeRequest) -> Result<StrikeOutcome, StrikeError>;

    /// Platform event that may be manual moderation
    async fn handle_manual_action(
        &self,
        trigger: ManualTrigger,
    ) -> Result<ReconcileOutcome, StrikeError>;
}

/// Complete strike subsystem
pub struct StrikeSystem {
    ledger: Arc<dyn StrikeLedger>,
    confirmation: Arc<ConfirmationProtocol>,
    command: StrikeCommand,
    reconciler: ManualActionReconciler,
}

impl std::fmt::Debug for StrikeSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrikeSystem")
            .field("command", &self.command)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl StrikeSystem {
    /// Wire the subsystem
    ///
    /// The executor and the reconciler share one self-initiated action
    /// registry so the bot's own consequences are not counted twice.
    #[must_use]
    pub fn new(
        config: &StrikeConfig,
        ledger: Arc<dyn StrikeLedger>,
        gateways: Gateways,
        shutdown: ShutdownSignal,
    ) -> Self {
        let self_actions =
            SelfActionRegistry::with_ttl(config.suppression.capacity, config.suppression.ttl());

        let confirmation = Arc::new(ConfirmationProtocol::new(
            gateways.interactions,
            Arc::clone(&gateways.roles),
            config.confirmation_wait(),
            shutdown.clone(),
        ));
        let executor = Arc::new(ConsequenceExecutor::new(
            Arc::clone(&gateways.moderation),
            self_actions.clone(),
            config.timeout_duration(),
        ));
        let notifier = Arc::new(NotificationDispatcher::new(
            gateways.direct_messages,
            config.notification.clone(),
        ));

        let command = StrikeCommand::new(
            Arc::clone(&ledger),
            gateways.roles,
            Arc::clone(&confirmation),
            executor,
            Arc::clone(&notifier),
        );
        let reconciler = ManualActionReconciler::new(
            Arc::clone(&ledger),
            gateways.audit,
            gateways.moderation,
            notifier,
            self_actions,
            config,
            shutdown,
        );

        tracing::info!(
            confirmation_wait_secs = config.confirmation_wait_secs,
            audit_attempts = config.audit.retry.max_attempts(),
            "strike system ready"
        );

        Self {
            ledger,
            confirmation,
            command,
            reconciler,
        }
    }

    /// The ledger strikes are recorded in
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn StrikeLedger> {
        &self.ledger
    }

    /// The confirmation protocol, for inspecting pending prompts
    #[inline]
    #[must_use]
    pub fn confirmation(&self) -> &ConfirmationProtocol {
        &self.confirmation
    }

    /// The manual action reconciler
    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> &ManualActionReconciler {
        &self.reconciler
    }
}

#[async_trait]
impl StrikeService for StrikeSystem {
    async fn issue_strike(&self, request: StrikeRequest) -> Result<StrikeOutcome, StrikeError> {
        self.command.issue_strike(request).await
    }

    async fn handle_manual_action(
        &self,
        trigger: ManualTrigger,
    ) -> Result<ReconcileOutcome, StrikeError> {
        match trigger {
            ManualTrigger::MemberUpdated { before, after } => {
                self.reconciler.on_member_update(before, after).await
            }
            ManualTrigger::MemberRemoved(member) => self.reconciler.on_member_remove(member).await,
            ManualTrigger::MemberBanned(member) => self.reconciler.on_member_ban(member).await,
        }
    }
}
