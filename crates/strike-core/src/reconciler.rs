//! Manual action reconciliation
//!
//! Moderators sometimes act directly on the platform instead of issuing a
//! strike. The reconciler turns those platform events into strikes so the
//! ledger stays the single record of violations.
//!
//! Each event moves through `Observed -> Correlating -> {Attributed, Unattributed}`:
//!
//! 1. **Observed**: bot subjects, the subsystem's own actions and duplicate
//!    deliveries are filtered out.
//! 2. **Correlating**: the audit log is polled with bounded exponential
//!    backoff for the entry naming the acting moderator.
//! 3. **Attributed** / **Unattributed**: the strike is recorded either way;
//!    an unattributed action is logged as an error.

use crate::config::StrikeConfig;
use crate::error::{IllegalTransitionError, StrikeError};
use crate::gateway::{AuditEntry, AuditLogGateway, ModerationGateway};
use crate::ledger::StrikeLedger;
use crate::notify::NotificationDispatcher;
use crate::policy::{Escalation, EscalationPolicy};
use crate::retry::RetryPolicy;
use crate::shutdown::ShutdownSignal;
use crate::suppression::{CorrelationKey, CorrelationRegistry, SelfActionRegistry};
use crate::types::{ConsequenceTier, MemberId, MemberSnapshot, StrikeRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Reconciliation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileState {
    /// Platform event received
    Observed,
    /// Polling the audit log
    Correlating,
    /// Audit entry found; actor known
    Attributed,
    /// Polling exhausted; actor unknown
    Unattributed,
}

impl ReconcileState {
    /// States reachable from `self`
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [ReconcileState] {
        use ReconcileState::{Attributed, Correlating, Observed, Unattributed};
        match self {
            Observed => &[Correlating],
            Correlating => &[Attributed, Unattributed],
            Attributed | Unattributed => &[],
        }
    }

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Move to `to` if allowed
    ///
    /// # Errors
    /// `IllegalTransitionError` if `to` is not reachable. With the
    /// `strict-debug` feature this panics instead.
    pub fn transition(self, to: ReconcileState) -> Result<ReconcileState, IllegalTransitionError> {
        validate_transition(self, to)?;
        Ok(to)
    }
}

/// Validate a reconcile state transition
///
/// # Errors
/// `IllegalTransitionError` for a transition outside
/// [`ReconcileState::allowed_transitions`].
pub fn validate_transition(
    from: ReconcileState,
    to: ReconcileState,
) -> Result<(), IllegalTransitionError> {
    if from.allowed_transitions().contains(&to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("illegal reconcile transition attempted: {from:?} -> {to:?}");

        #[cfg(not(feature = "strict-debug"))]
        Err(IllegalTransitionError { from, to })
    }
}

/// A moderation action observed on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualActionEvent {
    /// Consequence the action amounts to
    pub kind: ConsequenceTier,
    /// Member the action targeted
    pub subject: MemberId,
    /// When the event was received
    pub observed_at: DateTime<Utc>,
}

impl ManualActionEvent {
    /// Event observed now
    #[must_use]
    pub fn now(kind: ConsequenceTier, subject: MemberId) -> Self {
        Self {
            kind,
            subject,
            observed_at: Utc::now(),
        }
    }
}

/// Why an event was not reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Bots are never struck
    BotSubject,
    /// A member update that did not start a timeout
    NoTimeoutTransition,
    /// A removal caused by a ban; the ban event is reconciled instead
    RemovedByBan,
    /// The ban list could not be checked for a removal
    BanStatusUnknown,
}

/// What was recorded for a reconciled action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The reconciled event
    pub event: ManualActionEvent,
    /// Ledger record after the increment
    pub record: StrikeRecord,
    /// Tier the new count calls for
    pub escalation: Escalation,
    /// Moderator named by the audit log, if found
    pub actor: Option<MemberId>,
    /// Audit log polling rounds used
    pub attempts: usize,
    /// The ledger already held at least as many strikes as the action implies
    pub out_of_sync: bool,
    /// Whether the member was told
    pub notified: bool,
}

/// Result of reconciling one platform event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Filtered out before correlation
    Ignored(IgnoreReason),
    /// Caused by this subsystem's own consequence
    SelfInitiated,
    /// The same action was already reconciled
    Duplicate,
    /// Strike recorded with a known actor
    Attributed(ReconcileReport),
    /// Strike recorded without an actor
    Unattributed(ReconcileReport),
    /// Shut down while correlating; nothing recorded
    Cancelled,
}

impl ReconcileOutcome {
    /// Report of a recorded strike
    #[must_use]
    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            Self::Attributed(report) | Self::Unattributed(report) => Some(report),
            _ => None,
        }
    }
}

/// Result of polling the audit log
enum Correlation {
    Found { entry: AuditEntry, attempts: usize },
    Exhausted { attempts: usize },
    Cancelled,
}

/// Records strikes for moderation actions taken outside the strike command
pub struct ManualActionReconciler {
    ledger: Arc<dyn StrikeLedger>,
    policy: EscalationPolicy,
    audit: Arc<dyn AuditLogGateway>,
    moderation: Arc<dyn ModerationGateway>,
    notifier: Arc<NotificationDispatcher>,
    self_actions: SelfActionRegistry,
    correlations: CorrelationRegistry,
    bot_user_id: Option<MemberId>,
    lookback: Duration,
    dedupe_bucket: Duration,
    suppression_window: Duration,
    retry: RetryPolicy,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for ManualActionReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualActionReconciler")
            .field("bot_user_id", &self.bot_user_id)
            .field("lookback", &self.lookback)
            .field("dedupe_bucket", &self.dedupe_bucket)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ManualActionReconciler {
    /// Create reconciler
    ///
    /// `self_actions` must be the registry the consequence executor marks.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn StrikeLedger>,
        audit: Arc<dyn AuditLogGateway>,
        moderation: Arc<dyn ModerationGateway>,
        notifier: Arc<NotificationDispatcher>,
        self_actions: SelfActionRegistry,
        config: &StrikeConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        let retry = config.audit.retry;
        let correlation_ttl = config.audit.dedupe_bucket() * 2 + retry.total_delay();

        Self {
            ledger,
            policy: EscalationPolicy::new(),
            audit,
            moderation,
            notifier,
            self_actions,
            correlations: CorrelationRegistry::with_ttl(config.suppression.capacity, correlation_ttl),
            bot_user_id: config.bot_user_id,
            lookback: config.audit.lookback(),
            dedupe_bucket: config.audit.dedupe_bucket(),
            suppression_window: config.suppression.ttl(),
            retry,
            shutdown,
        }
    }

    /// Member update: reconciles a timeout that started with this update
    ///
    /// # Errors
    /// As [`ManualActionReconciler::reconcile`].
    pub async fn on_member_update(
        &self,
        before: MemberSnapshot,
        after: MemberSnapshot,
    ) -> Result<ReconcileOutcome, StrikeError> {
        if after.is_bot {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::BotSubject));
        }
        if before.timed_out || !after.timed_out {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::NoTimeoutTransition));
        }
        self.reconcile(ManualActionEvent::now(ConsequenceTier::Timeout, after.id))
            .await
    }

    /// Member left or was kicked; departures caused by a ban are skipped
    ///
    /// # Errors
    /// As [`ManualActionReconciler::reconcile`].
    pub async fn on_member_remove(
        &self,
        member: MemberSnapshot,
    ) -> Result<ReconcileOutcome, StrikeError> {
        if member.is_bot {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::BotSubject));
        }

        let observed = ManualActionEvent::now(ConsequenceTier::Remove, member.id);
        match self.moderation.is_banned(member.id).await {
            Ok(true) => Ok(ReconcileOutcome::Ignored(IgnoreReason::RemovedByBan)),
            Ok(false) => self.reconcile(observed).await,
            Err(e) => {
                tracing::warn!(subject = %member.id, error = %e, "ban status unavailable; removal not reconciled");
                Ok(ReconcileOutcome::Ignored(IgnoreReason::BanStatusUnknown))
            }
        }
    }

    /// Member banned
    ///
    /// # Errors
    /// As [`ManualActionReconciler::reconcile`].
    pub async fn on_member_ban(
        &self,
        member: MemberSnapshot,
    ) -> Result<ReconcileOutcome, StrikeError> {
        if member.is_bot {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::BotSubject));
        }
        self.reconcile(ManualActionEvent::now(ConsequenceTier::Ban, member.id))
            .await
    }

    /// Correlate an event with the audit log and record the strike
    ///
    /// # Errors
    /// `StrikeError::Persistence` if the ledger fails; the event may then
    /// be delivered and reconciled again.
    pub async fn reconcile(&self, event: ManualActionEvent) -> Result<ReconcileOutcome, StrikeError> {
        let ManualActionEvent {
            kind,
            subject,
            observed_at,
        } = event;

        if self
            .self_actions
            .is_self_initiated(subject, kind, observed_at, self.suppression_window)
            .await
        {
            tracing::debug!(subject = %subject, kind = %kind, "own consequence observed");
            return Ok(ReconcileOutcome::SelfInitiated);
        }

        let key = CorrelationKey::new(subject, kind, observed_at, self.dedupe_bucket);
        if !self.correlations.claim(key).await {
            tracing::debug!(subject = %subject, kind = %kind, bucket = key.bucket, "duplicate manual action");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let state = ReconcileState::Observed.transition(ReconcileState::Correlating)?;
        tracing::info!(subject = %subject, kind = %kind, "manual moderation observed");

        let (state, actor, attempts) = match self.correlate(event).await {
            Correlation::Cancelled => {
                self.correlations.release(key).await;
                tracing::info!(subject = %subject, kind = %kind, "reconciliation cancelled by shutdown");
                return Ok(ReconcileOutcome::Cancelled);
            }
            Correlation::Found { entry, attempts } => {
                if self.bot_user_id == Some(entry.actor) {
                    tracing::debug!(subject = %subject, kind = %kind, "audit entry authored by this bot");
                    return Ok(ReconcileOutcome::SelfInitiated);
                }
                (
                    state.transition(ReconcileState::Attributed)?,
                    Some(entry.actor),
                    attempts,
                )
            }
            Correlation::Exhausted { attempts } => {
                (state.transition(ReconcileState::Unattributed)?, None, attempts)
            }
        };

        let record = match self.ledger.increment(subject).await {
            Ok(record) => record,
            Err(e) => {
                self.correlations.release(key).await;
                tracing::error!(subject = %subject, kind = %kind, error = %e, "failed to record manual strike");
                return Err(e.into());
            }
        };
        let escalation = self.policy.consequence_for(record.strike_count)?;
        let prior = record.strike_count.saturating_sub(1);
        let out_of_sync = match kind {
            ConsequenceTier::Ban => prior > ConsequenceTier::Ban.level(),
            ConsequenceTier::Timeout | ConsequenceTier::Remove => prior >= ConsequenceTier::Ban.level(),
        };

        match actor {
            Some(actor) => tracing::info!(
                subject = %subject,
                kind = %kind,
                actor = %actor,
                strikes = record.strike_count,
                attempts,
                "manual moderation attributed"
            ),
            None => tracing::error!(
                subject = %subject,
                kind = %kind,
                strikes = record.strike_count,
                attempts,
                "manual moderation could not be attributed to a moderator"
            ),
        }
        if out_of_sync {
            tracing::warn!(
                subject = %subject,
                kind = %kind,
                prior_strikes = prior,
                "manual action is out of sync with strike count; a ban is suggested"
            );
        }

        let notified = self.notifier.notify(subject, record.strike_count, kind).await;

        let report = ReconcileReport {
            event,
            record,
            escalation,
            actor,
            attempts,
            out_of_sync,
            notified,
        };
        Ok(match state {
            ReconcileState::Attributed => ReconcileOutcome::Attributed(report),
            _ => ReconcileOutcome::Unattributed(report),
        })
    }

    /// Poll every audit action of the event's tier until an entry appears,
    /// the backoff budget is spent, or shutdown is requested
    async fn correlate(&self, event: ManualActionEvent) -> Correlation {
        let since = chrono::Duration::from_std(self.lookback)
            .ok()
            .and_then(|lookback| event.observed_at.checked_sub_signed(lookback))
            .unwrap_or(event.observed_at);
        let delays = self.retry.delays();
        let mut shutdown = self.shutdown.clone();

        if shutdown.is_cancelled() {
            return Correlation::Cancelled;
        }

        for attempt in 1..=delays.len() + 1 {
            if let Some(delay) = attempt.checked_sub(2).and_then(|i| delays.get(i)) {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return Correlation::Cancelled,
                    () = tokio::time::sleep(*delay) => {}
                }
            }

            for action in event.kind.audit_actions() {
                match self.audit.query_recent(*action, event.subject, since).await {
                    Ok(Some(entry)) => return Correlation::Found { entry, attempts: attempt },
                    Ok(None) => {}
                    Err(e) => tracing::warn!(
                        subject = %event.subject,
                        action = ?action,
                        attempt,
                        error = %e,
                        "audit log query failed"
                    ),
                }
            }
            tracing::debug!(subject = %event.subject, kind = %event.kind, attempt, "no audit entry yet");
        }

        Correlation::Exhausted {
            attempts: delays.len() + 1,
        }
    }
}
