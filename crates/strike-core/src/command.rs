//! Moderator-initiated strikes
//!
//! [`StrikeCommand::issue_strike`] proposes the consequence for the
//! subject's next strike, waits for confirmation and only then records the
//! strike, notifies the member and applies the consequence.

use crate::confirmation::{ConfirmationProtocol, ConfirmationRequest, Decision};
use crate::error::StrikeError;
use crate::executor::{ConsequenceExecutor, ExecutionOutcome, RejectionCause};
use crate::gateway::{PromptId, RoleResolver};
use crate::ledger::StrikeLedger;
use crate::notify::NotificationDispatcher;
use crate::policy::{AnomalousStrikeCountWarning, EscalationPolicy};
use crate::types::{ChannelId, ConsequenceTier, MemberId, MemberSnapshot, StrikeRecord};
use std::fmt::Write as _;
use std::sync::Arc;

/// A moderator's request to strike a member
#[derive(Debug, Clone)]
pub struct StrikeRequest {
    /// Moderator issuing the strike
    pub invoker: MemberId,
    /// Where the command was issued; the prompt goes here
    pub channel: ChannelId,
    /// Member to strike
    pub subject: MemberSnapshot,
    /// Free-text reason, forwarded to the platform audit trail
    pub reason: String,
}

/// Why a strike was refused before prompting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// Bots are never struck
    SubjectIsBot,
    /// The invoker does not hold the privileged role
    InvokerNotPrivileged,
}

/// Result of a strike command, reported back to the moderator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrikeOutcome {
    /// Strike recorded and consequence applied
    Applied {
        /// Struck member
        subject: MemberId,
        /// Consequence applied
        tier: ConsequenceTier,
        /// Ledger record after the strike
        record: StrikeRecord,
        /// Present when the count exceeded the highest tier
        anomaly: Option<AnomalousStrikeCountWarning>,
        /// Whether the member was told
        notified: bool,
    },
    /// Strike recorded but the platform refused the consequence
    Rejected {
        /// Struck member
        subject: MemberId,
        /// Consequence attempted
        tier: ConsequenceTier,
        /// Ledger record after the strike
        record: StrikeRecord,
        /// Why the platform refused
        cause: RejectionCause,
        /// Present when the count exceeded the highest tier
        anomaly: Option<AnomalousStrikeCountWarning>,
        /// Whether the member was told
        notified: bool,
    },
    /// The moderator declined; nothing recorded
    Cancelled {
        /// Member that would have been struck
        subject: MemberId,
        /// Consequence that was proposed
        tier: ConsequenceTier,
    },
    /// Nobody decided in time; nothing recorded
    TimedOut {
        /// Member that would have been struck
        subject: MemberId,
        /// Consequence that was proposed
        tier: ConsequenceTier,
    },
    /// Refused before prompting; nothing recorded
    Refused {
        /// Member named in the request
        subject: MemberId,
        /// Why
        reason: RefusalReason,
    },
}

impl StrikeOutcome {
    /// Text reported to the invoking moderator
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Applied {
                subject,
                tier,
                record,
                anomaly,
                ..
            } => {
                let mut text = format!(
                    "Successfully performed {} action on <@{subject}>. They now have {} strike{}.",
                    tier.verb(),
                    record.strike_count,
                    plural(record.strike_count)
                );
                push_anomaly(&mut text, *anomaly);
                text
            }
            Self::Rejected {
                subject,
                tier,
                record,
                cause,
                anomaly,
                ..
            } => {
                let mut text = format!(
                    "Increased <@{subject}>'s strikes to {}, but the {} action failed: {cause}.",
                    record.strike_count,
                    tier.verb()
                );
                push_anomaly(&mut text, *anomaly);
                text
            }
            Self::Cancelled { subject, tier } => {
                format!("Aborted performing {} action on <@{subject}>.", tier.verb())
            }
            Self::TimedOut { subject, tier } => format!(
                "No decision was made in time; {} action on <@{subject}> was not performed.",
                tier.verb()
            ),
            Self::Refused {
                reason: RefusalReason::SubjectIsBot,
                ..
            } => "Member cannot be given an additional strike because they are a bot.".to_string(),
            Self::Refused {
                reason: RefusalReason::InvokerNotPrivileged,
                ..
            } => "Only members with the privileged role may issue strikes.".to_string(),
        }
    }

    /// Whether a strike was recorded
    #[inline]
    #[must_use]
    pub fn recorded(&self) -> Option<&StrikeRecord> {
        match self {
            Self::Applied { record, .. } | Self::Rejected { record, .. } => Some(record),
            _ => None,
        }
    }
}

fn plural(count: u32) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn push_anomaly(text: &mut String, anomaly: Option<AnomalousStrikeCountWarning>) {
    if let Some(anomaly) = anomaly {
        let _ = write!(text, "\nWarning: {anomaly}.");
    }
}

/// Orchestrates the moderator-initiated strike path
pub struct StrikeCommand {
    ledger: Arc<dyn StrikeLedger>,
    policy: EscalationPolicy,
    roles: Arc<dyn RoleResolver>,
    confirmation: Arc<ConfirmationProtocol>,
    executor: Arc<ConsequenceExecutor>,
    notifier: Arc<NotificationDispatcher>,
}

impl std::fmt::Debug for StrikeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrikeCommand")
            .field("confirmation", &self.confirmation)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl StrikeCommand {
    /// Create the command
    #[must_use]
    pub fn new(
        ledger: Arc<dyn StrikeLedger>,
        roles: Arc<dyn RoleResolver>,
        confirmation: Arc<ConfirmationProtocol>,
        executor: Arc<ConsequenceExecutor>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            ledger,
            policy: EscalationPolicy::new(),
            roles,
            confirmation,
            executor,
            notifier,
        }
    }

    /// Propose, confirm and carry out one strike
    ///
    /// # Errors
    /// - `StrikeError::Gateway` if the invoker's role cannot be checked
    /// - `StrikeError::Persistence` if the ledger fails; the moderator
    ///   should retry
    /// - `StrikeError::Confirmation` if the prompt cannot be sent, the
    ///   protocol is violated or the session shuts down while waiting
    pub async fn issue_strike(&self, request: StrikeRequest) -> Result<StrikeOutcome, StrikeError> {
        let subject = request.subject.id;

        if request.subject.is_bot {
            return Ok(StrikeOutcome::Refused {
                subject,
                reason: RefusalReason::SubjectIsBot,
            });
        }
        if !self.roles.has_privileged_role(request.invoker).await? {
            tracing::info!(invoker = %request.invoker, subject = %subject, "strike refused: invoker not privileged");
            return Ok(StrikeOutcome::Refused {
                subject,
                reason: RefusalReason::InvokerNotPrivileged,
            });
        }

        let current = self
            .ledger
            .get(subject)
            .await?
            .map_or(0, |record| record.strike_count);
        let proposed_count = current.saturating_add(1);
        let proposal = self.policy.consequence_for(proposed_count)?;
        let tier = proposal.tier;
        if let Some(anomaly) = proposal.anomaly {
            tracing::warn!(subject = %subject, count = anomaly.count, "anomalous strike count");
        }

        let resolution = self
            .confirmation
            .confirm(ConfirmationRequest {
                invoker: request.invoker,
                subject,
                proposed: tier,
                channel: request.channel,
                content: prompt_text(subject, proposed_count, tier, proposal.anomaly),
            })
            .await?;

        match resolution.decision {
            Decision::Cancelled => {
                let outcome = StrikeOutcome::Cancelled { subject, tier };
                self.report(resolution.prompt, &outcome.summary()).await;
                Ok(outcome)
            }
            Decision::TimedOut => Ok(StrikeOutcome::TimedOut { subject, tier }),
            Decision::Confirmed => {
                let outcome = self
                    .carry_out(&request, tier, proposed_count, resolution.prompt)
                    .await?;
                self.report(resolution.prompt, &outcome.summary()).await;
                Ok(outcome)
            }
        }
    }

    async fn carry_out(
        &self,
        request: &StrikeRequest,
        tier: ConsequenceTier,
        proposed_count: u32,
        prompt: PromptId,
    ) -> Result<StrikeOutcome, StrikeError> {
        let subject = request.subject.id;

        let record = match self.ledger.increment(subject).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(subject = %subject, error = %e, "failed to record strike");
                self.report(
                    prompt,
                    &format!("Failed to record a strike for <@{subject}>; no action was taken. Please retry."),
                )
                .await;
                return Err(e.into());
            }
        };
        if record.strike_count != proposed_count {
            tracing::warn!(
                subject = %subject,
                proposed = proposed_count,
                recorded = record.strike_count,
                "strike count changed while awaiting confirmation; applying the confirmed consequence"
            );
        }
        let anomaly = self.policy.consequence_for(record.strike_count)?.anomaly;

        let notified = self.notifier.notify(subject, record.strike_count, tier).await;

        let reason = format!(
            "strike {} issued by {}: {}",
            record.strike_count, request.invoker, request.reason
        );
        let outcome = match self.executor.apply(tier, subject, &reason).await {
            ExecutionOutcome::Applied => StrikeOutcome::Applied {
                subject,
                tier,
                record,
                anomaly,
                notified,
            },
            ExecutionOutcome::Rejected(cause) => StrikeOutcome::Rejected {
                subject,
                tier,
                record,
                cause,
                anomaly,
                notified,
            },
        };
        Ok(outcome)
    }

    async fn report(&self, prompt: PromptId, content: &str) {
        if let Err(e) = self.confirmation.interactions().edit_prompt(prompt, content).await {
            tracing::warn!(prompt = prompt.0, error = %e, "failed to update prompt");
        }
    }
}

/// Question put to the moderator
fn prompt_text(
    subject: MemberId,
    proposed_count: u32,
    tier: ConsequenceTier,
    anomaly: Option<AnomalousStrikeCountWarning>,
) -> String {
    match anomaly {
        None => format!(
            "Confirming will increase <@{subject}>'s strikes to {proposed_count}.\n\
             The suggested moderation action is to {} the member. \
             Would you like me to perform this action for you?",
            tier.verb()
        ),
        Some(anomaly) => format!(
            "Confirming will increase <@{subject}>'s strikes to {proposed_count}. Warning: {anomaly}.\n\
             Having more than {} strikes suggests that the member should be banned. \
             Would you like me to perform this action for you?",
            ConsequenceTier::Ban.level()
        ),
    }
}
