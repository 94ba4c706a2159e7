//! Confirmation protocol
//!
//! Presents a proposed consequence to moderators and waits for exactly one
//! outcome: a control activation by an authorised moderator, the wait bound
//! elapsing, the prompt being invalidated, or the session shutting down.
//!
//! Pending prompts live in memory only. A process restart drops them; the
//! moderator re-issues the command.

use crate::error::{ConfirmationError, GatewayError};
use crate::gateway::{
    Control, InteractionGateway, PromptId, PromptRequest, PromptSignal, RoleResolver,
};
use crate::shutdown::ShutdownSignal;
use crate::types::{ChannelId, ConsequenceTier, MemberId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Deadline used when the wait bound does not fit the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Outcome of a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The affirmative control was activated
    Confirmed,
    /// The negative control was activated, or the prompt was invalidated
    Cancelled,
    /// Nobody decided within the wait bound
    TimedOut,
}

/// A decision and where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// The prompt that was answered
    pub prompt: PromptId,
    /// What was decided
    pub decision: Decision,
    /// Moderator who activated a control, if any
    pub resolved_by: Option<MemberId>,
}

/// A prompt awaiting a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    /// Moderator who issued the command
    pub invoker: MemberId,
    /// Member the consequence targets
    pub subject: MemberId,
    /// Consequence awaiting confirmation
    pub proposed: ConsequenceTier,
    /// When the prompt was sent
    pub created_at: DateTime<Utc>,
}

/// What a prompt asks and of whom
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    /// Moderator who issued the command
    pub invoker: MemberId,
    /// Member the consequence targets
    pub subject: MemberId,
    /// Consequence awaiting confirmation
    pub proposed: ConsequenceTier,
    /// Where to send the prompt
    pub channel: ChannelId,
    /// Prompt text
    pub content: String,
}

/// Removes the pending entry however the wait ends, including when the
/// waiting future is dropped
struct PendingGuard<'a> {
    pending: &'a DashMap<PromptId, PendingConfirmation>,
    prompt: PromptId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.prompt);
    }
}

/// Human-in-the-loop confirmation of proposed consequences
pub struct ConfirmationProtocol {
    interactions: Arc<dyn InteractionGateway>,
    roles: Arc<dyn RoleResolver>,
    wait_bound: Duration,
    shutdown: ShutdownSignal,
    pending: DashMap<PromptId, PendingConfirmation>,
}

impl std::fmt::Debug for ConfirmationProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationProtocol")
            .field("wait_bound", &self.wait_bound)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ConfirmationProtocol {
    /// Create the protocol
    #[must_use]
    pub fn new(
        interactions: Arc<dyn InteractionGateway>,
        roles: Arc<dyn RoleResolver>,
        wait_bound: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            interactions,
            roles,
            wait_bound,
            shutdown,
            pending: DashMap::new(),
        }
    }

    /// Prompt currently awaiting a decision
    #[must_use]
    pub fn pending(&self, prompt: PromptId) -> Option<PendingConfirmation> {
        self.pending.get(&prompt).map(|entry| entry.value().clone())
    }

    /// Number of prompts awaiting a decision
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Interaction gateway the prompts go through
    #[inline]
    #[must_use]
    pub fn interactions(&self) -> &Arc<dyn InteractionGateway> {
        &self.interactions
    }

    /// Send the prompt and wait for its decision
    ///
    /// Activations by anyone other than the invoker are ignored while the
    /// invoker still holds the privileged role; once the invoker has lost
    /// it, any privileged member may decide. On timeout the prompt is
    /// edited so that no affirmative path remains.
    ///
    /// # Errors
    /// - `ConfirmationError::Gateway` if the prompt cannot be sent
    /// - `ConfirmationError::IncompatibleDecision` if an activation carries
    ///   both controls or neither
    /// - `ConfirmationError::Interrupted` if the session shuts down first
    pub async fn confirm(&self, request: ConfirmationRequest) -> Result<Resolution, ConfirmationError> {
        let mut subscription = self
            .interactions
            .send_prompt(PromptRequest::yes_no(request.channel, request.content.clone()))
            .await?;
        let prompt = subscription.id;

        self.pending.insert(
            prompt,
            PendingConfirmation {
                invoker: request.invoker,
                subject: request.subject,
                proposed: request.proposed,
                created_at: Utc::now(),
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            prompt,
        };

        tracing::debug!(
            prompt = prompt.0,
            invoker = %request.invoker,
            subject = %request.subject,
            proposed = %request.proposed,
            "awaiting confirmation"
        );

        let now = Instant::now();
        let deadline = now.checked_add(self.wait_bound).unwrap_or_else(|| now + FAR_FUTURE);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    tracing::info!(prompt = prompt.0, "confirmation interrupted by shutdown");
                    let content = format!(
                        "Shutting down before a decision to {} <@{}>. No action was taken.",
                        request.proposed.verb(),
                        request.subject
                    );
                    if let Err(e) = self.interactions.edit_prompt(prompt, &content).await {
                        tracing::warn!(prompt = prompt.0, error = %e, "failed to retire prompt");
                    }
                    return Err(ConfirmationError::Interrupted);
                }

                signal = subscription.signals.recv() => match signal {
                    Some(PromptSignal::Activated { by, controls }) => {
                        if !self.may_resolve(request.invoker, by).await {
                            tracing::debug!(prompt = prompt.0, by = %by, "ignoring activation by unauthorised member");
                            continue;
                        }
                        let decision = match decode(&controls) {
                            Ok(decision) => decision,
                            Err(e) => {
                                tracing::error!(prompt = prompt.0, by = %by, error = %e, "confirmation protocol violated");
                                let content = format!(
                                    "Aborted: conflicting decision received for {} <@{}>. No action was taken.",
                                    request.proposed.verb(),
                                    request.subject
                                );
                                if let Err(edit) = self.interactions.edit_prompt(prompt, &content).await {
                                    tracing::warn!(prompt = prompt.0, error = %edit, "failed to abort prompt");
                                }
                                return Err(e);
                            }
                        };
                        tracing::info!(prompt = prompt.0, by = %by, ?decision, "confirmation resolved");
                        return Ok(Resolution { prompt, decision, resolved_by: Some(by) });
                    }
                    Some(PromptSignal::Invalidated) | None => {
                        tracing::info!(prompt = prompt.0, "prompt invalidated before a decision");
                        return Ok(Resolution { prompt, decision: Decision::Cancelled, resolved_by: None });
                    }
                },

                () = tokio::time::sleep_until(deadline) => {
                    tracing::info!(prompt = prompt.0, wait_secs = self.wait_bound.as_secs(), "confirmation timed out");
                    let content = format!(
                        "Timed out waiting for a decision to {} <@{}>. No action was taken.",
                        request.proposed.verb(),
                        request.subject
                    );
                    if let Err(e) = self.interactions.edit_prompt(prompt, &content).await {
                        tracing::warn!(prompt = prompt.0, error = %e, "failed to expire prompt");
                    }
                    return Ok(Resolution { prompt, decision: Decision::TimedOut, resolved_by: None });
                }
            }
        }
    }

    async fn may_resolve(&self, invoker: MemberId, by: MemberId) -> bool {
        if by == invoker {
            return true;
        }
        match self.holds_role(invoker).await {
            Ok(true) => false,
            Ok(false) => matches!(self.holds_role(by).await, Ok(true)),
            Err(e) => {
                tracing::warn!(error = %e, "role lookup failed; only the invoker may decide");
                false
            }
        }
    }

    async fn holds_role(&self, member: MemberId) -> Result<bool, GatewayError> {
        self.roles.has_privileged_role(member).await
    }
}

/// Map an activation to a decision; exactly one distinct control is valid
fn decode(controls: &[Control]) -> Result<Decision, ConfirmationError> {
    let affirm = controls.contains(&Control::Affirm);
    let deny = controls.contains(&Control::Deny);
    match (affirm, deny) {
        (true, false) => Ok(Decision::Confirmed),
        (false, true) => Ok(Decision::Cancelled),
        (both, _) => Err(ConfirmationError::IncompatibleDecision {
            activated: if both { 2 } else { 0 },
        }),
    }
}
