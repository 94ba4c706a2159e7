//! Testing utilities for the strike workspace
//!
//! In-process fakes of every platform gateway and a harness that wires them
//! into a complete [`StrikeSystem`].

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strike_core::{
    shutdown_channel, AuditAction, AuditEntry, AuditLogGateway, ChannelId, ConsequenceTier,
    Control, DirectChannel, DirectMessageGateway, GatewayError, Gateways, InteractionGateway,
    MemberId, MemberSnapshot, MemoryLedger, ModerationGateway, PromptId, PromptRequest,
    PromptSignal, PromptSubscription, RoleResolver, ShutdownTrigger, StrikeConfig, StrikeLedger,
    StrikeRequest, StrikeSystem,
};
use tokio::sync::mpsc;

pub const BOT: MemberId = MemberId(1);
pub const MODERATOR: MemberId = MemberId(100);
pub const OTHER_MODERATOR: MemberId = MemberId(101);
pub const COMMAND_CHANNEL: ChannelId = ChannelId(900);

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

/// Moderation call as the platform saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationCall {
    pub tier: ConsequenceTier,
    pub member: MemberId,
    pub duration: Option<Duration>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FakeModeration {
    calls: Mutex<Vec<ModerationCall>>,
    failures: Mutex<HashMap<ConsequenceTier, GatewayError>>,
    banned: Mutex<HashSet<MemberId>>,
    ban_list_down: Mutex<bool>,
}

impl FakeModeration {
    /// Make every call of `tier` fail with `error`
    pub fn fail(&self, tier: ConsequenceTier, error: GatewayError) {
        self.failures.lock().insert(tier, error);
    }

    /// Put a member on the ban list without a call
    pub fn mark_banned(&self, member: MemberId) {
        self.banned.lock().insert(member);
    }

    /// Make `is_banned` fail
    pub fn ban_list_unavailable(&self) {
        *self.ban_list_down.lock() = true;
    }

    pub fn calls(&self) -> Vec<ModerationCall> {
        self.calls.lock().clone()
    }

    fn record(
        &self,
        tier: ConsequenceTier,
        member: MemberId,
        duration: Option<Duration>,
        reason: &str,
    ) -> Result<(), GatewayError> {
        if let Some(error) = self.failures.lock().get(&tier) {
            return Err(error.clone());
        }
        self.calls.lock().push(ModerationCall {
            tier,
            member,
            duration,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl ModerationGateway for FakeModeration {
    async fn timeout(
        &self,
        member: MemberId,
        duration: Duration,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.record(ConsequenceTier::Timeout, member, Some(duration), reason)
    }

    async fn remove(&self, member: MemberId, reason: &str) -> Result<(), GatewayError> {
        self.record(ConsequenceTier::Remove, member, None, reason)
    }

    async fn ban(&self, member: MemberId, reason: &str) -> Result<(), GatewayError> {
        self.record(ConsequenceTier::Ban, member, None, reason)?;
        self.banned.lock().insert(member);
        Ok(())
    }

    async fn is_banned(&self, member: MemberId) -> Result<bool, GatewayError> {
        if *self.ban_list_down.lock() {
            return Err(GatewayError::Unavailable("ban list unavailable".into()));
        }
        Ok(self.banned.lock().contains(&member))
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PendingEntry {
    action: AuditAction,
    target: MemberId,
    actor: MemberId,
    created_at: DateTime<Utc>,
    visible_from_query: usize,
}

/// Audit log whose entries become visible only after a number of queries,
/// modelling the platform's write lag
#[derive(Debug, Default)]
pub struct FakeAuditLog {
    entries: Mutex<Vec<PendingEntry>>,
    queries: Mutex<HashMap<(AuditAction, MemberId), usize>>,
    outage: Mutex<usize>,
}

impl FakeAuditLog {
    /// Entry visible from the first query on
    pub fn publish(&self, action: AuditAction, target: MemberId, actor: MemberId) {
        self.publish_on_query(action, target, actor, 1);
    }

    /// Entry visible from the `query`-th query for `(action, target)` on
    pub fn publish_on_query(&self, action: AuditAction, target: MemberId, actor: MemberId, query: usize) {
        self.entries.lock().push(PendingEntry {
            action,
            target,
            actor,
            created_at: Utc::now(),
            visible_from_query: query,
        });
    }

    /// Entry written at `created_at`, visible from the first query on
    pub fn publish_at(
        &self,
        action: AuditAction,
        target: MemberId,
        actor: MemberId,
        created_at: DateTime<Utc>,
    ) {
        self.entries.lock().push(PendingEntry {
            action,
            target,
            actor,
            created_at,
            visible_from_query: 1,
        });
    }

    /// Fail the next `queries` queries
    pub fn fail_next(&self, queries: usize) {
        *self.outage.lock() = queries;
    }

    /// Queries made for `(action, target)`
    pub fn queries(&self, action: AuditAction, target: MemberId) -> usize {
        self.queries.lock().get(&(action, target)).copied().unwrap_or(0)
    }

    /// Queries made for any action targeting `target`
    pub fn total_queries(&self, target: MemberId) -> usize {
        self.queries
            .lock()
            .iter()
            .filter(|((_, member), _)| *member == target)
            .map(|(_, count)| count)
            .sum()
    }
}

#[async_trait]
impl AuditLogGateway for FakeAuditLog {
    async fn query_recent(
        &self,
        action: AuditAction,
        subject: MemberId,
        since: DateTime<Utc>,
    ) -> Result<Option<AuditEntry>, GatewayError> {
        let n = {
            let mut queries = self.queries.lock();
            let count = queries.entry((action, subject)).or_insert(0);
            *count += 1;
            *count
        };

        {
            let mut outage = self.outage.lock();
            if *outage > 0 {
                *outage -= 1;
                return Err(GatewayError::Unavailable("audit log unavailable".into()));
            }
        }

        Ok(self
            .entries
            .lock()
            .iter()
            .find(|e| {
                e.action == action
                    && e.target == subject
                    && e.created_at >= since
                    && n >= e.visible_from_query
            })
            .map(|e| AuditEntry {
                action: e.action,
                target: e.target,
                actor: e.actor,
                created_at: e.created_at,
            }))
    }
}

// ---------------------------------------------------------------------------
// Interactions
// ---------------------------------------------------------------------------

/// How the next prompt gets answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Activate `controls` as `by` as soon as the prompt is sent
    Press { by: MemberId, controls: Vec<Control> },
    /// Invalidate the prompt as soon as it is sent
    Invalidate,
    /// Leave the prompt unanswered
    Silent,
}

impl Reply {
    pub fn yes(by: MemberId) -> Self {
        Self::Press {
            by,
            controls: vec![Control::Affirm],
        }
    }

    pub fn no(by: MemberId) -> Self {
        Self::Press {
            by,
            controls: vec![Control::Deny],
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeInteractions {
    next_id: AtomicU64,
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<(PromptId, PromptRequest)>>,
    senders: Mutex<HashMap<PromptId, mpsc::Sender<PromptSignal>>>,
    edits: Mutex<Vec<(PromptId, String)>>,
}

impl FakeInteractions {
    /// Queue the reply to the next unanswered prompt; unqueued prompts stay silent
    pub fn reply(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    /// Send a signal to a prompt that is still open
    pub async fn signal(&self, prompt: PromptId, signal: PromptSignal) -> bool {
        let sender = self.senders.lock().get(&prompt).cloned();
        match sender {
            Some(tx) => tx.send(signal).await.is_ok(),
            None => false,
        }
    }

    pub fn prompts(&self) -> Vec<(PromptId, PromptRequest)> {
        self.prompts.lock().clone()
    }

    pub fn last_prompt(&self) -> Option<PromptId> {
        self.prompts.lock().last().map(|(id, _)| *id)
    }

    pub fn edits(&self) -> Vec<(PromptId, String)> {
        self.edits.lock().clone()
    }

    /// Content the prompt was last edited to
    pub fn final_content(&self, prompt: PromptId) -> Option<String> {
        self.edits
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| *id == prompt)
            .map(|(_, content)| content.clone())
    }
}

#[async_trait]
impl InteractionGateway for FakeInteractions {
    async fn send_prompt(&self, request: PromptRequest) -> Result<PromptSubscription, GatewayError> {
        let id = PromptId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = mpsc::channel(8);

        match self.replies.lock().pop_front() {
            Some(Reply::Press { by, controls }) => {
                let _ = tx.try_send(PromptSignal::Activated { by, controls });
            }
            Some(Reply::Invalidate) => {
                let _ = tx.try_send(PromptSignal::Invalidated);
            }
            Some(Reply::Silent) | None => {}
        }

        self.prompts.lock().push((id, request));
        self.senders.lock().insert(id, tx);
        Ok(PromptSubscription { id, signals: rx })
    }

    async fn edit_prompt(&self, prompt: PromptId, content: &str) -> Result<(), GatewayError> {
        self.edits.lock().push((prompt, content.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Direct messages
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeDirectMessages {
    blocked: Mutex<HashSet<MemberId>>,
    sent: Arc<Mutex<Vec<(MemberId, String)>>>,
    opened: Mutex<Vec<MemberId>>,
}

impl FakeDirectMessages {
    /// Member refuses direct messages from the bot
    pub fn block(&self, member: MemberId) {
        self.blocked.lock().insert(member);
    }

    pub fn sent(&self) -> Vec<(MemberId, String)> {
        self.sent.lock().clone()
    }

    /// Members a channel was opened (or attempted) for
    pub fn attempts(&self) -> Vec<MemberId> {
        self.opened.lock().clone()
    }
}

struct FakeDirectChannel {
    member: MemberId,
    sent: Arc<Mutex<Vec<(MemberId, String)>>>,
}

#[async_trait]
impl DirectChannel for FakeDirectChannel {
    async fn send(&self, text: &str) -> Result<(), GatewayError> {
        self.sent.lock().push((self.member, text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl DirectMessageGateway for FakeDirectMessages {
    async fn open_channel(&self, member: MemberId) -> Result<Box<dyn DirectChannel>, GatewayError> {
        self.opened.lock().push(member);
        if self.blocked.lock().contains(&member) {
            return Err(GatewayError::Unavailable(format!("{member} does not accept messages")));
        }
        Ok(Box::new(FakeDirectChannel {
            member,
            sent: Arc::clone(&self.sent),
        }))
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeRoles {
    privileged: Mutex<HashSet<MemberId>>,
}

impl FakeRoles {
    pub fn grant(&self, member: MemberId) {
        self.privileged.lock().insert(member);
    }

    pub fn revoke(&self, member: MemberId) {
        self.privileged.lock().remove(&member);
    }
}

#[async_trait]
impl RoleResolver for FakeRoles {
    async fn has_privileged_role(&self, member: MemberId) -> Result<bool, GatewayError> {
        Ok(self.privileged.lock().contains(&member))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A complete strike system over fakes and an in-memory ledger
pub struct TestHarness {
    pub system: StrikeSystem,
    pub ledger: Arc<MemoryLedger>,
    pub moderation: Arc<FakeModeration>,
    pub audit: Arc<FakeAuditLog>,
    pub interactions: Arc<FakeInteractions>,
    pub dms: Arc<FakeDirectMessages>,
    pub roles: Arc<FakeRoles>,
    pub shutdown: ShutdownTrigger,
    pub config: StrikeConfig,
}

impl TestHarness {
    /// Default configuration; [`MODERATOR`] and [`OTHER_MODERATOR`] are privileged
    pub fn new() -> Self {
        Self::with_config(StrikeConfig::default().with_bot_user_id(BOT))
    }

    pub fn with_config(config: StrikeConfig) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let moderation = Arc::new(FakeModeration::default());
        let audit = Arc::new(FakeAuditLog::default());
        let interactions = Arc::new(FakeInteractions::default());
        let dms = Arc::new(FakeDirectMessages::default());
        let roles = Arc::new(FakeRoles::default());
        roles.grant(MODERATOR);
        roles.grant(OTHER_MODERATOR);

        let (shutdown, signal) = shutdown_channel();
        let gateways = Gateways {
            moderation: moderation.clone(),
            audit: audit.clone(),
            interactions: interactions.clone(),
            direct_messages: dms.clone(),
            roles: roles.clone(),
        };
        let system = StrikeSystem::new(&config, ledger.clone(), gateways, signal);

        Self {
            system,
            ledger,
            moderation,
            audit,
            interactions,
            dms,
            roles,
            shutdown,
            config,
        }
    }

    /// Give `member` `count` strikes directly in the ledger
    pub async fn seed_strikes(&self, member: MemberId, count: u32) {
        for _ in 0..count {
            self.ledger.increment(member).await.unwrap();
        }
    }

    pub async fn strikes(&self, member: MemberId) -> u32 {
        self.ledger
            .get(member)
            .await
            .unwrap()
            .map_or(0, |record| record.strike_count)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Strike request from [`MODERATOR`] in [`COMMAND_CHANNEL`]
pub fn strike_request(subject: MemberId) -> StrikeRequest {
    StrikeRequest {
        invoker: MODERATOR,
        channel: COMMAND_CHANNEL,
        subject: MemberSnapshot::member(subject),
        reason: "breaking the rules".to_string(),
    }
}
