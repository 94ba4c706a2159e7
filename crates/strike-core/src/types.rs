//! Core types for the strike subsystem
//!
//! Defines the fundamental value types shared by every component:
//! - Member identities (raw platform id and its pseudonymous hash)
//! - The persisted strike record
//! - Consequence tiers and the audit-log action types they correspond to
//! - Snapshots of member state delivered by platform events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Raw platform identifier of a community member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u64);

impl MemberId {
    /// Pseudonymous hash of this member
    #[inline]
    #[must_use]
    pub fn hashed(self) -> MemberHash {
        MemberHash::of(self)
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MemberId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Identifier of a channel/context where prompts are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Irreversible SHA-256 reference to a member
///
/// The ledger keys records by this value only. Two hashes compare equal
/// exactly when they were computed from the same [`MemberId`]; the raw id
/// cannot be recovered from it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberHash([u8; 32]);

impl MemberHash {
    /// Hash the decimal form of a member id
    #[must_use]
    pub fn of(member: MemberId) -> Self {
        let digest = Sha256::digest(member.0.to_string().as_bytes());
        Self(digest.into())
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering (64 chars)
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for MemberHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MemberHash({})", self.short())
    }
}

impl Display for MemberHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for MemberHash {
    type Err = MemberHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| MemberHashError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl Serialize for MemberHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MemberHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors decoding a stored member hash
#[derive(Debug, thiserror::Error)]
pub enum MemberHashError {
    /// Not valid hex
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Wrong digest length
    #[error("invalid digest length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Durable per-member strike counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeRecord {
    /// Pseudonymous member reference
    pub member: MemberHash,
    /// Number of strikes accrued
    pub strike_count: u32,
    /// When the first strike was recorded
    pub created_at: DateTime<Utc>,
    /// When the last strike was recorded
    pub updated_at: DateTime<Utc>,
}

impl StrikeRecord {
    /// Counts above the highest tier indicate the ledger and the
    /// moderation history have diverged
    #[inline]
    #[must_use]
    pub fn is_inconsistent(&self) -> bool {
        self.strike_count > ConsequenceTier::Ban.level()
    }
}

/// Disciplinary consequence associated with a strike count
///
/// Ordered: `Timeout < Remove < Ban`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsequenceTier {
    /// Tier 1: temporary timeout
    Timeout,
    /// Tier 2: removal (kick) from the community
    Remove,
    /// Tier 3: permanent ban
    Ban,
}

impl ConsequenceTier {
    /// All tiers in ascending order
    pub const ALL: [ConsequenceTier; 3] = [Self::Timeout, Self::Remove, Self::Ban];

    /// Numeric tier (1..=3)
    #[inline]
    #[must_use]
    pub const fn level(self) -> u32 {
        match self {
            Self::Timeout => 1,
            Self::Remove => 2,
            Self::Ban => 3,
        }
    }

    /// Imperative form used in prompts ("time-out", "kick", "ban")
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Timeout => "time-out",
            Self::Remove => "kick",
            Self::Ban => "ban",
        }
    }

    /// Past-tense form used in reports
    #[must_use]
    pub const fn past_tense(self) -> &'static str {
        match self {
            Self::Timeout => "timed-out",
            Self::Remove => "kicked",
            Self::Ban => "banned",
        }
    }

    /// Audit log action types that record this consequence
    ///
    /// Timeouts are written either as a plain member update or as an
    /// automod communication-disabled entry.
    #[must_use]
    pub const fn audit_actions(self) -> &'static [AuditAction] {
        match self {
            Self::Timeout => &[AuditAction::AutoModerationTimeout, AuditAction::MemberTimeout],
            Self::Remove => &[AuditAction::Kick],
            Self::Ban => &[AuditAction::Ban],
        }
    }
}

impl Display for ConsequenceTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Platform audit log action types relevant to strikes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Member updated with a communication timeout
    MemberTimeout,
    /// Automod disabled the member's communication
    AutoModerationTimeout,
    /// Member kicked
    Kick,
    /// Member banned
    Ban,
}

/// Point-in-time view of a member as delivered by platform events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    /// Member identity
    pub id: MemberId,
    /// Whether the member is a bot account
    pub is_bot: bool,
    /// Whether the member is currently timed out
    pub timed_out: bool,
}

impl MemberSnapshot {
    /// Snapshot of a regular (non-bot, not timed-out) member
    #[inline]
    #[must_use]
    pub fn member(id: MemberId) -> Self {
        Self {
            id,
            is_bot: false,
            timed_out: false,
        }
    }

    /// Mark as a bot account
    #[inline]
    #[must_use]
    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    /// Mark as timed out
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self) -> Self {
        self.timed_out = true;
        self
    }
}
