//! Strike ledger
//!
//! The ledger is the single owner of [`StrikeRecord`]s. The only mutation it
//! offers is an atomic increment; there is no decrement or reset.

use crate::error::PersistenceError;
use crate::types::{MemberHash, MemberId, StrikeRecord};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// Durable per-member strike counter
///
/// Implementations must make `increment` a single atomic read-modify-write
/// inside the store, so concurrent increments for the same member from
/// different tasks or processes never lose an update, and a racing first
/// strike creates exactly one record.
#[async_trait]
pub trait StrikeLedger: Send + Sync {
    /// Get-or-create the record and add exactly one strike
    async fn increment(&self, member: MemberId) -> Result<StrikeRecord, PersistenceError>;

    /// Current record, if the member was ever struck
    async fn get(&self, member: MemberId) -> Result<Option<StrikeRecord>, PersistenceError>;
}

#[async_trait]
impl<L: StrikeLedger + ?Sized> StrikeLedger for Arc<L> {
    async fn increment(&self, member: MemberId) -> Result<StrikeRecord, PersistenceError> {
        (**self).increment(member).await
    }

    async fn get(&self, member: MemberId) -> Result<Option<StrikeRecord>, PersistenceError> {
        (**self).get(member).await
    }
}

/// In-process ledger
///
/// Atomicity comes from the shard lock held by the map entry while the
/// count is bumped. Only suitable for a single process.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: DashMap<MemberHash, StrikeRecord>,
}

impl MemoryLedger {
    /// Create an empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members with a record
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no member was ever struck
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StrikeLedger for MemoryLedger {
    async fn increment(&self, member: MemberId) -> Result<StrikeRecord, PersistenceError> {
        let hash = member.hashed();
        let now = Utc::now();

        let mut entry = self.records.entry(hash).or_insert_with(|| StrikeRecord {
            member: hash,
            strike_count: 0,
            created_at: now,
            updated_at: now,
        });
        entry.strike_count = entry
            .strike_count
            .checked_add(1)
            .ok_or_else(|| PersistenceError::Corrupt(format!("strike count overflow for {hash:?}")))?;
        entry.updated_at = now;

        Ok(entry.clone())
    }

    async fn get(&self, member: MemberId) -> Result<Option<StrikeRecord>, PersistenceError> {
        Ok(self
            .records
            .get(&member.hashed())
            .map(|entry| entry.value().clone()))
    }
}
