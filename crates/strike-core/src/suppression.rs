//! Short-lived registries backed by moka
//!
//! - [`SelfActionRegistry`]: consequences this subsystem applied itself, so
//!   the platform event they trigger is not counted again as a manual action
//! - [`CorrelationRegistry`]: correlation keys already claimed, so duplicate
//!   deliveries of one platform action are reconciled once
//!
//! Both are bounded and time-evicted.

use crate::types::{ConsequenceTier, MemberId};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::time::Duration;

/// Consequences recently applied by the executor
#[derive(Debug, Clone)]
pub struct SelfActionRegistry {
    inner: Cache<(MemberId, ConsequenceTier), DateTime<Utc>>,
}

impl SelfActionRegistry {
    /// Create registry whose marks expire after `ttl`
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Record that the subsystem is about to apply `tier` to `subject`
    #[inline]
    pub async fn mark(&self, subject: MemberId, tier: ConsequenceTier, at: DateTime<Utc>) {
        self.inner.insert((subject, tier), at).await;
    }

    /// Drop a mark after the action failed
    #[inline]
    pub async fn forget(&self, subject: MemberId, tier: ConsequenceTier) {
        self.inner.invalidate(&(subject, tier)).await;
    }

    /// Whether an event observed at `observed_at` was caused by a mark
    ///
    /// Matches marks made at most `window` before the observation. Marks made
    /// after the observation cannot have caused it.
    pub async fn is_self_initiated(
        &self,
        subject: MemberId,
        tier: ConsequenceTier,
        observed_at: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        let Some(marked_at) = self.inner.get(&(subject, tier)).await else {
            return false;
        };
        let Ok(window) = chrono::Duration::from_std(window) else {
            return true;
        };
        marked_at <= observed_at && observed_at - marked_at <= window
    }
}

impl Default for SelfActionRegistry {
    /// 10,000 marks, two minute lifetime
    fn default() -> Self {
        Self::with_ttl(10_000, Duration::from_secs(120))
    }
}

/// Deduplication key of a manual moderation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    /// Member the action targeted
    pub subject: MemberId,
    /// Consequence the action amounts to
    pub tier: ConsequenceTier,
    /// Observation time divided by the bucket width
    pub bucket: i64,
}

impl CorrelationKey {
    /// Key for an observation at `observed_at`
    #[must_use]
    pub fn new(
        subject: MemberId,
        tier: ConsequenceTier,
        observed_at: DateTime<Utc>,
        bucket_width: Duration,
    ) -> Self {
        let width = i64::try_from(bucket_width.as_secs()).unwrap_or(i64::MAX).max(1);
        Self {
            subject,
            tier,
            bucket: observed_at.timestamp().div_euclid(width),
        }
    }

    fn action(self) -> (MemberId, ConsequenceTier) {
        (self.subject, self.tier)
    }

    /// Whether `bucket` is this key's bucket or a neighbour of it
    fn overlaps(self, bucket: i64) -> bool {
        self.bucket.abs_diff(bucket) <= 1
    }
}

/// Correlation keys already being or having been reconciled
///
/// Claims are grouped per `(subject, tier)` so that a check across adjacent
/// buckets and the insert happen in one atomic compute on the cache entry.
#[derive(Debug, Clone)]
pub struct CorrelationRegistry {
    inner: Cache<(MemberId, ConsequenceTier), Vec<i64>>,
}

impl CorrelationRegistry {
    /// Create registry whose keys expire after `ttl`
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Claim a key; `false` if the same action was already claimed in this
    /// bucket or either neighbouring one
    ///
    /// Redeliveries straddling a bucket boundary may arrive in either order.
    pub async fn claim(&self, key: CorrelationKey) -> bool {
        let result = self
            .inner
            .entry(key.action())
            .and_compute_with(|existing| async move {
                let mut buckets = existing.map(|entry| entry.into_value()).unwrap_or_default();
                if buckets.iter().any(|bucket| key.overlaps(*bucket)) {
                    Op::Nop
                } else {
                    buckets.push(key.bucket);
                    Op::Put(buckets)
                }
            })
            .await;

        matches!(result, CompResult::Inserted(_) | CompResult::ReplacedWith(_))
    }

    /// Release a claim so the action may be reconciled again
    pub async fn release(&self, key: CorrelationKey) {
        self.inner
            .entry(key.action())
            .and_compute_with(|existing| async move {
                let Some(entry) = existing else {
                    return Op::Nop;
                };
                let mut buckets = entry.into_value();
                buckets.retain(|bucket| *bucket != key.bucket);
                if buckets.is_empty() {
                    Op::Remove
                } else {
                    Op::Put(buckets)
                }
            })
            .await;
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::with_ttl(10_000, Duration::from_secs(600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn marks_are_matched_within_window() {
        let registry = SelfActionRegistry::default();
        let subject = MemberId(5);
        registry.mark(subject, ConsequenceTier::Ban, at(1_000)).await;

        let window = Duration::from_secs(30);
        assert!(registry.is_self_initiated(subject, ConsequenceTier::Ban, at(1_010), window).await);
        assert!(!registry.is_self_initiated(subject, ConsequenceTier::Ban, at(1_100), window).await);
        assert!(!registry.is_self_initiated(subject, ConsequenceTier::Ban, at(990), window).await);
        assert!(!registry.is_self_initiated(subject, ConsequenceTier::Remove, at(1_010), window).await);
        assert!(!registry.is_self_initiated(MemberId(6), ConsequenceTier::Ban, at(1_010), window).await);
    }

    #[tokio::test]
    async fn forgotten_marks_do_not_suppress() {
        let registry = SelfActionRegistry::default();
        let subject = MemberId(5);
        registry.mark(subject, ConsequenceTier::Timeout, at(1_000)).await;
        registry.forget(subject, ConsequenceTier::Timeout).await;

        assert!(
            !registry
                .is_self_initiated(subject, ConsequenceTier::Timeout, at(1_001), Duration::from_secs(60))
                .await
        );
    }

    #[test]
    fn correlation_keys_bucket_by_width() {
        let width = Duration::from_secs(60);
        let a = CorrelationKey::new(MemberId(1), ConsequenceTier::Remove, at(120), width);
        let b = CorrelationKey::new(MemberId(1), ConsequenceTier::Remove, at(179), width);
        let c = CorrelationKey::new(MemberId(1), ConsequenceTier::Remove, at(180), width);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(c.bucket, a.bucket + 1);
        assert!(c.overlaps(a.bucket));
    }

    #[tokio::test]
    async fn claims_are_exclusive() {
        let registry = CorrelationRegistry::default();
        let key = CorrelationKey::new(MemberId(1), ConsequenceTier::Ban, at(600), Duration::from_secs(60));

        assert!(registry.claim(key).await);
        assert!(!registry.claim(key).await);

        registry.release(key).await;
        assert!(registry.claim(key).await);
    }

    #[tokio::test]
    async fn claim_in_next_bucket_is_a_duplicate() {
        let registry = CorrelationRegistry::default();
        let width = Duration::from_secs(60);
        let first = CorrelationKey::new(MemberId(1), ConsequenceTier::Ban, at(659), width);
        let straddling = CorrelationKey::new(MemberId(1), ConsequenceTier::Ban, at(661), width);

        assert!(registry.claim(first).await);
        assert!(!registry.claim(straddling).await);
    }

    #[tokio::test]
    async fn claim_in_previous_bucket_is_a_duplicate() {
        let registry = CorrelationRegistry::default();
        let width = Duration::from_secs(60);
        let later = CorrelationKey::new(MemberId(9), ConsequenceTier::Ban, at(661), width);
        let earlier = CorrelationKey::new(MemberId(9), ConsequenceTier::Ban, at(659), width);

        assert!(registry.claim(later).await);
        assert!(!registry.claim(earlier).await);
    }

    #[tokio::test]
    async fn distant_buckets_and_other_tiers_are_independent() {
        let registry = CorrelationRegistry::default();
        let width = Duration::from_secs(60);
        let kick = CorrelationKey::new(MemberId(9), ConsequenceTier::Remove, at(600), width);

        assert!(registry.claim(kick).await);
        assert!(
            registry
                .claim(CorrelationKey::new(MemberId(9), ConsequenceTier::Remove, at(720), width))
                .await
        );
        assert!(
            registry
                .claim(CorrelationKey::new(MemberId(9), ConsequenceTier::Ban, at(600), width))
                .await
        );

        registry.release(kick).await;
        assert!(registry.claim(kick).await);
    }
}
