//! Escalation policy
//!
//! Pure mapping from a strike count to the consequence tier it calls for.

use crate::error::InvalidStrikeCountError;
use crate::types::ConsequenceTier;
use std::fmt::{self, Display, Formatter};

/// Strike count above the highest tier
///
/// Not an error: the caller proceeds with [`ConsequenceTier::Ban`] and
/// surfaces this warning to moderators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalousStrikeCountWarning {
    /// The observed count
    pub count: u32,
}

impl Display for AnomalousStrikeCountWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "strike count {} exceeds the {} escalation tiers; \
             records may be out of sync with past moderation",
            self.count,
            ConsequenceTier::Ban.level()
        )
    }
}

/// Result of mapping a strike count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    /// Tier to apply
    pub tier: ConsequenceTier,
    /// Present when the count exceeded the highest tier
    pub anomaly: Option<AnomalousStrikeCountWarning>,
}

/// Maps strike counts to consequence tiers
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationPolicy;

impl EscalationPolicy {
    /// Create the policy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Consequence for a strike count
    ///
    /// `1 => Timeout`, `2 => Remove`, `3 => Ban`. Counts above 3 yield
    /// `Ban` together with an [`AnomalousStrikeCountWarning`].
    ///
    /// # Errors
    /// `InvalidStrikeCountError` for a count of zero. With the
    /// `strict-debug` feature this panics instead.
    pub fn consequence_for(&self, count: u32) -> Result<Escalation, InvalidStrikeCountError> {
        let tier = match count {
            0 => {
                #[cfg(feature = "strict-debug")]
                panic!("escalation requested for a strike count of zero");

                #[cfg(not(feature = "strict-debug"))]
                return Err(InvalidStrikeCountError { count });
            }
            1 => ConsequenceTier::Timeout,
            2 => ConsequenceTier::Remove,
            _ => ConsequenceTier::Ban,
        };

        let anomaly = (count > ConsequenceTier::Ban.level())
            .then_some(AnomalousStrikeCountWarning { count });

        Ok(Escalation { tier, anomaly })
    }
}
