//! Strike subsystem configuration
//!
//! Loaded from TOML; every key has a default so an empty file is valid.
//!
//! ```toml
//! bot_user_id = 1100000000000000000
//! timeout_hours = 24
//! confirmation_wait_secs = 300
//!
//! [audit]
//! lookback_secs = 60
//! dedupe_bucket_secs = 60
//!
//! [audit.retry]
//! initial_delay_ms = 1000
//! multiplier = 2
//! max_delay_ms = 16000
//! total_budget_ms = 60000
//!
//! [notification]
//! community_name = "CSS"
//! moderation_document_url = "https://example.org/moderation"
//! ```

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::MemberId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted confirmation wait, one day
pub const MAX_CONFIRMATION_WAIT_SECS: u64 = 86_400;

/// Longest accepted audit polling budget, ten minutes
pub const MAX_RETRY_BUDGET_MS: u64 = 600_000;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrikeConfig {
    /// The bot's own platform id; audit entries it authored are self-initiated
    pub bot_user_id: Option<MemberId>,
    /// Length of a tier-1 timeout
    pub timeout_hours: u64,
    /// How long a confirmation prompt waits for a decision
    pub confirmation_wait_secs: u64,
    /// SQLite file of the durable ledger
    pub database_path: PathBuf,
    /// Audit-log correlation
    pub audit: AuditConfig,
    /// Self-initiated action suppression
    pub suppression: SuppressionConfig,
    /// Strike notification text
    pub notification: NotificationConfig,
}

impl StrikeConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed input, `ConfigError::Invalid` for
    /// out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`StrikeConfig::from_toml_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_hours == 0 {
            return Err(ConfigError::invalid("timeout_hours", "must be at least 1"));
        }
        if self.confirmation_wait_secs == 0 {
            return Err(ConfigError::invalid(
                "confirmation_wait_secs",
                "must be at least 1",
            ));
        }
        if self.confirmation_wait_secs > MAX_CONFIRMATION_WAIT_SECS {
            return Err(ConfigError::invalid(
                "confirmation_wait_secs",
                format!("must be at most {MAX_CONFIRMATION_WAIT_SECS}"),
            ));
        }
        if self.audit.dedupe_bucket_secs == 0 {
            return Err(ConfigError::invalid(
                "audit.dedupe_bucket_secs",
                "must be at least 1",
            ));
        }
        let retry = &self.audit.retry;
        if retry.multiplier == 0 {
            return Err(ConfigError::invalid("audit.retry.multiplier", "must be at least 1"));
        }
        if retry.total_budget_ms == 0 {
            return Err(ConfigError::invalid(
                "audit.retry.total_budget_ms",
                "must be at least 1",
            ));
        }
        if retry.total_budget_ms > MAX_RETRY_BUDGET_MS {
            return Err(ConfigError::invalid(
                "audit.retry.total_budget_ms",
                format!("must be at most {MAX_RETRY_BUDGET_MS}"),
            ));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "audit.retry.initial_delay_ms",
                format!(
                    "{} exceeds max_delay_ms {}",
                    retry.initial_delay_ms, retry.max_delay_ms
                ),
            ));
        }
        if self.suppression.capacity == 0 {
            return Err(ConfigError::invalid("suppression.capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// With the bot's own id
    #[inline]
    #[must_use]
    pub fn with_bot_user_id(mut self, id: MemberId) -> Self {
        self.bot_user_id = Some(id);
        self
    }

    /// With a confirmation wait bound
    #[inline]
    #[must_use]
    pub fn with_confirmation_wait(mut self, wait: Duration) -> Self {
        self.confirmation_wait_secs = wait.as_secs().clamp(1, MAX_CONFIRMATION_WAIT_SECS);
        self
    }

    /// With an audit retry policy
    #[inline]
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.audit.retry = retry;
        self
    }

    /// Tier-1 timeout length
    #[inline]
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_hours.saturating_mul(3_600))
    }

    /// Confirmation wait bound
    #[inline]
    #[must_use]
    pub fn confirmation_wait(&self) -> Duration {
        Duration::from_secs(self.confirmation_wait_secs)
    }
}

impl Default for StrikeConfig {
    fn default() -> Self {
        Self {
            bot_user_id: None,
            timeout_hours: 24,
            confirmation_wait_secs: 300,
            database_path: PathBuf::from("strikes.db"),
            audit: AuditConfig::default(),
            suppression: SuppressionConfig::default(),
            notification: NotificationConfig::default(),
        }
    }
}

/// Audit-log correlation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Query window starts this long before the event was observed
    pub lookback_secs: u64,
    /// Width of the time bucket in correlation keys
    pub dedupe_bucket_secs: u64,
    /// Polling schedule
    pub retry: RetryPolicy,
}

impl AuditConfig {
    /// Lookback as a duration
    #[inline]
    #[must_use]
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    /// Bucket width as a duration
    #[inline]
    #[must_use]
    pub fn dedupe_bucket(&self) -> Duration {
        Duration::from_secs(self.dedupe_bucket_secs)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            lookback_secs: 60,
            dedupe_bucket_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

/// Self-initiated suppression settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    /// Lifetime of a mark
    pub ttl_secs: u64,
    /// Maximum marks (also bounds the correlation registry)
    pub capacity: u64,
}

impl SuppressionConfig {
    /// Lifetime as a duration
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 120,
            capacity: 10_000,
        }
    }
}

/// Text inserted into strike notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Community name as members know it
    pub community_name: String,
    /// Link to the moderation document
    pub moderation_document_url: Option<String>,
    /// Who is contacted about bans
    pub moderation_contact: Option<String>,
    /// Where the rules are posted
    pub rules_location: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            community_name: "the community".to_string(),
            moderation_document_url: None,
            moderation_contact: None,
            rules_location: "#welcome".to_string(),
        }
    }
}
