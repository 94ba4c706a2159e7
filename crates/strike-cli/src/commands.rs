//! Subcommand implementations; each returns the text to print

use anyhow::Context;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use strike_core::{EscalationPolicy, MemberId, StrikeConfig, StrikeLedger, StrikeRecord};
use strike_ledger::SqliteLedger;

#[derive(Debug, Serialize)]
struct RecordView {
    member_hash: String,
    strike_count: u32,
    next_consequence: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl RecordView {
    fn new(member: MemberId, record: Option<&StrikeRecord>) -> Self {
        let count = record.map_or(0, |r| r.strike_count);
        let next = EscalationPolicy::new()
            .consequence_for(count.saturating_add(1))
            .map_or_else(|_| "none".to_string(), |e| e.tier.verb().to_string());

        Self {
            member_hash: member.hashed().to_hex(),
            strike_count: count,
            next_consequence: next,
            created_at: record.map(|r| r.created_at.to_rfc3339()),
            updated_at: record.map(|r| r.updated_at.to_rfc3339()),
        }
    }

    fn render(&self) -> String {
        let mut text = format!(
            "Member hash:      {}\nStrikes:          {}\nNext consequence: {}",
            self.member_hash, self.strike_count, self.next_consequence
        );
        if let (Some(created), Some(updated)) = (&self.created_at, &self.updated_at) {
            let _ = write!(text, "\nFirst strike:     {created}\nLast strike:      {updated}");
        }
        text
    }
}

/// Look up a member's record
pub(crate) async fn show(
    member: MemberId,
    database: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> anyhow::Result<String> {
    let database = match (database, config) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(config)) => load_config(config)?.database_path,
        (None, None) => StrikeConfig::default().database_path,
    };
    anyhow::ensure!(
        database.exists(),
        "ledger {} does not exist",
        database.display()
    );

    let ledger = SqliteLedger::open(&database)
        .with_context(|| format!("opening ledger {}", database.display()))?;
    let record = ledger.get(member).await.context("reading strike record")?;
    tracing::debug!(member = %member.hashed().short(), found = record.is_some(), "looked up member");

    let view = RecordView::new(member, record.as_ref());
    if json {
        Ok(serde_json::to_string_pretty(&view)?)
    } else {
        Ok(view.render())
    }
}

/// Pseudonymous hash of a member
pub(crate) fn hash(member: MemberId) -> String {
    member.hashed().to_hex()
}

/// Validate a configuration file
pub(crate) fn check_config(path: &Path, json: bool) -> anyhow::Result<String> {
    let config = load_config(path)?;
    if json {
        return Ok(serde_json::to_string_pretty(&config)?);
    }

    let retry = config.audit.retry;
    Ok(format!(
        "{} is valid\n\
         Timeout length:      {}h\n\
         Confirmation wait:   {}s\n\
         Audit attempts:      {} over {}s\n\
         Ledger:              {}",
        path.display(),
        config.timeout_hours,
        config.confirmation_wait_secs,
        retry.max_attempts(),
        retry.total_delay().as_secs(),
        config.database_path.display()
    ))
}

fn load_config(path: &Path) -> anyhow::Result<StrikeConfig> {
    StrikeConfig::from_path(path).with_context(|| format!("loading {}", path.display()))
}
