//! Strike Core - escalating moderation strikes
//!
//! Keeps a durable count of each member's violations and maps it to a
//! bounded set of consequences:
//! - Moderator-issued strikes, confirmed interactively before anything is
//!   recorded or applied
//! - Reconciliation of moderation performed directly on the platform,
//!   attributed through the eventually-consistent audit log
//! - Best-effort notification of the affected member
//!
//! # Example
//!
//! ```rust,ignore
//! use strike_core::prelude::*;
//!
//! # async fn example(gateways: Gateways) -> Result<(), StrikeError> {
//! let config = StrikeConfig::from_path("strikes.toml")?;
//! let system = StrikeSystem::new(
//!     &config,
//!     Arc::new(MemoryLedger::new()),
//!     gateways,
//!     ShutdownSignal::never(),
//! );
//!
//! let outcome = system
//!     .issue_strike(StrikeRequest {
//!         invoker: MemberId(1),
//!         channel: ChannelId(2),
//!         subject: MemberSnapshot::member(MemberId(3)),
//!         reason: "spam".into(),
//!     })
//!     .await?;
//! println!("{}", outcome.summary());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod command;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod ledger;
pub mod notify;
pub mod policy;
pub mod reconciler;
pub mod retry;
pub mod shutdown;
pub mod suppression;
pub mod system;
pub mod types;

// Re-exports for convenience
pub use command::{RefusalReason, StrikeCommand, StrikeOutcome, StrikeRequest};
pub use config::{AuditConfig, NotificationConfig, StrikeConfig, SuppressionConfig};
pub use confirmation::{
    ConfirmationProtocol, ConfirmationRequest, Decision, PendingConfirmation, Resolution,
};
pub use error::{
    ConfigError, ConfirmationError, GatewayError, IllegalTransitionError, InvalidStrikeCountError,
    PersistenceError, StrikeError,
};
pub use executor::{ConsequenceExecutor, ExecutionOutcome, RejectionCause};
pub use gateway::{
    AuditEntry, AuditLogGateway, Control, DirectChannel, DirectMessageGateway, InteractionGateway,
    ModerationGateway, PromptId, PromptRequest, PromptSignal, PromptSubscription, RoleResolver,
};
pub use ledger::{MemoryLedger, StrikeLedger};
pub use notify::NotificationDispatcher;
pub use policy::{AnomalousStrikeCountWarning, Escalation, EscalationPolicy};
pub use reconciler::{
    IgnoreReason, ManualActionEvent, ManualActionReconciler, ReconcileOutcome, ReconcileReport,
    ReconcileState,
};
pub use retry::RetryPolicy;
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use suppression::{CorrelationKey, CorrelationRegistry, SelfActionRegistry};
pub use system::{Gateways, ManualTrigger, StrikeService, StrikeSystem};
pub use types::{
    AuditAction, ChannelId, ConsequenceTier, MemberHash, MemberHashError, MemberId,
    MemberSnapshot, StrikeRecord,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Strike Core
    pub use crate::{
        ChannelId, ConsequenceTier, Gateways, ManualTrigger, MemberId, MemberSnapshot,
        MemoryLedger, ReconcileOutcome, ShutdownSignal, StrikeConfig, StrikeError, StrikeLedger,
        StrikeOutcome, StrikeRequest, StrikeService, StrikeSystem,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
