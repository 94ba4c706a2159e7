//! Best-effort strike notifications
//!
//! A failure to reach the member is logged and swallowed; it never fails the
//! strike or consequence flow.

use crate::config::NotificationConfig;
use crate::gateway::DirectMessageGateway;
use crate::types::{ConsequenceTier, MemberId};
use std::fmt::Write as _;
use std::sync::Arc;

/// Highest strike level shown to members
const MAX_SHOWN_LEVEL: u32 = 3;

/// Sends the affected member their new strike level
pub struct NotificationDispatcher {
    dms: Arc<dyn DirectMessageGateway>,
    config: NotificationConfig,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Create dispatcher
    #[must_use]
    pub fn new(dms: Arc<dyn DirectMessageGateway>, config: NotificationConfig) -> Self {
        Self { dms, config }
    }

    /// Tell `subject` about their new strike level
    ///
    /// Returns whether the message was delivered.
    pub async fn notify(&self, subject: MemberId, new_count: u32, tier: ConsequenceTier) -> bool {
        let channel = match self.dms.open_channel(subject).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::info!(subject = %subject, error = %e, "strike notification channel unavailable");
                return false;
            }
        };

        let text = self.render(new_count, tier);
        match channel.send(&text).await {
            Ok(()) => {
                tracing::debug!(subject = %subject, level = new_count.min(MAX_SHOWN_LEVEL), "strike notification sent");
                true
            }
            Err(e) => {
                tracing::info!(subject = %subject, error = %e, "strike notification not delivered");
                false
            }
        }
    }

    /// Message text for a member now at `count` strikes
    #[must_use]
    pub fn render(&self, count: u32, tier: ConsequenceTier) -> String {
        let community = &self.config.community_name;
        let level = count.min(MAX_SHOWN_LEVEL);

        let mut text = format!(
            "Hi, a recent incident occurred in which you may have broken one or more of \
             the rules of {community}.\n\
             We have increased the number of strikes associated with your account to {level} \
             and the corresponding moderation action ({}) will soon be applied to you.",
            tier.verb()
        );

        if let Some(url) = &self.config.moderation_document_url {
            let _ = write!(
                text,
                " To find what moderation action corresponds to which strike level, \
                 you can view the moderation document of {community} here: <{url}>"
            );
        }

        let _ = write!(
            text,
            "\nPlease ensure you have read the rules in {} so that your future behaviour \
             adheres to them.",
            self.config.rules_location
        );

        if level >= MAX_SHOWN_LEVEL {
            let _ = write!(
                text,
                "\nBecause you now have been given {MAX_SHOWN_LEVEL} strikes, you have been \
                 banned from {community}"
            );
            match &self.config.moderation_contact {
                Some(contact) => {
                    let _ = write!(text, " and we have contacted {contact} for further action & advice.");
                }
                None => text.push('.'),
            }
        }

        text.push_str("\n\nA moderator will be in contact with you shortly, to discuss this further.");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::{DirectChannel, MockDirectChannel, MockDirectMessageGateway};
    use mockall::predicate::eq;

    fn config() -> NotificationConfig {
        NotificationConfig {
            community_name: "CSS".into(),
            moderation_document_url: Some("https://example.org/moderation".into()),
            moderation_contact: Some("the Guild".into()),
            rules_location: "#welcome".into(),
        }
    }

    fn dispatcher(dms: MockDirectMessageGateway) -> NotificationDispatcher {
        NotificationDispatcher::new(Arc::new(dms), config())
    }

    #[test]
    fn render_names_level_and_rules() {
        let text = dispatcher(MockDirectMessageGateway::new()).render(1, ConsequenceTier::Timeout);

        assert!(text.contains("to 1 and"));
        assert!(text.contains("(time-out)"));
        assert!(text.contains("#welcome"));
        assert!(text.contains("<https://example.org/moderation>"));
        assert!(!text.contains("banned"));
    }

    #[test]
    fn render_clamps_level_and_mentions_ban() {
        let text = dispatcher(MockDirectMessageGateway::new()).render(5, ConsequenceTier::Ban);

        assert!(text.contains("to 3 and"));
        assert!(text.contains("banned from CSS and we have contacted the Guild"));
    }

    #[test]
    fn render_without_optional_settings() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(MockDirectMessageGateway::new()),
            NotificationConfig::default(),
        );
        let text = dispatcher.render(3, ConsequenceTier::Ban);

        assert!(!text.contains("moderation document"));
        assert!(text.contains("banned from the community."));
    }

    #[tokio::test]
    async fn delivers_rendered_text() {
        let expected = dispatcher(MockDirectMessageGateway::new()).render(2, ConsequenceTier::Remove);

        let mut dms = MockDirectMessageGateway::new();
        dms.expect_open_channel()
            .with(eq(MemberId(9)))
            .times(1)
            .returning(move |_| {
                let mut channel = MockDirectChannel::new();
                channel
                    .expect_send()
                    .with(eq(expected.clone()))
                    .times(1)
                    .returning(|_| Ok(()));
                Ok(Box::new(channel) as Box<dyn DirectChannel>)
            });

        assert!(dispatcher(dms).notify(MemberId(9), 2, ConsequenceTier::Remove).await);
    }

    #[tokio::test]
    async fn blocked_member_is_not_an_error() {
        let mut dms = MockDirectMessageGateway::new();
        dms.expect_open_channel()
            .returning(|_| Err(GatewayError::PermissionDenied("messages blocked".into())));

        assert!(!dispatcher(dms).notify(MemberId(9), 1, ConsequenceTier::Timeout).await);
    }

    #[tokio::test]
    async fn failed_send_is_not_an_error() {
        let mut dms = MockDirectMessageGateway::new();
        dms.expect_open_channel().returning(|_| {
            let mut channel = MockDirectChannel::new();
            channel
                .expect_send()
                .returning(|_| Err(GatewayError::Unavailable("closed".into())));
            Ok(Box::new(channel) as Box<dyn DirectChannel>)
        });

        assert!(!dispatcher(dms).notify(MemberId(9), 1, ConsequenceTier::Timeout).await);
    }
}
