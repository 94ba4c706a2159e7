//! Moderator-initiated strikes end to end

use pretty_assertions::assert_eq;
use std::time::Duration;
use strike_core::{
    ConfirmationError, ConsequenceTier, Control, GatewayError, IgnoreReason, ManualTrigger,
    MemberId, MemberSnapshot, PromptSignal, ReconcileOutcome, RejectionCause, StrikeError,
    StrikeOutcome, StrikeService,
};
use strike_test_utils::{strike_request, Reply, TestHarness, MODERATOR, OTHER_MODERATOR};

const SUBJECT: MemberId = MemberId(5_000);

#[tokio::test(start_paused = true)]
async fn first_strike_confirmed_times_out_member() {
    let harness = TestHarness::new();
    harness.interactions.reply(Reply::yes(MODERATOR));

    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();

    let StrikeOutcome::Applied {
        tier,
        record,
        anomaly,
        notified,
        ..
    } = &outcome
    else {
        panic!("expected the consequence to be applied, got {outcome:?}");
    };
    assert_eq!(*tier, ConsequenceTier::Timeout);
    assert_eq!(record.strike_count, 1);
    assert_eq!(*anomaly, None);
    assert!(*notified);
    assert_eq!(harness.strikes(SUBJECT).await, 1);

    let calls = harness.moderation.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tier, ConsequenceTier::Timeout);
    assert_eq!(calls[0].member, SUBJECT);
    assert_eq!(calls[0].duration, Some(Duration::from_secs(24 * 3_600)));
    assert!(calls[0].reason.contains("breaking the rules"));

    assert_eq!(harness.dms.attempts(), vec![SUBJECT]);
    assert!(harness.dms.sent()[0].1.contains("to 1 and"));

    let prompt = harness.interactions.last_prompt().unwrap();
    assert_eq!(
        harness.interactions.final_content(prompt).unwrap(),
        outcome.summary()
    );
    assert_eq!(harness.system.confirmation().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_prompt_changes_nothing() {
    let harness = TestHarness::new();
    harness.seed_strikes(SUBJECT, 2).await;

    let started = tokio::time::Instant::now();
    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        StrikeOutcome::TimedOut {
            subject: SUBJECT,
            tier: ConsequenceTier::Ban
        }
    );
    assert_eq!(started.elapsed(), harness.config.confirmation_wait());
    assert_eq!(harness.strikes(SUBJECT).await, 2);
    assert!(harness.moderation.calls().is_empty());
    assert!(harness.dms.attempts().is_empty());

    let prompt = harness.interactions.last_prompt().unwrap();
    assert!(harness
        .interactions
        .final_content(prompt)
        .unwrap()
        .contains("No action was taken"));
}

#[tokio::test]
async fn declined_prompt_changes_nothing() {
    let harness = TestHarness::new();
    harness.seed_strikes(SUBJECT, 1).await;
    harness.interactions.reply(Reply::no(MODERATOR));

    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        StrikeOutcome::Cancelled {
            subject: SUBJECT,
            tier: ConsequenceTier::Remove
        }
    );
    assert_eq!(harness.strikes(SUBJECT).await, 1);
    assert!(harness.moderation.calls().is_empty());
    let prompt = harness.interactions.last_prompt().unwrap();
    assert_eq!(
        harness.interactions.final_content(prompt).unwrap(),
        "Aborted performing kick action on <@5000>."
    );
}

#[tokio::test]
async fn invalidated_prompt_is_a_cancellation() {
    let harness = TestHarness::new();
    harness.interactions.reply(Reply::Invalidate);

    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();

    assert!(matches!(outcome, StrikeOutcome::Cancelled { .. }));
    assert_eq!(harness.strikes(SUBJECT).await, 0);
}

#[tokio::test]
async fn escalates_through_all_tiers() {
    let harness = TestHarness::new();
    let mut tiers = Vec::new();

    for _ in 0..3 {
        harness.interactions.reply(Reply::yes(MODERATOR));
        let outcome = harness
            .system
            .issue_strike(strike_request(SUBJECT))
            .await
            .unwrap();
        if let StrikeOutcome::Applied { tier, .. } = outcome {
            tiers.push(tier);
        }
    }

    assert_eq!(tiers, ConsequenceTier::ALL.to_vec());
    assert_eq!(harness.strikes(SUBJECT).await, 3);
    assert!(harness.dms.sent()[2].1.contains("banned from"));
}

#[tokio::test]
async fn strikes_beyond_the_last_tier_warn_and_ban() {
    let harness = TestHarness::new();
    harness.seed_strikes(SUBJECT, 3).await;
    harness.interactions.reply(Reply::yes(MODERATOR));

    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();

    let StrikeOutcome::Applied { tier, anomaly, record, .. } = &outcome else {
        panic!("expected the consequence to be applied, got {outcome:?}");
    };
    assert_eq!(*tier, ConsequenceTier::Ban);
    assert_eq!(record.strike_count, 4);
    assert_eq!(anomaly.map(|a| a.count), Some(4));
    assert!(outcome.summary().contains("Warning:"));

    let (_, prompt) = &harness.interactions.prompts()[0];
    assert!(prompt.content.contains("should be banned"));
}

#[tokio::test]
async fn platform_rejection_is_reported_not_retried() {
    let harness = TestHarness::new();
    harness.moderation.fail(
        ConsequenceTier::Timeout,
        GatewayError::PermissionDenied("subject outranks the bot".into()),
    );
    harness.interactions.reply(Reply::yes(MODERATOR));

    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();

    let StrikeOutcome::Rejected { cause, record, .. } = &outcome else {
        panic!("expected a rejection, got {outcome:?}");
    };
    assert_eq!(
        *cause,
        RejectionCause::PermissionDenied("subject outranks the bot".into())
    );
    assert_eq!(record.strike_count, 1);
    assert!(harness.moderation.calls().is_empty());

    let prompt = harness.interactions.last_prompt().unwrap();
    assert!(harness
        .interactions
        .final_content(prompt)
        .unwrap()
        .contains("time-out action failed"));
}

#[tokio::test]
async fn unreachable_member_does_not_block_the_strike() {
    let harness = TestHarness::new();
    harness.dms.block(SUBJECT);
    harness.interactions.reply(Reply::yes(MODERATOR));

    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        StrikeOutcome::Applied {
            notified: false,
            ..
        }
    ));
    assert_eq!(harness.moderation.calls().len(), 1);
}

#[tokio::test]
async fn invoker_without_role_is_refused() {
    let harness = TestHarness::new();
    harness.roles.revoke(MODERATOR);

    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();

    assert_eq!(
        outcome.summary(),
        "Only members with the privileged role may issue strikes."
    );
    assert!(harness.interactions.prompts().is_empty());
    assert_eq!(harness.strikes(SUBJECT).await, 0);
}

#[tokio::test(start_paused = true)]
async fn role_lost_mid_prompt_lets_another_moderator_decide() {
    let harness = TestHarness::new();

    let strike = harness.system.issue_strike(strike_request(SUBJECT));
    let moderate = async {
        while harness.interactions.last_prompt().is_none() {
            tokio::task::yield_now().await;
        }
        let prompt = harness.interactions.last_prompt().unwrap();
        harness.roles.revoke(MODERATOR);
        harness
            .interactions
            .signal(
                prompt,
                PromptSignal::Activated {
                    by: OTHER_MODERATOR,
                    controls: vec![Control::Affirm],
                },
            )
            .await
    };

    let (outcome, delivered) = tokio::join!(strike, moderate);
    assert!(delivered);
    assert!(matches!(outcome.unwrap(), StrikeOutcome::Applied { .. }));
    assert_eq!(harness.strikes(SUBJECT).await, 1);
}

#[tokio::test]
async fn bot_subjects_are_refused() {
    let harness = TestHarness::new();
    let mut request = strike_request(SUBJECT);
    request.subject = MemberSnapshot::member(SUBJECT).bot();

    let outcome = harness.system.issue_strike(request).await.unwrap();

    assert_eq!(
        outcome.summary(),
        "Member cannot be given an additional strike because they are a bot."
    );
    assert!(harness.interactions.prompts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_waiting_is_neither_confirmed_nor_cancelled() {
    let harness = TestHarness::new();
    harness.seed_strikes(SUBJECT, 1).await;

    let strike = harness.system.issue_strike(strike_request(SUBJECT));
    let stop = async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        harness.shutdown.shutdown();
    };

    let (result, ()) = tokio::join!(strike, stop);
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        StrikeError::Confirmation(ConfirmationError::Interrupted)
    ));
    assert!(err.is_retryable());
    assert_eq!(harness.strikes(SUBJECT).await, 1);
    assert!(harness.moderation.calls().is_empty());
    assert_eq!(harness.system.confirmation().pending_count(), 0);
}

#[tokio::test]
async fn own_ban_is_not_counted_again() {
    let harness = TestHarness::new();
    harness.seed_strikes(SUBJECT, 2).await;
    harness.interactions.reply(Reply::yes(MODERATOR));

    let outcome = harness
        .system
        .issue_strike(strike_request(SUBJECT))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        StrikeOutcome::Applied {
            tier: ConsequenceTier::Ban,
            ..
        }
    ));

    let member = MemberSnapshot::member(SUBJECT);
    assert_eq!(
        harness
            .system
            .handle_manual_action(ManualTrigger::MemberRemoved(member))
            .await
            .unwrap(),
        ReconcileOutcome::Ignored(IgnoreReason::RemovedByBan)
    );
    assert_eq!(
        harness
            .system
            .handle_manual_action(ManualTrigger::MemberBanned(member))
            .await
            .unwrap(),
        ReconcileOutcome::SelfInitiated
    );
    assert_eq!(harness.strikes(SUBJECT).await, 3);
}
