//! Manual moderation observed through platform events

mod common;

use chrono::{TimeZone, Utc};
use common::capture_logs;
use pretty_assertions::assert_eq;
use strike_core::{
    AuditAction, ConsequenceTier, ManualActionEvent, ManualTrigger, MemberId, MemberSnapshot,
    ReconcileOutcome, StrikeOutcome, StrikeService,
};
use strike_test_utils::{strike_request, Reply, TestHarness, MODERATOR, OTHER_MODERATOR};
use tracing::Level;

const SUBJECT: MemberId = MemberId(7_000);

#[tokio::test(start_paused = true)]
async fn late_audit_entry_is_attributed() {
    let harness = TestHarness::new();
    harness.seed_strikes(SUBJECT, 1).await;
    harness
        .audit
        .publish_on_query(AuditAction::Ban, SUBJECT, OTHER_MODERATOR, 3);

    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberBanned(MemberSnapshot::member(SUBJECT)))
        .await
        .unwrap();

    let ReconcileOutcome::Attributed(report) = &outcome else {
        panic!("expected an attributed outcome, got {outcome:?}");
    };
    assert_eq!(report.actor, Some(OTHER_MODERATOR));
    assert_eq!(report.attempts, 3);
    assert_eq!(report.record.strike_count, 2);
    assert_eq!(report.escalation.tier, ConsequenceTier::Remove);
    assert!(!report.out_of_sync);
    assert!(report.notified);
    assert_eq!(harness.strikes(SUBJECT).await, 2);
    assert_eq!(harness.audit.queries(AuditAction::Ban, SUBJECT), 3);

    // Manual actions are only recorded, never re-applied
    assert!(harness.moderation.calls().is_empty());
    assert!(harness.dms.sent()[0].1.contains("(ban)"));
}

#[tokio::test(start_paused = true)]
async fn missing_audit_entry_is_recorded_and_escalated() {
    let (logs, _guard) = capture_logs();
    let harness = TestHarness::new();

    let started = tokio::time::Instant::now();
    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberRemoved(MemberSnapshot::member(SUBJECT)))
        .await
        .unwrap();

    let ReconcileOutcome::Unattributed(report) = &outcome else {
        panic!("expected an unattributed outcome, got {outcome:?}");
    };
    assert_eq!(report.actor, None);
    assert_eq!(report.attempts, harness.config.audit.retry.max_attempts());
    assert_eq!(report.record.strike_count, 1);
    assert_eq!(harness.strikes(SUBJECT).await, 1);
    assert_eq!(started.elapsed(), harness.config.audit.retry.total_delay());

    let errors = logs.at(Level::ERROR);
    assert!(
        errors.iter().any(|m| m.contains("could not be attributed")),
        "expected an error-level report, got {errors:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn audit_outage_is_retried() {
    let harness = TestHarness::new();
    harness.audit.fail_next(2);
    harness.audit.publish(AuditAction::Kick, SUBJECT, MODERATOR);

    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberRemoved(MemberSnapshot::member(SUBJECT)))
        .await
        .unwrap();

    assert_eq!(outcome.report().map(|r| r.attempts), Some(3));
    assert!(matches!(outcome, ReconcileOutcome::Attributed(_)));
}

#[tokio::test(start_paused = true)]
async fn manual_timeout_is_attributed() {
    let harness = TestHarness::new();
    harness
        .audit
        .publish(AuditAction::MemberTimeout, SUBJECT, MODERATOR);
    let before = MemberSnapshot::member(SUBJECT);

    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberUpdated {
            before,
            after: before.with_timeout(),
        })
        .await
        .unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(report.event.kind, ConsequenceTier::Timeout);
    assert_eq!(report.actor, Some(MODERATOR));
    assert_eq!(harness.strikes(SUBJECT).await, 1);
}

#[tokio::test]
async fn ordinary_updates_are_ignored() {
    let harness = TestHarness::new();
    let member = MemberSnapshot::member(SUBJECT);

    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberUpdated {
            before: member,
            after: member,
        })
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Ignored(_)));
    assert_eq!(harness.audit.total_queries(SUBJECT), 0);
    assert_eq!(harness.strikes(SUBJECT).await, 0);
}

#[tokio::test]
async fn bots_are_never_struck() {
    let harness = TestHarness::new();
    harness.audit.publish(AuditAction::Kick, SUBJECT, MODERATOR);

    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberRemoved(
            MemberSnapshot::member(SUBJECT).bot(),
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Ignored(_)));
    assert_eq!(harness.strikes(SUBJECT).await, 0);
}

#[tokio::test(start_paused = true)]
async fn same_event_is_counted_once() {
    let harness = TestHarness::new();
    harness.audit.publish(AuditAction::Kick, SUBJECT, MODERATOR);
    let event = ManualActionEvent::now(ConsequenceTier::Remove, SUBJECT);

    let first = harness.system.reconciler().reconcile(event).await.unwrap();
    let second = harness.system.reconciler().reconcile(event).await.unwrap();

    assert!(matches!(first, ReconcileOutcome::Attributed(_)));
    assert_eq!(second, ReconcileOutcome::Duplicate);
    assert_eq!(harness.strikes(SUBJECT).await, 1);
}

#[tokio::test(start_paused = true)]
async fn redelivery_across_a_bucket_edge_is_counted_once() {
    let harness = TestHarness::new();
    harness.audit.publish(AuditAction::Ban, SUBJECT, MODERATOR);
    let base = (Utc::now().timestamp() / 60) * 60;
    let at = |secs: i64| ManualActionEvent {
        kind: ConsequenceTier::Ban,
        subject: SUBJECT,
        observed_at: Utc.timestamp_opt(secs, 0).unwrap(),
    };

    let later = harness.system.reconciler().reconcile(at(base + 1)).await.unwrap();
    let earlier = harness.system.reconciler().reconcile(at(base - 1)).await.unwrap();

    assert!(matches!(later, ReconcileOutcome::Attributed(_)));
    assert_eq!(earlier, ReconcileOutcome::Duplicate);
    assert_eq!(harness.strikes(SUBJECT).await, 1);
}

#[tokio::test(start_paused = true)]
async fn entries_older_than_the_lookback_are_not_attributed() {
    let harness = TestHarness::new();
    let stale = Utc::now() - chrono::Duration::minutes(10);
    harness
        .audit
        .publish_at(AuditAction::Kick, SUBJECT, MODERATOR, stale);

    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberRemoved(MemberSnapshot::member(SUBJECT)))
        .await
        .unwrap();

    let ReconcileOutcome::Unattributed(report) = &outcome else {
        panic!("expected an unattributed outcome, got {outcome:?}");
    };
    assert_eq!(report.actor, None);
    assert_eq!(report.record.strike_count, 1);
    assert_eq!(harness.strikes(SUBJECT).await, 1);
}

#[tokio::test(start_paused = true)]
async fn kick_of_a_struck_out_member_is_flagged() {
    let harness = TestHarness::new();
    harness.seed_strikes(SUBJECT, 3).await;
    harness.audit.publish(AuditAction::Kick, SUBJECT, MODERATOR);

    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberRemoved(MemberSnapshot::member(SUBJECT)))
        .await
        .unwrap();

    let report = outcome.report().unwrap();
    assert!(report.out_of_sync);
    assert_eq!(report.escalation.tier, ConsequenceTier::Ban);
    assert_eq!(report.escalation.anomaly.map(|a| a.count), Some(4));
}

#[tokio::test(start_paused = true)]
async fn concurrent_strike_and_manual_kick_both_count() {
    let harness = TestHarness::new();
    harness.audit.publish(AuditAction::Kick, SUBJECT, OTHER_MODERATOR);
    harness.interactions.reply(Reply::yes(MODERATOR));

    let (strike, manual) = futures::join!(
        harness.system.issue_strike(strike_request(SUBJECT)),
        harness
            .system
            .handle_manual_action(ManualTrigger::MemberRemoved(MemberSnapshot::member(SUBJECT)))
    );

    let strike = strike.unwrap();
    let manual = manual.unwrap();
    assert!(matches!(strike, StrikeOutcome::Applied { .. }));
    assert!(matches!(manual, ReconcileOutcome::Attributed(_)));

    let mut counts = vec![
        strike.recorded().unwrap().strike_count,
        manual.report().unwrap().record.strike_count,
    ];
    counts.sort_unstable();
    assert_eq!(counts, vec![1, 2]);
    assert_eq!(harness.strikes(SUBJECT).await, 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_correlation() {
    let harness = TestHarness::new();
    harness.shutdown.shutdown();

    let outcome = harness
        .system
        .handle_manual_action(ManualTrigger::MemberRemoved(MemberSnapshot::member(SUBJECT)))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Cancelled);
    assert_eq!(harness.strikes(SUBJECT).await, 0);
}
