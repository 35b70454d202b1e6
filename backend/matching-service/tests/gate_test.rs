//! Messaging gate: block suppression, gift unlocks, entitlements and the
//! free-conversation quota.

mod common;

use common::*;
use event_schema::{MatchingEvent, UnlockReason};
use matching_service::domain::{AllowReason, DenyReason, GateDecision, SparkOutcome};
use matching_service::repository::QuotaLimits;
use matching_service::state::ServiceSettings;
use uuid::Uuid;

fn no_free_quota() -> ServiceSettings {
    ServiceSettings {
        quota_limits: QuotaLimits {
            weekly: 0,
            monthly: 0,
        },
        ..ServiceSettings::default()
    }
}

#[tokio::test]
async fn test_one_sided_spark_needs_quota_until_mutual() {
    let app = test_app_with(no_free_quota());
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 1).await;

    assert_eq!(app.state.gifts.send_spark(x, y).await.unwrap(), SparkOutcome::Sent);

    let decision = app.state.gate.can_open_conversation(x, y).await.unwrap();
    assert_eq!(decision, GateDecision::Deny(DenyReason::QuotaExhausted));
    assert!(!decision.is_allowed());

    give_sparks(&app.store, y, 1).await;
    assert_eq!(app.state.gifts.send_spark(y, x).await.unwrap(), SparkOutcome::Sent);

    let decision = app.state.gate.can_open_conversation(x, y).await.unwrap();
    assert_eq!(decision, GateDecision::Allow(AllowReason::MutualSpark));
    let decision = app.state.gate.can_open_conversation(y, x).await.unwrap();
    assert_eq!(decision, GateDecision::Allow(AllowReason::MutualSpark));
}

#[tokio::test]
async fn test_mutual_spark_publishes_unlock() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 1).await;
    give_sparks(&app.store, y, 1).await;
    let mut rx = app.state.events.subscribe();

    app.state.gifts.send_spark(x, y).await.unwrap();
    app.state.gifts.send_spark(y, x).await.unwrap();

    let unlocks: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|envelope| match envelope.data {
            MatchingEvent::ConversationUnlocked(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(unlocks.len(), 1);
    assert_eq!(unlocks[0].reason, UnlockReason::MutualSpark);
}

#[tokio::test]
async fn test_block_denies_in_both_directions() {
    let app = test_app();
    let a = add(&app.store, man_seeking_woman(30, PARIS)).await;
    let b = add(&app.store, woman_seeking_man(30, km_north(1.0))).await;
    give_sparks(&app.store, a, 1).await;
    give_sparks(&app.store, b, 1).await;
    app.store.set_unrestricted_messaging(a, true).await;

    app.state.gifts.send_spark(a, b).await.unwrap();
    app.state.gifts.send_spark(b, a).await.unwrap();
    assert!(app.state.visibility.is_visible(a, b).await.unwrap());

    app.state.blocks.block(a, b).await.unwrap();

    // Blocking overrides a mutual spark and the entitlement
    for (from, to) in [(a, b), (b, a)] {
        let decision = app.state.gate.can_open_conversation(from, to).await.unwrap();
        assert_eq!(decision, GateDecision::Deny(DenyReason::Blocked));
        assert!(!app.state.visibility.is_visible(from, to).await.unwrap());
    }

    app.state.blocks.unblock(a, b).await.unwrap();
    let decision = app.state.gate.can_open_conversation(b, a).await.unwrap();
    assert_eq!(decision, GateDecision::Allow(AllowReason::MutualSpark));
}

#[tokio::test]
async fn test_entitlement_of_either_side_allows_without_quota() {
    let app = test_app_with(no_free_quota());
    let (a, b) = pair(&app.store).await;

    app.store.set_unrestricted_messaging(b, true).await;
    let decision = app.state.gate.can_open_conversation(a, b).await.unwrap();
    assert_eq!(decision, GateDecision::Allow(AllowReason::Entitlement));

    app.store.set_unrestricted_messaging(b, false).await;
    app.store.set_unrestricted_messaging(a, true).await;
    let decision = app.state.gate.can_open_conversation(a, b).await.unwrap();
    assert_eq!(decision, GateDecision::Allow(AllowReason::Entitlement));

    let status = app.state.gate.quota_status(a).await.unwrap();
    assert_eq!(status.weekly_used, 0);
}

#[tokio::test]
async fn test_free_quota_consumed_once_per_pair_under_concurrency() {
    let app = test_app();
    let (a, b) = pair(&app.store).await;
    let mut rx = app.state.events.subscribe();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let gate = app.state.gate.clone();
            tokio::spawn(async move { gate.can_open_conversation(a, b).await })
        })
        .collect();

    let decisions: Vec<GateDecision> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked").expect("Gate error"))
        .collect();

    let first = decisions
        .iter()
        .filter(|d| **d == GateDecision::Allow(AllowReason::FreeQuota { first_admission: true }))
        .count();
    let repeat = decisions
        .iter()
        .filter(|d| **d == GateDecision::Allow(AllowReason::FreeQuota { first_admission: false }))
        .count();
    assert_eq!(first, 1);
    assert_eq!(repeat, 9);

    let status = app.state.gate.quota_status(a).await.unwrap();
    assert_eq!(status.weekly_used, 1);
    assert_eq!(status.monthly_used, 1);
    assert_eq!(status.weekly_remaining, 2);

    let unlocks = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|envelope| {
            matches!(
                &envelope.data,
                MatchingEvent::ConversationUnlocked(event) if event.reason == UnlockReason::FreeQuota
            )
        })
        .count();
    assert_eq!(unlocks, 1);
}

#[tokio::test]
async fn test_weekly_quota_exhausts() {
    let app = test_app();
    let opener = Uuid::new_v4();
    let targets: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    for target in &targets[..3] {
        let decision = app
            .state
            .gate
            .can_open_conversation(opener, *target)
            .await
            .unwrap();
        assert_eq!(
            decision,
            GateDecision::Allow(AllowReason::FreeQuota {
                first_admission: true
            })
        );
    }

    let decision = app
        .state
        .gate
        .can_open_conversation(opener, targets[3])
        .await
        .unwrap();
    assert_eq!(decision, GateDecision::Deny(DenyReason::QuotaExhausted));

    // Pairs admitted earlier stay open
    let decision = app
        .state
        .gate
        .can_open_conversation(opener, targets[0])
        .await
        .unwrap();
    assert_eq!(
        decision,
        GateDecision::Allow(AllowReason::FreeQuota {
            first_admission: false
        })
    );

    let status = app.state.gate.quota_status(opener).await.unwrap();
    assert_eq!(status.weekly_used, 3);
    assert_eq!(status.weekly_remaining, 0);
    assert_eq!(status.monthly_remaining, 7);
}

#[tokio::test]
async fn test_quota_is_per_opener() {
    let app = test_app_with(ServiceSettings {
        quota_limits: QuotaLimits {
            weekly: 1,
            monthly: 1,
        },
        ..ServiceSettings::default()
    });
    let (a, b) = pair(&app.store).await;

    assert!(app.state.gate.can_open_conversation(a, b).await.unwrap().is_allowed());
    // The target opening back is charged to the target's own allowance
    assert!(app.state.gate.can_open_conversation(b, a).await.unwrap().is_allowed());

    let c = Uuid::new_v4();
    let decision = app.state.gate.can_open_conversation(a, c).await.unwrap();
    assert_eq!(decision, GateDecision::Deny(DenyReason::QuotaExhausted));
}
