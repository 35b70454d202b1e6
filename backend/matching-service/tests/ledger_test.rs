//! Gift ledger behaviour against the in-memory store: outcomes, stock
//! accounting and concurrent callers.

mod common;

use common::*;
use event_schema::{MatchingEvent, UnlockReason};
use matching_service::domain::{
    AllowReason, Currency, EchoOfferOutcome, EchoReturnOutcome, EchoState, GateDecision,
    LikeOutcome, SparkOutcome, SparkWithdrawOutcome,
};
use matching_service::error::ServiceError;
use uuid::Uuid;

#[tokio::test]
async fn test_spark_debits_exactly_one_unit() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    app.store.set_stock(x, Currency::Spark, 1, 2).await;

    let outcome = app.state.gifts.send_spark(x, y).await.unwrap();
    assert_eq!(outcome, SparkOutcome::Sent);

    // Periodic allowance is spent first
    let stock = app.state.gifts.stock_balance(x, Currency::Spark).await.unwrap();
    assert_eq!(stock.periodic, 0);
    assert_eq!(stock.purchased, 2);
    assert_eq!(app.store.active_spark_count(x, y).await, 1);
}

#[tokio::test]
async fn test_spark_without_stock_changes_nothing() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;

    let outcome = app.state.gifts.send_spark(x, y).await.unwrap();
    assert_eq!(outcome, SparkOutcome::InsufficientStock);
    assert_eq!(app.store.active_spark_count(x, y).await, 0);

    let stock = app.state.gifts.stock_balance(x, Currency::Spark).await.unwrap();
    assert_eq!(stock.balance(), 0);
}

#[tokio::test]
async fn test_duplicate_spark_is_not_charged() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 5).await;

    assert_eq!(app.state.gifts.send_spark(x, y).await.unwrap(), SparkOutcome::Sent);
    assert_eq!(
        app.state.gifts.send_spark(x, y).await.unwrap(),
        SparkOutcome::AlreadySent
    );

    let stock = app.state.gifts.stock_balance(x, Currency::Spark).await.unwrap();
    assert_eq!(stock.balance(), 4);
}

#[tokio::test]
async fn test_concurrent_sparks_never_overdraw() {
    let app = test_app();
    let sender = add(&app.store, woman_seeking_man(30, PARIS)).await;
    give_sparks(&app.store, sender, 3).await;

    let mut receivers = Vec::new();
    for _ in 0..10 {
        receivers.push(add(&app.store, man_seeking_woman(30, PARIS)).await);
    }

    let handles: Vec<_> = receivers
        .iter()
        .map(|&receiver| {
            let gifts = app.state.gifts.clone();
            tokio::spawn(async move { gifts.send_spark(sender, receiver).await })
        })
        .collect();

    let outcomes: Vec<SparkOutcome> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked").expect("Ledger error"))
        .collect();

    let sent = outcomes.iter().filter(|o| **o == SparkOutcome::Sent).count();
    let refused = outcomes
        .iter()
        .filter(|o| **o == SparkOutcome::InsufficientStock)
        .count();
    assert_eq!(sent, 3, "exactly the available stock is spent");
    assert_eq!(refused, 7);

    let stock = app
        .state
        .gifts
        .stock_balance(sender, Currency::Spark)
        .await
        .unwrap();
    assert_eq!(stock.balance(), 0);

    let mut active = 0;
    for receiver in &receivers {
        active += app.store.active_spark_count(sender, *receiver).await;
    }
    assert_eq!(active, 3);
}

#[tokio::test]
async fn test_concurrent_duplicate_sparks_leave_one_active() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 10).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let gifts = app.state.gifts.clone();
            tokio::spawn(async move { gifts.send_spark(x, y).await })
        })
        .collect();

    let outcomes: Vec<SparkOutcome> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked").expect("Ledger error"))
        .collect();

    assert_eq!(outcomes.iter().filter(|o| **o == SparkOutcome::Sent).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == SparkOutcome::AlreadySent)
            .count(),
        9
    );
    assert_eq!(app.store.active_spark_count(x, y).await, 1);

    let stock = app.state.gifts.stock_balance(x, Currency::Spark).await.unwrap();
    assert_eq!(stock.balance(), 9, "only the winning call is charged");
}

#[tokio::test]
async fn test_concurrent_duplicate_echoes_leave_one_offered() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 1).await;
    give_echoes(&app.store, x, 5).await;
    assert_eq!(app.state.gifts.send_spark(x, y).await.unwrap(), SparkOutcome::Sent);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gifts = app.state.gifts.clone();
            tokio::spawn(async move { gifts.offer_echo(x, y).await })
        })
        .collect();

    let outcomes: Vec<EchoOfferOutcome> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked").expect("Ledger error"))
        .collect();

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == EchoOfferOutcome::Offered)
            .count(),
        1
    );
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, EchoOfferOutcome::Offered | EchoOfferOutcome::AlreadyOffered)));
    assert_eq!(app.store.pending_echo_count(x, y).await, 1);

    let stock = app.state.gifts.stock_balance(x, Currency::Echo).await.unwrap();
    assert_eq!(stock.balance(), 4);
}

#[tokio::test]
async fn test_concurrent_likes_are_idempotent() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let gifts = app.state.gifts.clone();
            tokio::spawn(async move { gifts.send_like(x, y).await })
        })
        .collect();

    let outcomes: Vec<LikeOutcome> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked").expect("Ledger error"))
        .collect();

    assert_eq!(outcomes.iter().filter(|o| **o == LikeOutcome::Created).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == LikeOutcome::AlreadyExists)
            .count(),
        9
    );
    assert_eq!(app.store.like_count(x, y).await, 1);
}

#[tokio::test]
async fn test_echo_requires_active_spark() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 1).await;
    give_echoes(&app.store, x, 5).await;

    let outcome = app.state.gifts.offer_echo(x, y).await.unwrap();
    assert_eq!(outcome, EchoOfferOutcome::HeartRequired);

    // A spark in the other direction does not count
    give_sparks(&app.store, y, 1).await;
    assert_eq!(app.state.gifts.send_spark(y, x).await.unwrap(), SparkOutcome::Sent);
    assert_eq!(
        app.state.gifts.offer_echo(x, y).await.unwrap(),
        EchoOfferOutcome::HeartRequired
    );

    // Nor does a withdrawn one
    assert_eq!(app.state.gifts.send_spark(x, y).await.unwrap(), SparkOutcome::Sent);
    assert_eq!(
        app.state.gifts.withdraw_spark(x, y).await.unwrap(),
        SparkWithdrawOutcome::Withdrawn
    );
    assert_eq!(
        app.state.gifts.offer_echo(x, y).await.unwrap(),
        EchoOfferOutcome::HeartRequired
    );

    let stock = app.state.gifts.stock_balance(x, Currency::Echo).await.unwrap();
    assert_eq!(stock.balance(), 5, "refused offers are free");
    assert!(app.store.echo_states(x, y).await.is_empty());
}

#[tokio::test]
async fn test_echo_without_stock_is_refused() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 1).await;
    app.state.gifts.send_spark(x, y).await.unwrap();

    let outcome = app.state.gifts.offer_echo(x, y).await.unwrap();
    assert_eq!(outcome, EchoOfferOutcome::InsufficientStock);
    assert_eq!(app.store.pending_echo_count(x, y).await, 0);
}

#[tokio::test]
async fn test_spark_then_echo_then_return_unlocks_conversation() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 1).await;
    give_echoes(&app.store, x, 1).await;
    give_echoes(&app.store, y, 2).await;

    assert_eq!(app.state.gifts.send_spark(x, y).await.unwrap(), SparkOutcome::Sent);
    assert_eq!(
        app.state.gifts.offer_echo(x, y).await.unwrap(),
        EchoOfferOutcome::Offered
    );

    let x_echo = app.state.gifts.stock_balance(x, Currency::Echo).await.unwrap();
    assert_eq!(x_echo.balance(), 0);
    assert_eq!(app.store.echo_states(x, y).await, vec![EchoState::Offered]);

    assert_eq!(
        app.state.gifts.return_echo(y, x).await.unwrap(),
        EchoReturnOutcome::Returned
    );
    assert_eq!(app.store.echo_states(x, y).await, vec![EchoState::Returned]);

    // Returning costs the returner nothing
    let y_echo = app.state.gifts.stock_balance(y, Currency::Echo).await.unwrap();
    assert_eq!(y_echo.balance(), 2);

    let decision = app.state.gate.can_open_conversation(x, y).await.unwrap();
    assert_eq!(decision, GateDecision::Allow(AllowReason::EchoReturned));
    let decision = app.state.gate.can_open_conversation(y, x).await.unwrap();
    assert_eq!(decision, GateDecision::Allow(AllowReason::EchoReturned));

    let status = app.state.gifts.gift_status(y, x).await.unwrap();
    assert!(status.spark_received);
    assert!(!status.echo_received, "no longer pending");
    assert!(status.echo_returned);
}

#[tokio::test]
async fn test_repeated_return_publishes_once() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 1).await;
    give_echoes(&app.store, x, 1).await;
    app.state.gifts.send_spark(x, y).await.unwrap();
    app.state.gifts.offer_echo(x, y).await.unwrap();

    let mut rx = app.state.events.subscribe();

    let first = app.state.gifts.return_echo(y, x).await;
    let second = app.state.gifts.return_echo(y, x).await;
    assert_eq!(tokio_test::assert_ok!(first), EchoReturnOutcome::Returned);
    assert_eq!(tokio_test::assert_ok!(second), EchoReturnOutcome::Returned);

    let mut returned = 0;
    let mut unlocked = 0;
    while let Ok(envelope) = rx.try_recv() {
        match envelope.data {
            MatchingEvent::EchoReturned(event) => {
                assert_eq!(event.offerer_id, x);
                returned += 1;
            }
            MatchingEvent::ConversationUnlocked(event) => {
                assert_eq!(event.reason, UnlockReason::EchoReturned);
                unlocked += 1;
            }
            other => panic!("unexpected event {}", other.event_type()),
        }
    }
    assert_eq!(returned, 1);
    assert_eq!(unlocked, 1);
}

#[tokio::test]
async fn test_declined_echo_cannot_be_returned() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 1).await;
    give_echoes(&app.store, x, 1).await;
    app.state.gifts.send_spark(x, y).await.unwrap();
    app.state.gifts.offer_echo(x, y).await.unwrap();

    app.state.gifts.decline_echo(y, x).await.unwrap();
    assert_eq!(app.store.echo_states(x, y).await, vec![EchoState::Declined]);

    assert_eq!(
        app.state.gifts.return_echo(y, x).await.unwrap(),
        EchoReturnOutcome::NotFound
    );
    assert!(app.state.gifts.pending_echoes(y).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blocked_pair_cannot_gift() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    give_sparks(&app.store, x, 3).await;
    give_echoes(&app.store, x, 3).await;

    // Blocked by the receiver; the sender is still refused
    app.state.blocks.block(y, x).await.unwrap();

    assert_eq!(app.state.gifts.send_like(x, y).await.unwrap(), LikeOutcome::Blocked);
    assert_eq!(app.state.gifts.send_spark(x, y).await.unwrap(), SparkOutcome::Blocked);
    assert_eq!(
        app.state.gifts.offer_echo(x, y).await.unwrap(),
        EchoOfferOutcome::Blocked
    );

    assert_eq!(app.store.like_count(x, y).await, 0);
    assert_eq!(app.store.active_spark_count(x, y).await, 0);
    let sparks = app.state.gifts.stock_balance(x, Currency::Spark).await.unwrap();
    let echoes = app.state.gifts.stock_balance(x, Currency::Echo).await.unwrap();
    assert_eq!(sparks.balance(), 3);
    assert_eq!(echoes.balance(), 3);
}

#[tokio::test]
async fn test_gifting_yourself_is_invalid() {
    let app = test_app();
    let x = Uuid::new_v4();
    give_sparks(&app.store, x, 1).await;

    let err = app.state.gifts.send_spark(x, x).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let stock = app.state.gifts.stock_balance(x, Currency::Spark).await.unwrap();
    assert_eq!(stock.balance(), 1);
}

#[tokio::test]
async fn test_credit_rejects_non_positive_amounts() {
    let app = test_app();
    let x = Uuid::new_v4();

    let err = app
        .state
        .gifts
        .credit_purchased_stock(x, Currency::Spark, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let stock = app
        .state
        .gifts
        .credit_purchased_stock(x, Currency::Spark, 5)
        .await
        .unwrap();
    assert_eq!(stock.purchased, 5);
    let stock = app
        .state
        .gifts
        .credit_periodic_stock(x, Currency::Spark, 2)
        .await
        .unwrap();
    assert_eq!(stock.balance(), 7);
}

#[tokio::test]
async fn test_received_sparks_lists_active_only() {
    let app = test_app();
    let (x, y) = pair(&app.store).await;
    let z = Uuid::new_v4();
    give_sparks(&app.store, x, 1).await;
    give_sparks(&app.store, z, 1).await;

    app.state.gifts.send_spark(x, y).await.unwrap();
    app.state.gifts.send_spark(z, y).await.unwrap();
    app.state.gifts.withdraw_spark(z, y).await.unwrap();

    let received = app.state.gifts.received_sparks(y, 50).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].sender_id, x);
}
