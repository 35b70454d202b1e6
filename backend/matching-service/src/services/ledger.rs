use super::events::NotificationBus;
use crate::domain::{
    Currency, EchoDeclineOutcome, EchoOffer, EchoOfferOutcome, EchoResponse, EchoReturnOutcome,
    EchoTransition, GiftStatus, GiftStock, LikeOutcome, Spark, SparkOutcome,
    SparkWithdrawOutcome, StockComponent,
};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::record_gift;
use crate::repository::{BlockRepository, GiftLedgerRepository};
use chrono::{DateTime, Duration, Utc};
use event_schema::{
    ConversationUnlockedEvent, EchoOfferedEvent, EchoReturnedEvent, MatchingEvent,
    SparkSentEvent, UnlockReason,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub const MAX_RECEIVED_SPARKS: i64 = 100;

/// Lifetimes of gift records. `None` never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GiftPolicy {
    pub spark_ttl: Option<Duration>,
    pub echo_ttl: Option<Duration>,
}

impl Default for GiftPolicy {
    fn default() -> Self {
        Self {
            spark_ttl: None,
            echo_ttl: Some(Duration::days(7)),
        }
    }
}

pub(crate) fn ensure_distinct(actor_id: Uuid, target_id: Uuid) -> ServiceResult<()> {
    if actor_id == target_id {
        return Err(ServiceError::InvalidInput(
            "Cannot target yourself".to_string(),
        ));
    }
    Ok(())
}

/// Likes, sparks, echoes and the stocks that pay for them
#[derive(Clone)]
pub struct GiftLedgerService {
    ledger: Arc<dyn GiftLedgerRepository>,
    blocks: Arc<dyn BlockRepository>,
    events: NotificationBus,
    policy: GiftPolicy,
}

impl GiftLedgerService {
    pub fn new(
        ledger: Arc<dyn GiftLedgerRepository>,
        blocks: Arc<dyn BlockRepository>,
        events: NotificationBus,
        policy: GiftPolicy,
    ) -> Self {
        Self {
            ledger,
            blocks,
            events,
            policy,
        }
    }

    /// A TTL reaching past the representable range never expires
    fn expiry(ttl: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        ttl.and_then(|ttl| now.checked_add_signed(ttl))
    }

    #[instrument(skip(self))]
    pub async fn send_like(&self, sender_id: Uuid, receiver_id: Uuid) -> ServiceResult<LikeOutcome> {
        ensure_distinct(sender_id, receiver_id)?;

        let outcome = if self.blocks.has_block_between(sender_id, receiver_id).await? {
            LikeOutcome::Blocked
        } else if self
            .ledger
            .insert_like(sender_id, receiver_id, Utc::now())
            .await?
        {
            LikeOutcome::Created
        } else {
            LikeOutcome::AlreadyExists
        };

        record_gift("like", outcome.as_str());
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn send_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> ServiceResult<SparkOutcome> {
        ensure_distinct(sender_id, receiver_id)?;

        if self.blocks.has_block_between(sender_id, receiver_id).await? {
            record_gift("spark", SparkOutcome::Blocked.as_str());
            return Ok(SparkOutcome::Blocked);
        }

        let now = Utc::now();
        let (outcome, spark) = self
            .ledger
            .send_spark(
                sender_id,
                receiver_id,
                now,
                Self::expiry(self.policy.spark_ttl, now),
            )
            .await?;
        record_gift("spark", outcome.as_str());

        if let Some(spark) = spark {
            info!(spark_id = %spark.id, sender_id = %sender_id, receiver_id = %receiver_id, "spark sent");
            self.events.publish(MatchingEvent::SparkSent(SparkSentEvent {
                spark_id: spark.id,
                sender_id,
                receiver_id,
                sent_at: spark.created_at,
            }));

            if self
                .ledger
                .has_active_spark(receiver_id, sender_id, now)
                .await?
            {
                info!(sender_id = %sender_id, receiver_id = %receiver_id, "mutual spark");
                self.events
                    .publish(MatchingEvent::ConversationUnlocked(ConversationUnlockedEvent {
                        actor_a: sender_id,
                        actor_b: receiver_id,
                        reason: UnlockReason::MutualSpark,
                        unlocked_at: now,
                    }));
            }
        }

        Ok(outcome)
    }

    /// Retract an active spark. The spent unit is not refunded.
    #[instrument(skip(self))]
    pub async fn withdraw_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> ServiceResult<SparkWithdrawOutcome> {
        ensure_distinct(sender_id, receiver_id)?;

        let outcome = if self
            .ledger
            .withdraw_spark(sender_id, receiver_id, Utc::now())
            .await?
        {
            SparkWithdrawOutcome::Withdrawn
        } else {
            SparkWithdrawOutcome::NotFound
        };

        record_gift("spark_withdraw", outcome.as_str());
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn offer_echo(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> ServiceResult<EchoOfferOutcome> {
        ensure_distinct(sender_id, receiver_id)?;

        if self.blocks.has_block_between(sender_id, receiver_id).await? {
            record_gift("echo_offer", EchoOfferOutcome::Blocked.as_str());
            return Ok(EchoOfferOutcome::Blocked);
        }

        let now = Utc::now();
        let (outcome, offer) = self
            .ledger
            .offer_echo(
                sender_id,
                receiver_id,
                now,
                Self::expiry(self.policy.echo_ttl, now),
            )
            .await?;
        record_gift("echo_offer", outcome.as_str());

        if let Some(offer) = offer {
            info!(echo_id = %offer.id, sender_id = %sender_id, receiver_id = %receiver_id, "echo offered");
            self.events.publish(MatchingEvent::EchoOffered(EchoOfferedEvent {
                echo_id: offer.id,
                sender_id,
                receiver_id,
                offered_at: offer.created_at,
                expires_at: offer.expires_at,
            }));
        }

        Ok(outcome)
    }

    /// Reciprocate a pending echo. Free for the returner; repeating the call
    /// reports `returned` again without a second event.
    #[instrument(skip(self))]
    pub async fn return_echo(
        &self,
        receiver_id: Uuid,
        original_sender_id: Uuid,
    ) -> ServiceResult<EchoReturnOutcome> {
        ensure_distinct(receiver_id, original_sender_id)?;

        // A block closes the pair; the offer can no longer unlock anything
        if self
            .blocks
            .has_block_between(receiver_id, original_sender_id)
            .await?
        {
            record_gift("echo_return", EchoReturnOutcome::NotFound.as_str());
            return Ok(EchoReturnOutcome::NotFound);
        }

        let now = Utc::now();
        let transition = self
            .ledger
            .respond_echo(original_sender_id, receiver_id, EchoResponse::Return, now)
            .await?;

        let outcome = match transition {
            EchoTransition::Applied(offer) => {
                info!(echo_id = %offer.id, offerer_id = %original_sender_id, returner_id = %receiver_id, "echo returned");
                self.events
                    .publish(MatchingEvent::EchoReturned(EchoReturnedEvent {
                        echo_id: offer.id,
                        offerer_id: original_sender_id,
                        returner_id: receiver_id,
                        returned_at: now,
                    }));
                self.events
                    .publish(MatchingEvent::ConversationUnlocked(ConversationUnlockedEvent {
                        actor_a: original_sender_id,
                        actor_b: receiver_id,
                        reason: UnlockReason::EchoReturned,
                        unlocked_at: now,
                    }));
                EchoReturnOutcome::Returned
            }
            EchoTransition::Unchanged(_) => EchoReturnOutcome::Returned,
            EchoTransition::NotFound => EchoReturnOutcome::NotFound,
        };

        record_gift("echo_return", outcome.as_str());
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn decline_echo(
        &self,
        receiver_id: Uuid,
        original_sender_id: Uuid,
    ) -> ServiceResult<EchoDeclineOutcome> {
        ensure_distinct(receiver_id, original_sender_id)?;

        let transition = self
            .ledger
            .respond_echo(original_sender_id, receiver_id, EchoResponse::Decline, Utc::now())
            .await?;

        let outcome = match transition {
            EchoTransition::Applied(_) | EchoTransition::Unchanged(_) => {
                EchoDeclineOutcome::Declined
            }
            EchoTransition::NotFound => EchoDeclineOutcome::NotFound,
        };

        record_gift("echo_decline", outcome.as_str());
        Ok(outcome)
    }

    pub async fn stock_balance(&self, actor_id: Uuid, currency: Currency) -> ServiceResult<GiftStock> {
        let stock = self.ledger.stock(actor_id, currency).await?;
        if stock.periodic < 0 || stock.purchased < 0 {
            return Err(ServiceError::integrity(format!(
                "negative {} stock for {}: periodic={} purchased={}",
                currency, actor_id, stock.periodic, stock.purchased
            )));
        }
        Ok(stock)
    }

    /// Replenishment by the subscription cycle
    pub async fn credit_periodic_stock(
        &self,
        actor_id: Uuid,
        currency: Currency,
        amount: i64,
    ) -> ServiceResult<GiftStock> {
        self.credit(actor_id, currency, StockComponent::Periodic, amount)
            .await
    }

    /// Replenishment by a completed purchase
    pub async fn credit_purchased_stock(
        &self,
        actor_id: Uuid,
        currency: Currency,
        amount: i64,
    ) -> ServiceResult<GiftStock> {
        self.credit(actor_id, currency, StockComponent::Purchased, amount)
            .await
    }

    async fn credit(
        &self,
        actor_id: Uuid,
        currency: Currency,
        component: StockComponent,
        amount: i64,
    ) -> ServiceResult<GiftStock> {
        if amount <= 0 {
            return Err(ServiceError::InvalidInput(
                "Credit amount must be positive".to_string(),
            ));
        }
        let stock = self
            .ledger
            .credit_stock(actor_id, currency, component, amount, Utc::now())
            .await?;
        info!(
            actor_id = %actor_id,
            currency = %currency,
            component = ?component,
            amount,
            balance = stock.balance(),
            "stock credited"
        );
        Ok(stock)
    }

    pub async fn received_sparks(&self, receiver_id: Uuid, limit: i64) -> ServiceResult<Vec<Spark>> {
        let limit = limit.clamp(1, MAX_RECEIVED_SPARKS);
        self.ledger
            .received_sparks(receiver_id, limit, Utc::now())
            .await
    }

    pub async fn pending_echoes(&self, receiver_id: Uuid) -> ServiceResult<Vec<EchoOffer>> {
        self.ledger.pending_echoes(receiver_id, Utc::now()).await
    }

    /// Gift state between `viewer_id` and `other_id`, seen from the viewer
    pub async fn gift_status(&self, viewer_id: Uuid, other_id: Uuid) -> ServiceResult<GiftStatus> {
        ensure_distinct(viewer_id, other_id)?;
        let now = Utc::now();

        let (liked, liked_by, spark_sent, spark_received, echo_offered, echo_received, echo_returned) = tokio::try_join!(
            self.ledger.has_like(viewer_id, other_id),
            self.ledger.has_like(other_id, viewer_id),
            self.ledger.has_active_spark(viewer_id, other_id, now),
            self.ledger.has_active_spark(other_id, viewer_id, now),
            self.ledger.has_pending_echo(viewer_id, other_id, now),
            self.ledger.has_pending_echo(other_id, viewer_id, now),
            self.ledger.has_returned_echo_between(viewer_id, other_id),
        )?;

        Ok(GiftStatus {
            liked,
            liked_by,
            spark_sent,
            spark_received,
            echo_offered,
            echo_received,
            echo_returned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStore;

    fn service(store: Arc<InMemoryStore>) -> (GiftLedgerService, NotificationBus) {
        let bus = NotificationBus::new(16);
        let service = GiftLedgerService::new(
            store.clone(),
            store,
            bus.clone(),
            GiftPolicy::default(),
        );
        (service, bus)
    }

    #[test]
    fn test_expiry_past_representable_range_never_expires() {
        let now = Utc::now();
        assert_eq!(
            GiftLedgerService::expiry(Some(Duration::days(7)), now),
            Some(now + Duration::days(7))
        );
        assert_eq!(
            GiftLedgerService::expiry(Some(Duration::days(1_000_000_000)), now),
            None
        );
        assert_eq!(GiftLedgerService::expiry(None, now), None);
    }

    #[tokio::test]
    async fn test_self_targeting_is_invalid_input() {
        let (service, _) = service(Arc::new(InMemoryStore::new()));
        let me = Uuid::new_v4();

        assert!(matches!(
            service.send_spark(me, me).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            service.send_like(me, me).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_mutual_spark_emits_unlock_event() {
        let store = Arc::new(InMemoryStore::new());
        let (service, bus) = service(store.clone());
        let mut rx = bus.subscribe();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.set_stock(a, Currency::Spark, 1, 0).await;
        store.set_stock(b, Currency::Spark, 0, 1).await;

        assert_eq!(service.send_spark(a, b).await.unwrap(), SparkOutcome::Sent);
        assert_eq!(service.send_spark(b, a).await.unwrap(), SparkOutcome::Sent);

        let kinds: Vec<&str> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.data.event_type())
        .collect();
        assert_eq!(kinds, vec!["spark_sent", "spark_sent", "conversation_unlocked"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_withdrawn_spark_is_not_refunded() {
        let store = Arc::new(InMemoryStore::new());
        let (service, _) = service(store.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.set_stock(a, Currency::Spark, 1, 0).await;

        service.send_spark(a, b).await.unwrap();
        assert_eq!(
            service.withdraw_spark(a, b).await.unwrap(),
            SparkWithdrawOutcome::Withdrawn
        );
        assert_eq!(
            service.withdraw_spark(a, b).await.unwrap(),
            SparkWithdrawOutcome::NotFound
        );
        assert_eq!(service.stock_balance(a, Currency::Spark).await.unwrap().balance(), 0);
        assert_eq!(
            service.send_spark(a, b).await.unwrap(),
            SparkOutcome::InsufficientStock
        );
    }

    #[tokio::test]
    async fn test_decline_closes_offer_for_return() {
        let store = Arc::new(InMemoryStore::new());
        let (service, _) = service(store.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.set_stock(a, Currency::Spark, 1, 0).await;
        store.set_stock(a, Currency::Echo, 1, 0).await;

        service.send_spark(a, b).await.unwrap();
        assert_eq!(service.offer_echo(a, b).await.unwrap(), EchoOfferOutcome::Offered);
        assert_eq!(
            service.decline_echo(b, a).await.unwrap(),
            EchoDeclineOutcome::Declined
        );
        assert_eq!(
            service.decline_echo(b, a).await.unwrap(),
            EchoDeclineOutcome::Declined
        );
        assert_eq!(
            service.return_echo(b, a).await.unwrap(),
            EchoReturnOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_credit_rejects_non_positive_amount() {
        let (service, _) = service(Arc::new(InMemoryStore::new()));
        let err = service
            .credit_purchased_stock(Uuid::new_v4(), Currency::Spark, -3)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
