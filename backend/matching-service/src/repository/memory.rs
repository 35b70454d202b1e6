//! In-process store with the same semantics as the PostgreSQL repositories.
//!
//! The ledger and quota state each sit behind a single tokio mutex, which
//! makes every mutating call one serialized unit: check, debit and insert
//! happen under the same guard or not at all.

use super::{
    ActorDirectory, BlockRepository, EntitlementProvider, GiftLedgerRepository, PoolOrder,
    PoolQuery, QuotaAdmission, QuotaLimits, QuotaRepository, QuotaUsage, MONTHLY_WINDOW_DAYS,
    WEEKLY_WINDOW_DAYS,
};
use crate::domain::{
    ActorProfile, Currency, EchoOffer, EchoOfferOutcome, EchoResponse, EchoState, EchoTransition,
    GiftStock, Like, Spark, SparkOutcome, SparkStatus, StockComponent,
};
use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    likes: HashMap<(Uuid, Uuid), Like>,
    sparks: Vec<Spark>,
    echoes: Vec<EchoOffer>,
    stocks: HashMap<(Uuid, Currency), GiftStock>,
}

impl LedgerState {
    /// Close active sparks for the pair whose TTL has passed
    fn expire_sparks(&mut self, sender_id: Uuid, receiver_id: Uuid, now: DateTime<Utc>) {
        for spark in self.sparks.iter_mut().filter(|s| {
            s.sender_id == sender_id
                && s.receiver_id == receiver_id
                && s.status == SparkStatus::Active
        }) {
            if !spark.is_active_at(now) {
                spark.status = SparkStatus::Expired;
            }
        }
    }

    fn expire_echoes(&mut self, sender_id: Uuid, receiver_id: Uuid, now: DateTime<Utc>) {
        for echo in self.echoes.iter_mut().filter(|e| {
            e.sender_id == sender_id && e.receiver_id == receiver_id && e.state == EchoState::Offered
        }) {
            if !echo.is_pending_at(now) {
                echo.state = EchoState::Expired;
            }
        }
    }

    fn active_spark(&self, sender_id: Uuid, receiver_id: Uuid, now: DateTime<Utc>) -> bool {
        self.sparks
            .iter()
            .any(|s| s.sender_id == sender_id && s.receiver_id == receiver_id && s.is_active_at(now))
    }

    fn pending_echo(&self, sender_id: Uuid, receiver_id: Uuid, now: DateTime<Utc>) -> bool {
        self.echoes.iter().any(|e| {
            e.sender_id == sender_id && e.receiver_id == receiver_id && e.is_pending_at(now)
        })
    }

    fn stock_mut(&mut self, actor_id: Uuid, currency: Currency) -> &mut GiftStock {
        self.stocks
            .entry((actor_id, currency))
            .or_insert_with(|| GiftStock::empty(actor_id, currency))
    }
}

#[derive(Default)]
struct QuotaState {
    grants: HashMap<(Uuid, Uuid), DateTime<Utc>>,
}

impl QuotaState {
    fn usage(&self, opener_id: Uuid, now: DateTime<Utc>) -> QuotaUsage {
        let weekly_since = now - Duration::days(WEEKLY_WINDOW_DAYS);
        let monthly_since = now - Duration::days(MONTHLY_WINDOW_DAYS);

        let mut usage = QuotaUsage::default();
        for ((opener, _), granted_at) in &self.grants {
            if *opener != opener_id {
                continue;
            }
            if *granted_at > weekly_since {
                usage.weekly_used += 1;
            }
            if *granted_at > monthly_since {
                usage.monthly_used += 1;
            }
        }
        usage
    }
}

/// Store for tests and single-node development runs
#[derive(Default)]
pub struct InMemoryStore {
    profiles: RwLock<HashMap<Uuid, ActorProfile>>,
    blocks: RwLock<HashSet<(Uuid, Uuid)>>,
    entitlements: RwLock<HashSet<Uuid>>,
    ledger: Mutex<LedgerState>,
    quota: Mutex<QuotaState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stand-in for the profile collaborator's writes
    pub async fn upsert_profile(&self, profile: ActorProfile) {
        self.profiles.write().await.insert(profile.id, profile);
    }

    /// Stand-in for the entitlement collaborator's writes
    pub async fn set_unrestricted_messaging(&self, actor_id: Uuid, enabled: bool) {
        let mut entitlements = self.entitlements.write().await;
        if enabled {
            entitlements.insert(actor_id);
        } else {
            entitlements.remove(&actor_id);
        }
    }

    /// Overwrite a stock row, bypassing the ledger
    pub async fn set_stock(&self, actor_id: Uuid, currency: Currency, periodic: i64, purchased: i64) {
        let mut ledger = self.ledger.lock().await;
        let stock = ledger.stock_mut(actor_id, currency);
        stock.periodic = periodic;
        stock.purchased = purchased;
    }

    pub async fn like_count(&self, sender_id: Uuid, receiver_id: Uuid) -> usize {
        let ledger = self.ledger.lock().await;
        usize::from(ledger.likes.contains_key(&(sender_id, receiver_id)))
    }

    pub async fn active_spark_count(&self, sender_id: Uuid, receiver_id: Uuid) -> usize {
        let now = Utc::now();
        let ledger = self.ledger.lock().await;
        ledger
            .sparks
            .iter()
            .filter(|s| s.sender_id == sender_id && s.receiver_id == receiver_id && s.is_active_at(now))
            .count()
    }

    pub async fn pending_echo_count(&self, sender_id: Uuid, receiver_id: Uuid) -> usize {
        let now = Utc::now();
        let ledger = self.ledger.lock().await;
        ledger
            .echoes
            .iter()
            .filter(|e| e.sender_id == sender_id && e.receiver_id == receiver_id && e.is_pending_at(now))
            .count()
    }

    pub async fn echo_states(&self, sender_id: Uuid, receiver_id: Uuid) -> Vec<EchoState> {
        let ledger = self.ledger.lock().await;
        ledger
            .echoes
            .iter()
            .filter(|e| e.sender_id == sender_id && e.receiver_id == receiver_id)
            .map(|e| e.state)
            .collect()
    }
}

#[async_trait]
impl ActorDirectory for InMemoryStore {
    async fn get_profile(&self, actor_id: Uuid) -> ServiceResult<Option<ActorProfile>> {
        Ok(self.profiles.read().await.get(&actor_id).cloned())
    }

    async fn get_profiles(&self, actor_ids: &[Uuid]) -> ServiceResult<Vec<ActorProfile>> {
        let profiles = self.profiles.read().await;
        Ok(actor_ids
            .iter()
            .filter_map(|id| profiles.get(id).cloned())
            .collect())
    }

    async fn candidate_pool(&self, query: &PoolQuery) -> ServiceResult<Vec<ActorProfile>> {
        let bbox = query.center.bounding_box(query.radius_m);
        let profiles = self.profiles.read().await;

        let mut pool: Vec<(ActorProfile, f64)> = profiles
            .values()
            .filter(|p| p.id != query.viewer_id)
            .filter(|p| p.gender == Some(query.gender) && p.seeking == Some(query.seeking))
            .filter(|p| {
                p.birth_date
                    .map_or(false, |b| b >= query.birth_date_min && b <= query.birth_date_max)
            })
            .filter(|p| query.created_after.map_or(true, |after| p.created_at >= after))
            .filter_map(|p| {
                let loc = p.location.filter(|loc| bbox.contains(loc))?;
                Some((p.clone(), query.center.distance_m(&loc)))
            })
            .collect();

        match query.order {
            PoolOrder::Newest => pool.sort_by(|(a, _), (b, _)| {
                b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
            }),
            PoolOrder::Nearest => pool.sort_by(|(a, da), (b, db)| {
                da.total_cmp(db).then_with(|| a.id.cmp(&b.id))
            }),
        }

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
        let pool = pool
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(p, _)| p)
            .collect();
        Ok(pool)
    }
}

#[async_trait]
impl BlockRepository for InMemoryStore {
    async fn create_block(&self, blocker_id: Uuid, blocked_id: Uuid) -> ServiceResult<bool> {
        Ok(self.blocks.write().await.insert((blocker_id, blocked_id)))
    }

    async fn delete_block(&self, blocker_id: Uuid, blocked_id: Uuid) -> ServiceResult<bool> {
        Ok(self.blocks.write().await.remove(&(blocker_id, blocked_id)))
    }

    async fn has_block_between(&self, actor_a: Uuid, actor_b: Uuid) -> ServiceResult<bool> {
        let blocks = self.blocks.read().await;
        Ok(blocks.contains(&(actor_a, actor_b)) || blocks.contains(&(actor_b, actor_a)))
    }

    async fn blocked_peers(&self, actor_id: Uuid) -> ServiceResult<HashSet<Uuid>> {
        let blocks = self.blocks.read().await;
        Ok(blocks
            .iter()
            .filter_map(|(blocker, blocked)| {
                if *blocker == actor_id {
                    Some(*blocked)
                } else if *blocked == actor_id {
                    Some(*blocker)
                } else {
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl EntitlementProvider for InMemoryStore {
    async fn has_unrestricted_messaging(&self, actor_id: Uuid) -> ServiceResult<bool> {
        Ok(self.entitlements.read().await.contains(&actor_id))
    }
}

#[async_trait]
impl GiftLedgerRepository for InMemoryStore {
    async fn insert_like(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let mut ledger = self.ledger.lock().await;
        if ledger.likes.contains_key(&(sender_id, receiver_id)) {
            return Ok(false);
        }
        ledger.likes.insert(
            (sender_id, receiver_id),
            Like {
                id: Uuid::new_v4(),
                sender_id,
                receiver_id,
                created_at: now,
            },
        );
        Ok(true)
    }

    async fn has_like(&self, sender_id: Uuid, receiver_id: Uuid) -> ServiceResult<bool> {
        Ok(self
            .ledger
            .lock()
            .await
            .likes
            .contains_key(&(sender_id, receiver_id)))
    }

    async fn send_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<(SparkOutcome, Option<Spark>)> {
        let mut ledger = self.ledger.lock().await;
        ledger.expire_sparks(sender_id, receiver_id, now);

        if ledger.active_spark(sender_id, receiver_id, now) {
            return Ok((SparkOutcome::AlreadySent, None));
        }
        if !ledger.stock_mut(sender_id, Currency::Spark).debit_one() {
            return Ok((SparkOutcome::InsufficientStock, None));
        }

        let spark = Spark {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            status: SparkStatus::Active,
            created_at: now,
            expires_at,
        };
        ledger.sparks.push(spark.clone());
        Ok((SparkOutcome::Sent, Some(spark)))
    }

    async fn withdraw_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let mut ledger = self.ledger.lock().await;
        ledger.expire_sparks(sender_id, receiver_id, now);

        match ledger.sparks.iter_mut().find(|s| {
            s.sender_id == sender_id && s.receiver_id == receiver_id && s.is_active_at(now)
        }) {
            Some(spark) => {
                spark.status = SparkStatus::Withdrawn;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn has_active_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        Ok(self.ledger.lock().await.active_spark(sender_id, receiver_id, now))
    }

    async fn offer_echo(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<(EchoOfferOutcome, Option<EchoOffer>)> {
        let mut ledger = self.ledger.lock().await;
        ledger.expire_sparks(sender_id, receiver_id, now);
        ledger.expire_echoes(sender_id, receiver_id, now);

        if !ledger.active_spark(sender_id, receiver_id, now) {
            return Ok((EchoOfferOutcome::HeartRequired, None));
        }
        if ledger.pending_echo(sender_id, receiver_id, now) {
            return Ok((EchoOfferOutcome::AlreadyOffered, None));
        }
        if !ledger.stock_mut(sender_id, Currency::Echo).debit_one() {
            return Ok((EchoOfferOutcome::InsufficientStock, None));
        }

        let echo = EchoOffer {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            state: EchoState::Offered,
            created_at: now,
            expires_at,
            responded_at: None,
        };
        ledger.echoes.push(echo.clone());
        Ok((EchoOfferOutcome::Offered, Some(echo)))
    }

    async fn respond_echo(
        &self,
        original_sender_id: Uuid,
        receiver_id: Uuid,
        response: EchoResponse,
        now: DateTime<Utc>,
    ) -> ServiceResult<EchoTransition> {
        let mut ledger = self.ledger.lock().await;
        ledger.expire_echoes(original_sender_id, receiver_id, now);

        if let Some(echo) = ledger.echoes.iter_mut().find(|e| {
            e.sender_id == original_sender_id && e.receiver_id == receiver_id && e.is_pending_at(now)
        }) {
            echo.state = response.target_state();
            echo.responded_at = Some(now);
            return Ok(EchoTransition::Applied(echo.clone()));
        }

        let previous = ledger
            .echoes
            .iter()
            .filter(|e| {
                e.sender_id == original_sender_id
                    && e.receiver_id == receiver_id
                    && e.state == response.target_state()
            })
            .max_by_key(|e| e.responded_at);

        Ok(match previous {
            Some(echo) => EchoTransition::Unchanged(echo.clone()),
            None => EchoTransition::NotFound,
        })
    }

    async fn has_pending_echo(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        Ok(self.ledger.lock().await.pending_echo(sender_id, receiver_id, now))
    }

    async fn has_returned_echo_between(
        &self,
        actor_a: Uuid,
        actor_b: Uuid,
    ) -> ServiceResult<bool> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.echoes.iter().any(|e| {
            e.state == EchoState::Returned
                && ((e.sender_id == actor_a && e.receiver_id == actor_b)
                    || (e.sender_id == actor_b && e.receiver_id == actor_a))
        }))
    }

    async fn stock(&self, actor_id: Uuid, currency: Currency) -> ServiceResult<GiftStock> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .stocks
            .get(&(actor_id, currency))
            .copied()
            .unwrap_or_else(|| GiftStock::empty(actor_id, currency)))
    }

    async fn credit_stock(
        &self,
        actor_id: Uuid,
        currency: Currency,
        component: StockComponent,
        amount: i64,
        _now: DateTime<Utc>,
    ) -> ServiceResult<GiftStock> {
        if amount <= 0 {
            return Err(ServiceError::InvalidInput(
                "Credit amount must be positive".to_string(),
            ));
        }

        let mut ledger = self.ledger.lock().await;
        let stock = ledger.stock_mut(actor_id, currency);
        let slot = match component {
            StockComponent::Periodic => &mut stock.periodic,
            StockComponent::Purchased => &mut stock.purchased,
        };
        *slot = slot
            .checked_add(amount)
            .ok_or_else(|| ServiceError::InvalidInput("Credit amount too large".to_string()))?;
        Ok(*stock)
    }

    async fn received_sparks(
        &self,
        receiver_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Spark>> {
        let ledger = self.ledger.lock().await;
        let mut sparks: Vec<Spark> = ledger
            .sparks
            .iter()
            .filter(|s| s.receiver_id == receiver_id && s.is_active_at(now))
            .cloned()
            .collect();
        sparks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sparks.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(sparks)
    }

    async fn pending_echoes(
        &self,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<EchoOffer>> {
        let ledger = self.ledger.lock().await;
        let mut echoes: Vec<EchoOffer> = ledger
            .echoes
            .iter()
            .filter(|e| e.receiver_id == receiver_id && e.is_pending_at(now))
            .cloned()
            .collect();
        echoes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(echoes)
    }
}

#[async_trait]
impl QuotaRepository for InMemoryStore {
    async fn try_consume(
        &self,
        opener_id: Uuid,
        target_id: Uuid,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
    ) -> ServiceResult<QuotaAdmission> {
        let mut quota = self.quota.lock().await;
        if quota.grants.contains_key(&(opener_id, target_id)) {
            return Ok(QuotaAdmission::AlreadyAdmitted);
        }

        let usage = quota.usage(opener_id, now);
        if !usage.admits(limits) {
            return Ok(QuotaAdmission::Exhausted);
        }

        quota.grants.insert((opener_id, target_id), now);
        let (weekly_remaining, monthly_remaining) = QuotaUsage {
            weekly_used: usage.weekly_used + 1,
            monthly_used: usage.monthly_used + 1,
        }
        .remaining(limits);

        Ok(QuotaAdmission::Consumed {
            weekly_remaining,
            monthly_remaining,
        })
    }

    async fn usage(&self, opener_id: Uuid, now: DateTime<Utc>) -> ServiceResult<QuotaUsage> {
        Ok(self.quota.lock().await.usage(opener_id, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_spark_can_be_sent_again() {
        let store = InMemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.set_stock(a, Currency::Spark, 2, 0).await;

        let t0 = Utc::now();
        let (outcome, _) = store
            .send_spark(a, b, t0, Some(t0 + Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(outcome, SparkOutcome::Sent);

        let (outcome, _) = store.send_spark(a, b, t0 + Duration::hours(1), None).await.unwrap();
        assert_eq!(outcome, SparkOutcome::AlreadySent);

        let later = t0 + Duration::days(2);
        assert!(!store.has_active_spark(a, b, later).await.unwrap());
        let (outcome, _) = store.send_spark(a, b, later, None).await.unwrap();
        assert_eq!(outcome, SparkOutcome::Sent);
        assert_eq!(store.stock(a, Currency::Spark).await.unwrap().balance(), 0);
    }

    #[tokio::test]
    async fn test_expired_echo_cannot_be_returned_and_can_be_offered_again() {
        let store = InMemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.set_stock(a, Currency::Spark, 1, 0).await;
        store.set_stock(a, Currency::Echo, 2, 0).await;

        let t0 = Utc::now();
        let (outcome, _) = store.send_spark(a, b, t0, None).await.unwrap();
        assert_eq!(outcome, SparkOutcome::Sent);
        let (outcome, _) = store
            .offer_echo(a, b, t0, Some(t0 + Duration::days(7)))
            .await
            .unwrap();
        assert_eq!(outcome, EchoOfferOutcome::Offered);
        assert_eq!(store.pending_echoes(b, t0).await.unwrap().len(), 1);

        let later = t0 + Duration::days(8);
        assert!(!store.has_pending_echo(a, b, later).await.unwrap());
        assert!(store.pending_echoes(b, later).await.unwrap().is_empty());

        let transition = store
            .respond_echo(a, b, EchoResponse::Return, later)
            .await
            .unwrap();
        assert!(matches!(transition, EchoTransition::NotFound));
        assert!(!store.has_returned_echo_between(a, b).await.unwrap());

        let (outcome, _) = store.offer_echo(a, b, later, None).await.unwrap();
        assert_eq!(outcome, EchoOfferOutcome::Offered);
        assert_eq!(store.pending_echoes(b, later).await.unwrap().len(), 1);
        assert_eq!(store.stock(a, Currency::Echo).await.unwrap().balance(), 0);
    }

    #[tokio::test]
    async fn test_quota_window_rolls_forward() {
        let store = InMemoryStore::new();
        let opener = Uuid::new_v4();
        let limits = QuotaLimits {
            weekly: 1,
            monthly: 5,
        };

        let t0 = Utc::now();
        let first = store
            .try_consume(opener, Uuid::new_v4(), &limits, t0)
            .await
            .unwrap();
        assert!(matches!(first, QuotaAdmission::Consumed { weekly_remaining: 0, .. }));

        let second = store
            .try_consume(opener, Uuid::new_v4(), &limits, t0 + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(second, QuotaAdmission::Exhausted);

        let third = store
            .try_consume(opener, Uuid::new_v4(), &limits, t0 + Duration::days(8))
            .await
            .unwrap();
        assert!(matches!(third, QuotaAdmission::Consumed { monthly_remaining: 3, .. }));
    }

    #[tokio::test]
    async fn test_credit_rejects_non_positive_amount() {
        let store = InMemoryStore::new();
        let err = store
            .credit_stock(Uuid::new_v4(), Currency::Echo, StockComponent::Purchased, 0, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
