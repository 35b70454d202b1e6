//! Storage seams for the matching core.
//!
//! Each collaborator and each ledger concern is a trait so the services can
//! run against PostgreSQL in production and against `InMemoryStore` in
//! tests. Both implementations must give identical per-call semantics;
//! every mutating call is a single atomic unit.

pub mod exposure;
pub mod memory;
pub mod postgres;

use crate::domain::{
    ActorProfile, Currency, EchoOffer, EchoOfferOutcome, EchoResponse, EchoTransition, Gender,
    GeoPoint, GiftStock, Spark, SparkOutcome, StockComponent,
};
use crate::error::ServiceResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub use exposure::{InMemoryExposureTracker, RedisExposureTracker};
pub use memory::InMemoryStore;
pub use postgres::{
    PgActorDirectory, PgBlockRepository, PgEntitlementProvider, PgGiftLedger, PgQuotaRepository,
};

/// Order in which storage returns the candidate pool. Ties break on id
/// ascending, so a page sequence is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOrder {
    /// `created_at` descending
    Newest,
    /// Great-circle distance from `PoolQuery::center` ascending
    Nearest,
}

/// Coarse candidate query pushed down to storage, one page at a time.
///
/// Implementations may return a superset of the predicates; the discovery
/// engine re-checks every one of them. They must honour `order`, `offset`
/// and `limit` exactly, because the engine pages through the pool and stops
/// once it has enough survivors.
#[derive(Debug, Clone)]
pub struct PoolQuery {
    pub viewer_id: Uuid,
    /// Candidates must declare this gender
    pub gender: Gender,
    /// Candidates must seek this gender
    pub seeking: Gender,
    pub birth_date_min: NaiveDate,
    pub birth_date_max: NaiveDate,
    pub center: GeoPoint,
    pub radius_m: f64,
    pub created_after: Option<DateTime<Utc>>,
    pub order: PoolOrder,
    pub offset: i64,
    pub limit: i64,
}

/// Profile/location collaborator (read-only)
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn get_profile(&self, actor_id: Uuid) -> ServiceResult<Option<ActorProfile>>;

    async fn get_profiles(&self, actor_ids: &[Uuid]) -> ServiceResult<Vec<ActorProfile>>;

    async fn candidate_pool(&self, query: &PoolQuery) -> ServiceResult<Vec<ActorProfile>>;
}

#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Returns true if a new block was recorded
    async fn create_block(&self, blocker_id: Uuid, blocked_id: Uuid) -> ServiceResult<bool>;

    /// Returns true if a block was removed
    async fn delete_block(&self, blocker_id: Uuid, blocked_id: Uuid) -> ServiceResult<bool>;

    /// Check if either actor has blocked the other
    async fn has_block_between(&self, actor_a: Uuid, actor_b: Uuid) -> ServiceResult<bool>;

    /// Every actor with a block edge to or from `actor_id`
    async fn blocked_peers(&self, actor_id: Uuid) -> ServiceResult<HashSet<Uuid>>;
}

/// Paid-tier collaborator (read-only)
#[async_trait]
pub trait EntitlementProvider: Send + Sync {
    async fn has_unrestricted_messaging(&self, actor_id: Uuid) -> ServiceResult<bool>;
}

#[async_trait]
pub trait GiftLedgerRepository: Send + Sync {
    /// Idempotent; returns true if a new like was inserted
    async fn insert_like(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool>;

    async fn has_like(&self, sender_id: Uuid, receiver_id: Uuid) -> ServiceResult<bool>;

    /// Debit one spark and record an active spark, or neither.
    ///
    /// Never returns `SparkOutcome::Blocked`; block checks happen above.
    async fn send_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<(SparkOutcome, Option<Spark>)>;

    /// Returns true if an active spark was withdrawn
    async fn withdraw_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool>;

    async fn has_active_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool>;

    /// Debit one echo and record an `offered` echo, or neither.
    async fn offer_echo(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<(EchoOfferOutcome, Option<EchoOffer>)>;

    /// Close the pending offer `original_sender -> receiver`.
    ///
    /// Never touches the receiver's own stock.
    async fn respond_echo(
        &self,
        original_sender_id: Uuid,
        receiver_id: Uuid,
        response: EchoResponse,
        now: DateTime<Utc>,
    ) -> ServiceResult<EchoTransition>;

    async fn has_pending_echo(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool>;

    /// Any `returned` echo between the pair, in either direction
    async fn has_returned_echo_between(&self, actor_a: Uuid, actor_b: Uuid)
        -> ServiceResult<bool>;

    async fn stock(&self, actor_id: Uuid, currency: Currency) -> ServiceResult<GiftStock>;

    async fn credit_stock(
        &self,
        actor_id: Uuid,
        currency: Currency,
        component: StockComponent,
        amount: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<GiftStock>;

    /// Active sparks received, newest first
    async fn received_sparks(
        &self,
        receiver_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Spark>>;

    /// Offers awaiting `receiver_id`'s response, newest first
    async fn pending_echoes(
        &self,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<EchoOffer>>;
}

/// Free-conversation allowance per rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaLimits {
    pub weekly: u32,
    pub monthly: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            weekly: 3,
            monthly: 10,
        }
    }
}

/// Rolling window lengths
pub const WEEKLY_WINDOW_DAYS: i64 = 7;
pub const MONTHLY_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaAdmission {
    /// A slot was consumed for this pair by this call
    Consumed {
        weekly_remaining: u32,
        monthly_remaining: u32,
    },
    /// The pair was granted earlier; nothing consumed
    AlreadyAdmitted,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QuotaUsage {
    pub weekly_used: u32,
    pub monthly_used: u32,
}

impl QuotaUsage {
    pub fn admits(&self, limits: &QuotaLimits) -> bool {
        self.weekly_used < limits.weekly && self.monthly_used < limits.monthly
    }

    pub fn remaining(&self, limits: &QuotaLimits) -> (u32, u32) {
        (
            limits.weekly.saturating_sub(self.weekly_used),
            limits.monthly.saturating_sub(self.monthly_used),
        )
    }
}

#[async_trait]
pub trait QuotaRepository: Send + Sync {
    /// Consume one slot for `(opener, target)` unless the pair already holds
    /// one. At most one slot per pair, even under concurrent calls.
    async fn try_consume(
        &self,
        opener_id: Uuid,
        target_id: Uuid,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
    ) -> ServiceResult<QuotaAdmission>;

    async fn usage(&self, opener_id: Uuid, now: DateTime<Utc>) -> ServiceResult<QuotaUsage>;
}

/// Anti-repetition counters for discovery
#[async_trait]
pub trait ExposureTracker: Send + Sync {
    /// Times each candidate was shown to the viewer within the session horizon
    async fn exposure_counts(
        &self,
        viewer_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> ServiceResult<HashMap<Uuid, u32>>;

    async fn record_exposures(&self, viewer_id: Uuid, candidate_ids: &[Uuid])
        -> ServiceResult<()>;
}
