use crate::config::Config;
use crate::repository::{
    ActorDirectory, BlockRepository, EntitlementProvider, ExposureTracker, GiftLedgerRepository,
    InMemoryExposureTracker, InMemoryStore, PgActorDirectory, PgBlockRepository,
    PgEntitlementProvider, PgGiftLedger, PgQuotaRepository, QuotaLimits, QuotaRepository,
};
use crate::services::{
    BlockService, DiscoveryEngine, GiftLedgerService, GiftPolicy, MessagingGate,
    NotificationBus, PolicyLadder, VisibilityService,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Storage seams the services are built on
#[derive(Clone)]
pub struct Repositories {
    pub directory: Arc<dyn ActorDirectory>,
    pub blocks: Arc<dyn BlockRepository>,
    pub entitlements: Arc<dyn EntitlementProvider>,
    pub ledger: Arc<dyn GiftLedgerRepository>,
    pub quota: Arc<dyn QuotaRepository>,
    pub exposure: Arc<dyn ExposureTracker>,
}

impl Repositories {
    /// Everything backed by one in-process store
    pub fn in_memory(store: Arc<InMemoryStore>, exposure: Arc<dyn ExposureTracker>) -> Self {
        Self {
            directory: store.clone(),
            blocks: store.clone(),
            entitlements: store.clone(),
            ledger: store.clone(),
            quota: store,
            exposure,
        }
    }

    pub fn postgres(
        pool: PgPool,
        statement_timeout_ms: u64,
        exposure: Arc<dyn ExposureTracker>,
    ) -> Self {
        Self {
            directory: Arc::new(PgActorDirectory::new(pool.clone())),
            blocks: Arc::new(PgBlockRepository::new(pool.clone())),
            entitlements: Arc::new(PgEntitlementProvider::new(pool.clone())),
            ledger: Arc::new(PgGiftLedger::new(pool.clone(), statement_timeout_ms)),
            quota: Arc::new(PgQuotaRepository::new(pool, statement_timeout_ms)),
            exposure,
        }
    }
}

/// Tunables shared by the services
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub ladder: PolicyLadder,
    pub exposure_cap: u32,
    pub session_horizon_secs: i64,
    pub gift_policy: GiftPolicy,
    pub quota_limits: QuotaLimits,
    pub event_channel_capacity: usize,
    pub internal_api_key: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            ladder: PolicyLadder::default(),
            exposure_cap: 2,
            session_horizon_secs: 6 * 3600,
            gift_policy: GiftPolicy::default(),
            quota_limits: QuotaLimits::default(),
            event_channel_capacity: 1024,
            internal_api_key: None,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            ladder: config.discovery.ladder()?,
            exposure_cap: config.discovery.exposure_cap,
            session_horizon_secs: config.discovery.session_horizon_secs,
            gift_policy: config.gifts.policy(),
            quota_limits: config.quota.limits(),
            event_channel_capacity: config.events.channel_capacity,
            internal_api_key: config.internal.api_key.clone(),
        })
    }

    pub fn in_memory_exposure(&self) -> Arc<dyn ExposureTracker> {
        Arc::new(InMemoryExposureTracker::new(self.session_horizon_secs))
    }
}

/// Shared application state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub discovery: DiscoveryEngine,
    pub visibility: VisibilityService,
    pub gifts: GiftLedgerService,
    pub gate: MessagingGate,
    pub blocks: BlockService,
    pub events: NotificationBus,
    /// Secret for the internal routes; `None` refuses them all
    pub internal_api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn build(repos: Repositories, settings: ServiceSettings) -> Self {
        let events = NotificationBus::new(settings.event_channel_capacity);
        let internal_api_key = settings.internal_api_key.as_deref().map(Arc::from);

        Self {
            discovery: DiscoveryEngine::new(
                repos.directory.clone(),
                repos.blocks.clone(),
                repos.exposure.clone(),
                settings.ladder,
                settings.exposure_cap,
            ),
            visibility: VisibilityService::new(repos.directory.clone(), repos.blocks.clone()),
            gifts: GiftLedgerService::new(
                repos.ledger.clone(),
                repos.blocks.clone(),
                events.clone(),
                settings.gift_policy,
            ),
            gate: MessagingGate::new(
                repos.ledger,
                repos.blocks.clone(),
                repos.entitlements,
                repos.quota,
                settings.quota_limits,
                events.clone(),
            ),
            blocks: BlockService::new(repos.blocks),
            events,
            internal_api_key,
        }
    }

    /// Fully in-memory state, for tests and local runs without a database
    pub fn in_memory(store: Arc<InMemoryStore>, settings: ServiceSettings) -> Self {
        let exposure = settings.in_memory_exposure();
        Self::build(Repositories::in_memory(store, exposure), settings)
    }
}
