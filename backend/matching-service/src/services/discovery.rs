use super::visibility;
use crate::domain::{ActorProfile, DiscoveryAttributes};
use crate::error::ServiceResult;
use crate::metrics::DISCOVERY_RESULTS_TOTAL;
use crate::repository::{ActorDirectory, BlockRepository, ExposureTracker, PoolOrder, PoolQuery};
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Pool page size per requested result slot. Visibility and exposure
/// filtering run on each page; further pages are fetched only while the
/// result is short.
const POOL_OVERFETCH: usize = 10;
const MIN_POOL_PAGE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryTier {
    Strict,
    Relaxed,
    Wide,
}

impl DiscoveryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryTier::Strict => "strict",
            DiscoveryTier::Relaxed => "relaxed",
            DiscoveryTier::Wide => "wide",
        }
    }
}

impl FromStr for DiscoveryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(DiscoveryTier::Strict),
            "relaxed" => Ok(DiscoveryTier::Relaxed),
            "wide" => Ok(DiscoveryTier::Wide),
            other => Err(format!("unknown discovery tier: {}", other)),
        }
    }
}

/// Constraints for one discovery pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryPolicy {
    pub tier: DiscoveryTier,
    pub radius_m: f64,
    /// Candidate age must be within viewer age ± this many years
    pub age_delta: u32,
    /// Only candidates created within this many days; `None` disables the
    /// restriction and switches ranking to nearest-first
    pub recency_days: Option<u32>,
    pub limit: usize,
}

impl DiscoveryPolicy {
    pub fn strict() -> Self {
        Self {
            tier: DiscoveryTier::Strict,
            radius_m: 10_000.0,
            age_delta: 5,
            recency_days: Some(14),
            limit: 20,
        }
    }

    pub fn relaxed() -> Self {
        Self {
            tier: DiscoveryTier::Relaxed,
            radius_m: 10_000.0,
            age_delta: 7,
            recency_days: None,
            limit: 20,
        }
    }

    pub fn wide() -> Self {
        Self {
            tier: DiscoveryTier::Wide,
            radius_m: 100_000.0,
            age_delta: 15,
            recency_days: None,
            limit: 20,
        }
    }

    /// True when every candidate admitted by `tighter` is admitted by `self`
    pub fn is_relaxation_of(&self, tighter: &DiscoveryPolicy) -> bool {
        let recency_ok = match (self.recency_days, tighter.recency_days) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(loose), Some(tight)) => loose >= tight,
        };
        self.radius_m >= tighter.radius_m && self.age_delta >= tighter.age_delta && recency_ok
    }

    /// Age window `[viewer_age - delta, viewer_age + delta]`
    pub fn age_range(&self, viewer_age: u32) -> (u32, u32) {
        (
            viewer_age.saturating_sub(self.age_delta),
            viewer_age.saturating_add(self.age_delta),
        )
    }

    /// Storage order matching this tier's ranking
    pub fn pool_order(&self) -> PoolOrder {
        if self.recency_days.is_some() {
            PoolOrder::Newest
        } else {
            PoolOrder::Nearest
        }
    }

    fn created_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.recency_days
            .and_then(|days| now.checked_sub_signed(Duration::days(i64::from(days))))
    }

    /// Geographic, age, orientation and recency predicate.
    ///
    /// Returns the distance in metres when the candidate passes. Visibility
    /// and exposure are checked separately.
    pub fn admits(
        &self,
        viewer: &DiscoveryAttributes,
        candidate: &ActorProfile,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let attrs = candidate.discovery_attributes(today)?;
        if !reciprocal(viewer, &attrs) {
            return None;
        }

        let distance = viewer.location.distance_m(&attrs.location);
        if distance > self.radius_m {
            return None;
        }

        let (min_age, max_age) = self.age_range(viewer.age);
        if attrs.age < min_age || attrs.age > max_age {
            return None;
        }

        if let Some(after) = self.created_after(now) {
            if candidate.created_at < after {
                return None;
            }
        }

        Some(distance)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(format!("{} tier radius must be positive", self.tier.as_str()));
        }
        if self.limit == 0 {
            return Err(format!("{} tier limit must be positive", self.tier.as_str()));
        }
        Ok(())
    }
}

/// Two-bucket orientation match: each side must be what the other seeks.
/// Symmetric in its arguments.
pub fn reciprocal(viewer: &DiscoveryAttributes, candidate: &DiscoveryAttributes) -> bool {
    candidate.gender == viewer.seeking && candidate.seeking == viewer.gender
}

/// Birth-date range covering every age in `[min_age, max_age]` on `today`.
///
/// Slightly wider than exact at leap-day boundaries; the engine re-checks
/// ages on the fetched rows.
pub fn birth_date_bounds(today: NaiveDate, min_age: u32, max_age: u32) -> (NaiveDate, NaiveDate) {
    let years_back = |years: u32| {
        today
            .checked_sub_months(Months::new(years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN)
    };
    let earliest = years_back(max_age.saturating_add(1));
    let latest = years_back(min_age);
    (earliest, latest)
}

/// Ordered tiers tried by `discover_tiered`, each a relaxation of the last
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyLadder {
    tiers: Vec<DiscoveryPolicy>,
}

impl PolicyLadder {
    pub fn new(tiers: Vec<DiscoveryPolicy>) -> Result<Self, String> {
        if tiers.is_empty() {
            return Err("discovery ladder needs at least one tier".to_string());
        }
        for policy in &tiers {
            policy.validate()?;
        }
        for pair in tiers.windows(2) {
            if !pair[1].is_relaxation_of(&pair[0]) {
                return Err(format!(
                    "{} tier must be looser than {} tier",
                    pair[1].tier.as_str(),
                    pair[0].tier.as_str()
                ));
            }
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[DiscoveryPolicy] {
        &self.tiers
    }

    pub fn get(&self, tier: DiscoveryTier) -> Option<&DiscoveryPolicy> {
        self.tiers.iter().find(|p| p.tier == tier)
    }
}

impl Default for PolicyLadder {
    fn default() -> Self {
        Self {
            tiers: vec![
                DiscoveryPolicy::strict(),
                DiscoveryPolicy::relaxed(),
                DiscoveryPolicy::wide(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryResult {
    /// Tier that produced the candidates; `None` when every tier was empty
    pub tier: Option<DiscoveryTier>,
    pub candidates: Vec<Uuid>,
}

struct Viewer {
    profile: ActorProfile,
    attrs: DiscoveryAttributes,
    blocked_peers: HashSet<Uuid>,
}

/// Candidate discovery with visibility filtering, exposure capping and
/// tiered fallback
#[derive(Clone)]
pub struct DiscoveryEngine {
    directory: Arc<dyn ActorDirectory>,
    blocks: Arc<dyn BlockRepository>,
    exposure: Arc<dyn ExposureTracker>,
    ladder: PolicyLadder,
    exposure_cap: u32,
}

impl DiscoveryEngine {
    pub fn new(
        directory: Arc<dyn ActorDirectory>,
        blocks: Arc<dyn BlockRepository>,
        exposure: Arc<dyn ExposureTracker>,
        ladder: PolicyLadder,
        exposure_cap: u32,
    ) -> Self {
        Self {
            directory,
            blocks,
            exposure,
            ladder,
            exposure_cap,
        }
    }

    pub fn ladder(&self) -> &PolicyLadder {
        &self.ladder
    }

    /// Run a single policy. Empty when the viewer lacks age, gender or
    /// location.
    #[instrument(skip(self, policy), fields(tier = policy.tier.as_str()))]
    pub async fn discover(
        &self,
        viewer_id: Uuid,
        policy: &DiscoveryPolicy,
    ) -> ServiceResult<Vec<Uuid>> {
        let now = Utc::now();
        let Some(viewer) = self.load_viewer(viewer_id, now).await? else {
            return Ok(Vec::new());
        };
        self.run_policy(&viewer, policy, now).await
    }

    /// Try each ladder tier in order and stop at the first non-empty one
    #[instrument(skip(self))]
    pub async fn discover_tiered(&self, viewer_id: Uuid) -> ServiceResult<DiscoveryResult> {
        let now = Utc::now();
        let Some(viewer) = self.load_viewer(viewer_id, now).await? else {
            DISCOVERY_RESULTS_TOTAL.with_label_values(&["empty"]).inc();
            return Ok(DiscoveryResult {
                tier: None,
                candidates: Vec::new(),
            });
        };

        for policy in self.ladder.tiers() {
            let candidates = self.run_policy(&viewer, policy, now).await?;
            if !candidates.is_empty() {
                DISCOVERY_RESULTS_TOTAL
                    .with_label_values(&[policy.tier.as_str()])
                    .inc();
                info!(
                    viewer_id = %viewer_id,
                    tier = policy.tier.as_str(),
                    count = candidates.len(),
                    "discovery resolved"
                );
                return Ok(DiscoveryResult {
                    tier: Some(policy.tier),
                    candidates,
                });
            }
            debug!(viewer_id = %viewer_id, tier = policy.tier.as_str(), "tier empty, widening");
        }

        DISCOVERY_RESULTS_TOTAL.with_label_values(&["empty"]).inc();
        Ok(DiscoveryResult {
            tier: None,
            candidates: Vec::new(),
        })
    }

    async fn load_viewer(&self, viewer_id: Uuid, now: DateTime<Utc>) -> ServiceResult<Option<Viewer>> {
        let Some(profile) = self.directory.get_profile(viewer_id).await? else {
            debug!(viewer_id = %viewer_id, "unknown viewer, nothing to discover");
            return Ok(None);
        };
        let Some(attrs) = profile.discovery_attributes(now.date_naive()) else {
            debug!(viewer_id = %viewer_id, "viewer profile incomplete, nothing to discover");
            return Ok(None);
        };
        let blocked_peers = self.blocks.blocked_peers(viewer_id).await?;

        Ok(Some(Viewer {
            profile,
            attrs,
            blocked_peers,
        }))
    }

    async fn run_policy(
        &self,
        viewer: &Viewer,
        policy: &DiscoveryPolicy,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Uuid>> {
        let today = now.date_naive();
        let (min_age, max_age) = policy.age_range(viewer.attrs.age);
        let (birth_date_min, birth_date_max) = birth_date_bounds(today, min_age, max_age);

        let page_size = policy.limit.saturating_mul(POOL_OVERFETCH).max(MIN_POOL_PAGE);
        let mut query = PoolQuery {
            viewer_id: viewer.profile.id,
            gender: viewer.attrs.seeking,
            seeking: viewer.attrs.gender,
            birth_date_min,
            birth_date_max,
            center: viewer.attrs.location,
            radius_m: policy.radius_m,
            created_after: policy.created_after(now),
            order: policy.pool_order(),
            offset: 0,
            limit: i64::try_from(page_size).unwrap_or(i64::MAX),
        };

        // Pages arrive in ranking order, so the first `limit` survivors are
        // the best `limit` of the whole pool
        let mut selected: Vec<(ActorProfile, f64)> = Vec::new();
        loop {
            let page = self.directory.candidate_pool(&query).await?;
            let fetched = page.len();

            let mut eligible: Vec<(ActorProfile, f64)> = page
                .into_iter()
                .filter(|c| c.id != viewer.profile.id)
                .filter_map(|c| {
                    let distance = policy.admits(&viewer.attrs, &c, today, now)?;
                    let blocked = viewer.blocked_peers.contains(&c.id);
                    visibility::is_visible(&viewer.profile, &c, blocked).then_some((c, distance))
                })
                .collect();

            if !eligible.is_empty() {
                let ids: Vec<Uuid> = eligible.iter().map(|(c, _)| c.id).collect();
                let exposures = self
                    .exposure
                    .exposure_counts(viewer.profile.id, &ids)
                    .await?;
                eligible.retain(|(c, _)| {
                    exposures.get(&c.id).copied().unwrap_or(0) < self.exposure_cap
                });
                selected.extend(eligible);
            }

            if selected.len() >= policy.limit || fetched < page_size {
                break;
            }
            query.offset = query
                .offset
                .saturating_add(i64::try_from(fetched).unwrap_or(i64::MAX));
            debug!(
                viewer_id = %viewer.profile.id,
                offset = query.offset,
                found = selected.len(),
                "pool page short of survivors, fetching next"
            );
        }

        rank(&mut selected, policy);
        selected.truncate(policy.limit);

        let selected: Vec<Uuid> = selected.into_iter().map(|(c, _)| c.id).collect();
        self.exposure
            .record_exposures(viewer.profile.id, &selected)
            .await?;
        Ok(selected)
    }
}

/// Newest first under a recency restriction, otherwise nearest first.
/// Ties break on id so the order is stable.
fn rank(candidates: &mut [(ActorProfile, f64)], policy: &DiscoveryPolicy) {
    match policy.pool_order() {
        PoolOrder::Newest => candidates.sort_by(|(a, _), (b, _)| {
            b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
        }),
        PoolOrder::Nearest => candidates.sort_by(|(a, da), (b, db)| {
            da.total_cmp(db).then_with(|| a.id.cmp(&b.id))
        }),
    }
}
