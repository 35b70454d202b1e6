use super::ExposureTracker;
use crate::error::ServiceResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Redis-backed exposure counters.
///
/// Keys: discovery:exposure:{viewer_id} (hash candidate_id -> times shown)
/// TTL: session horizon, set when the session's first exposure is recorded
#[derive(Clone)]
pub struct RedisExposureTracker {
    redis: ConnectionManager,
    horizon_secs: i64,
    key_prefix: String,
}

impl RedisExposureTracker {
    pub fn new(redis: ConnectionManager, horizon_secs: i64) -> Self {
        Self {
            redis,
            horizon_secs,
            key_prefix: "discovery:exposure".to_string(),
        }
    }

    fn key(&self, viewer_id: Uuid) -> String {
        format!("{}:{}", self.key_prefix, viewer_id)
    }
}

#[async_trait]
impl ExposureTracker for RedisExposureTracker {
    async fn exposure_counts(
        &self,
        viewer_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> ServiceResult<HashMap<Uuid, u32>> {
        if candidate_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let fields: Vec<String> = candidate_ids.iter().map(Uuid::to_string).collect();
        let counts: Vec<Option<u32>> = redis::cmd("HMGET")
            .arg(self.key(viewer_id))
            .arg(&fields)
            .query_async(&mut self.redis.clone())
            .await?;

        Ok(candidate_ids
            .iter()
            .zip(counts)
            .filter_map(|(id, count)| count.map(|c| (*id, c)))
            .collect())
    }

    async fn record_exposures(
        &self,
        viewer_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> ServiceResult<()> {
        if candidate_ids.is_empty() {
            return Ok(());
        }

        let key = self.key(viewer_id);
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in candidate_ids {
            pipe.hincr(&key, id.to_string(), 1).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        // Session horizon starts with the first recorded exposure
        let ttl: i64 = conn.ttl(&key).await?;
        if ttl < 0 {
            let _: () = conn.expire(&key, self.horizon_secs).await?;
            debug!(viewer_id = %viewer_id, horizon_secs = self.horizon_secs, "exposure session started");
        }
        Ok(())
    }
}

struct ViewerSession {
    started_at: DateTime<Utc>,
    counts: HashMap<Uuid, u32>,
}

/// Process-local exposure counters, used when Redis is not configured
pub struct InMemoryExposureTracker {
    sessions: DashMap<Uuid, ViewerSession>,
    horizon: Duration,
}

impl InMemoryExposureTracker {
    pub fn new(horizon_secs: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            horizon: Duration::seconds(horizon_secs),
        }
    }

    fn is_live(&self, session: &ViewerSession, now: DateTime<Utc>) -> bool {
        now - session.started_at < self.horizon
    }
}

#[async_trait]
impl ExposureTracker for InMemoryExposureTracker {
    async fn exposure_counts(
        &self,
        viewer_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> ServiceResult<HashMap<Uuid, u32>> {
        let now = Utc::now();
        let Some(session) = self.sessions.get(&viewer_id) else {
            return Ok(HashMap::new());
        };
        if !self.is_live(&session, now) {
            return Ok(HashMap::new());
        }

        Ok(candidate_ids
            .iter()
            .filter_map(|id| session.counts.get(id).map(|c| (*id, *c)))
            .collect())
    }

    async fn record_exposures(
        &self,
        viewer_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> ServiceResult<()> {
        if candidate_ids.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut session = self.sessions.entry(viewer_id).or_insert_with(|| ViewerSession {
            started_at: now,
            counts: HashMap::new(),
        });
        if !self.is_live(&session, now) {
            session.started_at = now;
            session.counts.clear();
        }
        for id in candidate_ids {
            *session.counts.entry(*id).or_insert(0) += 1;
        }
        Ok(())
    }
}
