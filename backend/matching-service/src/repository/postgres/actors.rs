use super::parse_column;
use crate::domain::{ActorProfile, GeoPoint};
use crate::error::{ServiceError, ServiceResult};
use crate::repository::{
    ActorDirectory, BlockRepository, EntitlementProvider, PoolOrder, PoolQuery,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Location falls back to the postal-code centroid when no point is stored
const PROFILE_COLUMNS: &str = r#"
    p.id, p.birth_date, p.gender, p.seeking,
    COALESCE(p.latitude, pc.latitude) AS latitude,
    COALESCE(p.longitude, pc.longitude) AS longitude,
    p.certification_status, p.is_public, p.certified_viewers_only,
    p.shadow_restricted, p.created_at
"#;

/// Haversine distance in metres from ($12, $13), same formula and radius as
/// `GeoPoint::distance_m`
const DISTANCE_M: &str = r#"
    6371000.0 * 2 * ASIN(LEAST(1.0, SQRT(
        POWER(SIN(RADIANS(COALESCE(p.latitude, pc.latitude) - $12) / 2), 2)
        + COS(RADIANS($12)) * COS(RADIANS(COALESCE(p.latitude, pc.latitude)))
          * POWER(SIN(RADIANS(COALESCE(p.longitude, pc.longitude) - $13) / 2), 2)
    )))
"#;

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    birth_date: Option<NaiveDate>,
    gender: Option<String>,
    seeking: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    certification_status: String,
    is_public: bool,
    certified_viewers_only: bool,
    shadow_restricted: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for ActorProfile {
    type Error = ServiceError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(ActorProfile {
            id: row.id,
            birth_date: row.birth_date,
            gender: row
                .gender
                .as_deref()
                .map(|g| parse_column("gender", g))
                .transpose()?,
            seeking: row
                .seeking
                .as_deref()
                .map(|g| parse_column("seeking", g))
                .transpose()?,
            location: match (row.latitude, row.longitude) {
                (Some(lat), Some(lon)) => {
                    Some(GeoPoint::checked(lat, lon).map_err(ServiceError::Internal)?)
                }
                _ => None,
            },
            certification: parse_column("certification_status", &row.certification_status)?,
            is_public: row.is_public,
            certified_viewers_only: row.certified_viewers_only,
            shadow_restricted: row.shadow_restricted,
            created_at: row.created_at,
        })
    }
}

/// Reads profiles owned by the profile collaborator
#[derive(Clone)]
pub struct PgActorDirectory {
    pool: PgPool,
}

impl PgActorDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActorDirectory for PgActorDirectory {
    async fn get_profile(&self, actor_id: Uuid) -> ServiceResult<Option<ActorProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            SELECT {}
            FROM actor_profiles p
            LEFT JOIN postal_centroids pc ON pc.postal_code = p.postal_code
            WHERE p.id = $1
            "#,
            PROFILE_COLUMNS
        ))
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ActorProfile::try_from).transpose()
    }

    async fn get_profiles(&self, actor_ids: &[Uuid]) -> ServiceResult<Vec<ActorProfile>> {
        if actor_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            SELECT {}
            FROM actor_profiles p
            LEFT JOIN postal_centroids pc ON pc.postal_code = p.postal_code
            WHERE p.id = ANY($1)
            "#,
            PROFILE_COLUMNS
        ))
        .bind(actor_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ActorProfile::try_from).collect()
    }

    async fn candidate_pool(&self, query: &PoolQuery) -> ServiceResult<Vec<ActorProfile>> {
        let bbox = query.center.bounding_box(query.radius_m);

        let order_by = match query.order {
            PoolOrder::Newest => "p.created_at DESC, p.id",
            PoolOrder::Nearest => "distance_m, p.id",
        };

        // Shadow-restricted and private profiles never enter any pool, so they
        // are dropped here as well; the engine still re-checks every flag.
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            SELECT {}, {} AS distance_m
            FROM actor_profiles p
            LEFT JOIN postal_centroids pc ON pc.postal_code = p.postal_code
            WHERE p.id <> $1
              AND p.gender = $2
              AND p.seeking = $3
              AND p.birth_date BETWEEN $4 AND $5
              AND COALESCE(p.latitude, pc.latitude) BETWEEN $6 AND $7
              AND COALESCE(p.longitude, pc.longitude) BETWEEN $8 AND $9
              AND ($10::timestamptz IS NULL OR p.created_at >= $10)
              AND p.is_public
              AND NOT p.shadow_restricted
            ORDER BY {}
            OFFSET $14
            LIMIT $11
            "#,
            PROFILE_COLUMNS, DISTANCE_M, order_by
        ))
        .bind(query.viewer_id)
        .bind(query.gender.as_str())
        .bind(query.seeking.as_str())
        .bind(query.birth_date_min)
        .bind(query.birth_date_max)
        .bind(bbox.min_latitude)
        .bind(bbox.max_latitude)
        .bind(bbox.min_longitude)
        .bind(bbox.max_longitude)
        .bind(query.created_after)
        .bind(query.limit)
        .bind(query.center.latitude)
        .bind(query.center.longitude)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            viewer_id = %query.viewer_id,
            radius_m = query.radius_m,
            offset = query.offset,
            pool_size = rows.len(),
            "candidate pool fetched"
        );

        rows.into_iter().map(ActorProfile::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgBlockRepository {
    pool: PgPool,
}

impl PgBlockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlockRepository for PgBlockRepository {
    async fn create_block(&self, blocker_id: Uuid, blocked_id: Uuid) -> ServiceResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO blocks (id, blocker_id, blocked_id, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (blocker_id, blocked_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(blocker_id)
        .bind(blocked_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_block(&self, blocker_id: Uuid, blocked_id: Uuid) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM blocks WHERE blocker_id = $1 AND blocked_id = $2")
            .bind(blocker_id)
            .bind(blocked_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn has_block_between(&self, actor_a: Uuid, actor_b: Uuid) -> ServiceResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM blocks
                WHERE (blocker_id = $1 AND blocked_id = $2)
                   OR (blocker_id = $2 AND blocked_id = $1)
            )
            "#,
        )
        .bind(actor_a)
        .bind(actor_b)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn blocked_peers(&self, actor_id: Uuid) -> ServiceResult<HashSet<Uuid>> {
        let peers: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT blocked_id FROM blocks WHERE blocker_id = $1
            UNION
            SELECT blocker_id FROM blocks WHERE blocked_id = $1
            "#,
        )
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(peers.into_iter().collect())
    }
}

/// Reads subscription state written by the billing collaborator
#[derive(Clone)]
pub struct PgEntitlementProvider {
    pool: PgPool,
}

impl PgEntitlementProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementProvider for PgEntitlementProvider {
    async fn has_unrestricted_messaging(&self, actor_id: Uuid) -> ServiceResult<bool> {
        let entitled: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM messaging_entitlements
                WHERE actor_id = $1
                  AND unrestricted_messaging
                  AND (expires_at IS NULL OR expires_at > NOW())
            )
            "#,
        )
        .bind(actor_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(entitled)
    }
}
