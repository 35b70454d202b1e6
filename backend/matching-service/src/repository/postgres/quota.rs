use super::begin_with_timeout;
use crate::error::ServiceResult;
use crate::repository::{
    QuotaAdmission, QuotaLimits, QuotaRepository, QuotaUsage, MONTHLY_WINDOW_DAYS,
    WEEKLY_WINDOW_DAYS,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

/// Free-conversation grants.
///
/// One row per (opener, target). Consumption serializes on a transaction
/// advisory lock keyed by the opener, so the window count and the insert
/// see the same state.
#[derive(Clone)]
pub struct PgQuotaRepository {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgQuotaRepository {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }
}

async fn count_usage(
    conn: &mut PgConnection,
    opener_id: Uuid,
    now: DateTime<Utc>,
) -> ServiceResult<QuotaUsage> {
    let (weekly, monthly): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE granted_at > $2),
            COUNT(*) FILTER (WHERE granted_at > $3)
        FROM free_conversation_grants
        WHERE opener_id = $1
        "#,
    )
    .bind(opener_id)
    .bind(now - Duration::days(WEEKLY_WINDOW_DAYS))
    .bind(now - Duration::days(MONTHLY_WINDOW_DAYS))
    .fetch_one(conn)
    .await?;

    Ok(QuotaUsage {
        weekly_used: u32::try_from(weekly).unwrap_or(u32::MAX),
        monthly_used: u32::try_from(monthly).unwrap_or(u32::MAX),
    })
}

#[async_trait]
impl QuotaRepository for PgQuotaRepository {
    async fn try_consume(
        &self,
        opener_id: Uuid,
        target_id: Uuid,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
    ) -> ServiceResult<QuotaAdmission> {
        let mut tx = begin_with_timeout(&self.pool, self.statement_timeout_ms).await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(opener_id)
            .execute(&mut *tx)
            .await?;

        let granted: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM free_conversation_grants
                WHERE opener_id = $1 AND target_id = $2
            )
            "#,
        )
        .bind(opener_id)
        .bind(target_id)
        .fetch_one(&mut *tx)
        .await?;
        if granted {
            tx.commit().await?;
            return Ok(QuotaAdmission::AlreadyAdmitted);
        }

        let usage = count_usage(&mut tx, opener_id, now).await?;
        if !usage.admits(limits) {
            tx.commit().await?;
            debug!(opener_id = %opener_id, ?usage, "free conversation quota exhausted");
            return Ok(QuotaAdmission::Exhausted);
        }

        sqlx::query(
            r#"
            INSERT INTO free_conversation_grants (opener_id, target_id, granted_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(opener_id)
        .bind(target_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

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
        let mut conn = self.pool.acquire().await?;
        count_usage(&mut conn, opener_id, now).await
    }
}
