use super::{begin_with_timeout, parse_column};
use crate::domain::{
    Currency, EchoOffer, EchoOfferOutcome, EchoResponse, EchoTransition, GiftStock, Spark,
    SparkOutcome, StockComponent,
};
use crate::error::{ServiceError, ServiceResult};
use crate::repository::GiftLedgerRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct SparkRow {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<SparkRow> for Spark {
    type Error = ServiceError;

    fn try_from(row: SparkRow) -> Result<Self, Self::Error> {
        Ok(Spark {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            status: parse_column("sparks.status", &row.status)?,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EchoRow {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    state: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    responded_at: Option<DateTime<Utc>>,
}

impl TryFrom<EchoRow> for EchoOffer {
    type Error = ServiceError;

    fn try_from(row: EchoRow) -> Result<Self, Self::Error> {
        Ok(EchoOffer {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            state: parse_column("echo_offers.state", &row.state)?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            responded_at: row.responded_at,
        })
    }
}

const SPARK_COLUMNS: &str = "id, sender_id, receiver_id, status, created_at, expires_at";
const ECHO_COLUMNS: &str =
    "id, sender_id, receiver_id, state, created_at, expires_at, responded_at";

/// Gift ledger backed by PostgreSQL.
///
/// Debits lock the sender's stock row (`FOR UPDATE`) and the debit itself is
/// conditional on a positive balance, so concurrent sends never overdraw.
#[derive(Clone)]
pub struct PgGiftLedger {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgGiftLedger {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }
}

async fn expire_sparks(
    conn: &mut PgConnection,
    sender_id: Uuid,
    receiver_id: Uuid,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    sqlx::query(
        r#"
        UPDATE sparks SET status = 'expired'
        WHERE sender_id = $1 AND receiver_id = $2
          AND status = 'active'
          AND expires_at IS NOT NULL AND expires_at <= $3
        "#,
    )
    .bind(sender_id)
    .bind(receiver_id)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

async fn expire_echoes(
    conn: &mut PgConnection,
    sender_id: Uuid,
    receiver_id: Uuid,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    sqlx::query(
        r#"
        UPDATE echo_offers SET state = 'expired'
        WHERE sender_id = $1 AND receiver_id = $2
          AND state = 'offered'
          AND expires_at IS NOT NULL AND expires_at <= $3
        "#,
    )
    .bind(sender_id)
    .bind(receiver_id)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// Lock the stock row and return its balance (0 when no row exists yet)
async fn lock_balance(
    conn: &mut PgConnection,
    actor_id: Uuid,
    currency: Currency,
) -> ServiceResult<i64> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT periodic, purchased FROM gift_stocks
        WHERE actor_id = $1 AND currency = $2
        FOR UPDATE
        "#,
    )
    .bind(actor_id)
    .bind(currency.as_str())
    .fetch_optional(conn)
    .await?;

    Ok(row.map_or(0, |(periodic, purchased)| periodic + purchased))
}

/// Take one unit from a locked stock row, periodic component first
async fn debit_one(
    conn: &mut PgConnection,
    actor_id: Uuid,
    currency: Currency,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE gift_stocks
        SET periodic = CASE WHEN periodic > 0 THEN periodic - 1 ELSE periodic END,
            purchased = CASE WHEN periodic > 0 THEN purchased ELSE purchased - 1 END,
            updated_at = $3
        WHERE actor_id = $1 AND currency = $2
          AND periodic + purchased > 0
        "#,
    )
    .bind(actor_id)
    .bind(currency.as_str())
    .bind(now)
    .execute(conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(ServiceError::integrity(format!(
            "{} debit for {} matched {} rows after balance check",
            currency,
            actor_id,
            result.rows_affected()
        )));
    }
    Ok(())
}

#[async_trait]
impl GiftLedgerRepository for PgGiftLedger {
    async fn insert_like(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO likes (id, sender_id, receiver_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (sender_id, receiver_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sender_id)
        .bind(receiver_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.is_some())
    }

    async fn has_like(&self, sender_id: Uuid, receiver_id: Uuid) -> ServiceResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM likes WHERE sender_id = $1 AND receiver_id = $2)",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn send_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<(SparkOutcome, Option<Spark>)> {
        let mut tx = begin_with_timeout(&self.pool, self.statement_timeout_ms).await?;

        expire_sparks(&mut tx, sender_id, receiver_id, now).await?;
        let balance = lock_balance(&mut tx, sender_id, Currency::Spark).await?;

        let row = sqlx::query_as::<_, SparkRow>(&format!(
            r#"
            INSERT INTO sparks (id, sender_id, receiver_id, status, created_at, expires_at)
            VALUES ($1, $2, $3, 'active', $4, $5)
            ON CONFLICT (sender_id, receiver_id) WHERE status = 'active' DO NOTHING
            RETURNING {}
            "#,
            SPARK_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(sender_id)
        .bind(receiver_id)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok((SparkOutcome::AlreadySent, None));
        };
        if balance <= 0 {
            tx.rollback().await?;
            return Ok((SparkOutcome::InsufficientStock, None));
        }

        debit_one(&mut tx, sender_id, Currency::Spark, now).await?;
        tx.commit().await?;

        debug!(sender_id = %sender_id, receiver_id = %receiver_id, "spark recorded");
        Ok((SparkOutcome::Sent, Some(Spark::try_from(row)?)))
    }

    async fn withdraw_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let mut tx = begin_with_timeout(&self.pool, self.statement_timeout_ms).await?;
        expire_sparks(&mut tx, sender_id, receiver_id, now).await?;

        let result = sqlx::query(
            r#"
            UPDATE sparks SET status = 'withdrawn'
            WHERE sender_id = $1 AND receiver_id = $2 AND status = 'active'
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_active_spark(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sparks
                WHERE sender_id = $1 AND receiver_id = $2
                  AND status = 'active'
                  AND (expires_at IS NULL OR expires_at > $3)
            )
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn offer_echo(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<(EchoOfferOutcome, Option<EchoOffer>)> {
        let mut tx = begin_with_timeout(&self.pool, self.statement_timeout_ms).await?;

        expire_sparks(&mut tx, sender_id, receiver_id, now).await?;
        expire_echoes(&mut tx, sender_id, receiver_id, now).await?;

        // Holding the spark row stops a concurrent withdraw from slipping in
        let spark: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM sparks
            WHERE sender_id = $1 AND receiver_id = $2 AND status = 'active'
            FOR SHARE
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_optional(&mut *tx)
        .await?;
        if spark.is_none() {
            tx.rollback().await?;
            return Ok((EchoOfferOutcome::HeartRequired, None));
        }

        let balance = lock_balance(&mut tx, sender_id, Currency::Echo).await?;

        let row = sqlx::query_as::<_, EchoRow>(&format!(
            r#"
            INSERT INTO echo_offers (id, sender_id, receiver_id, state, created_at, expires_at)
            VALUES ($1, $2, $3, 'offered', $4, $5)
            ON CONFLICT (sender_id, receiver_id) WHERE state = 'offered' DO NOTHING
            RETURNING {}
            "#,
            ECHO_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(sender_id)
        .bind(receiver_id)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok((EchoOfferOutcome::AlreadyOffered, None));
        };
        if balance <= 0 {
            tx.rollback().await?;
            return Ok((EchoOfferOutcome::InsufficientStock, None));
        }

        debit_one(&mut tx, sender_id, Currency::Echo, now).await?;
        tx.commit().await?;

        Ok((EchoOfferOutcome::Offered, Some(EchoOffer::try_from(row)?)))
    }

    async fn respond_echo(
        &self,
        original_sender_id: Uuid,
        receiver_id: Uuid,
        response: EchoResponse,
        now: DateTime<Utc>,
    ) -> ServiceResult<EchoTransition> {
        let target = response.target_state();
        let mut tx = begin_with_timeout(&self.pool, self.statement_timeout_ms).await?;
        expire_echoes(&mut tx, original_sender_id, receiver_id, now).await?;

        let applied = sqlx::query_as::<_, EchoRow>(&format!(
            r#"
            UPDATE echo_offers SET state = $3, responded_at = $4
            WHERE sender_id = $1 AND receiver_id = $2 AND state = 'offered'
            RETURNING {}
            "#,
            ECHO_COLUMNS
        ))
        .bind(original_sender_id)
        .bind(receiver_id)
        .bind(target.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = applied {
            tx.commit().await?;
            return Ok(EchoTransition::Applied(EchoOffer::try_from(row)?));
        }

        let previous = sqlx::query_as::<_, EchoRow>(&format!(
            r#"
            SELECT {} FROM echo_offers
            WHERE sender_id = $1 AND receiver_id = $2 AND state = $3
            ORDER BY responded_at DESC NULLS LAST
            LIMIT 1
            "#,
            ECHO_COLUMNS
        ))
        .bind(original_sender_id)
        .bind(receiver_id)
        .bind(target.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        match previous {
            Some(row) => Ok(EchoTransition::Unchanged(EchoOffer::try_from(row)?)),
            None => Ok(EchoTransition::NotFound),
        }
    }

    async fn has_pending_echo(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM echo_offers
                WHERE sender_id = $1 AND receiver_id = $2
                  AND state = 'offered'
                  AND (expires_at IS NULL OR expires_at > $3)
            )
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn has_returned_echo_between(
        &self,
        actor_a: Uuid,
        actor_b: Uuid,
    ) -> ServiceResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM echo_offers
                WHERE state = 'returned'
                  AND ((sender_id = $1 AND receiver_id = $2)
                    OR (sender_id = $2 AND receiver_id = $1))
            )
            "#,
        )
        .bind(actor_a)
        .bind(actor_b)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn stock(&self, actor_id: Uuid, currency: Currency) -> ServiceResult<GiftStock> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT periodic, purchased FROM gift_stocks WHERE actor_id = $1 AND currency = $2",
        )
        .bind(actor_id)
        .bind(currency.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((periodic, purchased)) => GiftStock {
                actor_id,
                currency,
                periodic,
                purchased,
            },
            None => GiftStock::empty(actor_id, currency),
        })
    }

    async fn credit_stock(
        &self,
        actor_id: Uuid,
        currency: Currency,
        component: StockComponent,
        amount: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<GiftStock> {
        if amount <= 0 {
            return Err(ServiceError::InvalidInput(
                "Credit amount must be positive".to_string(),
            ));
        }

        let (periodic_delta, purchased_delta) = match component {
            StockComponent::Periodic => (amount, 0),
            StockComponent::Purchased => (0, amount),
        };

        let (periodic, purchased): (i64, i64) = sqlx::query_as(
            r#"
            INSERT INTO gift_stocks (actor_id, currency, periodic, purchased, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (actor_id, currency) DO UPDATE
            SET periodic = gift_stocks.periodic + EXCLUDED.periodic,
                purchased = gift_stocks.purchased + EXCLUDED.purchased,
                updated_at = EXCLUDED.updated_at
            RETURNING periodic, purchased
            "#,
        )
        .bind(actor_id)
        .bind(currency.as_str())
        .bind(periodic_delta)
        .bind(purchased_delta)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            warn!(actor_id = %actor_id, currency = %currency, error = %e, "stock credit failed");
            ServiceError::from(e)
        })?;

        Ok(GiftStock {
            actor_id,
            currency,
            periodic,
            purchased,
        })
    }

    async fn received_sparks(
        &self,
        receiver_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Spark>> {
        let rows = sqlx::query_as::<_, SparkRow>(&format!(
            r#"
            SELECT {} FROM sparks
            WHERE receiver_id = $1
              AND status = 'active'
              AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            SPARK_COLUMNS
        ))
        .bind(receiver_id)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Spark::try_from).collect()
    }

    async fn pending_echoes(
        &self,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<EchoOffer>> {
        let rows = sqlx::query_as::<_, EchoRow>(&format!(
            r#"
            SELECT {} FROM echo_offers
            WHERE receiver_id = $1
              AND state = 'offered'
              AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY created_at DESC
            "#,
            ECHO_COLUMNS
        ))
        .bind(receiver_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EchoOffer::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_with_unknown_states_are_rejected() {
        let row = EchoRow {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            state: "lost".to_string(),
            created_at: Utc::now(),
            expires_at: None,
            responded_at: None,
        };
        assert!(matches!(
            EchoOffer::try_from(row),
            Err(ServiceError::Internal(_))
        ));

        let row = SparkRow {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            status: "withdrawn".to_string(),
            created_at: Utc::now(),
            expires_at: None,
        };
        let spark = Spark::try_from(row).unwrap();
        assert!(!spark.is_active_at(Utc::now()));
        assert_eq!(spark.status.as_str(), "withdrawn");
    }
}
