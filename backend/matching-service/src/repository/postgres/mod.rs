//! PostgreSQL repositories (source of truth)
//!
//! Uniqueness of active records is enforced by partial unique indexes and
//! every mutating call runs inside one transaction with a statement
//! timeout, so an aborted call leaves nothing behind.

mod actors;
mod ledger;
mod quota;

pub use actors::{PgActorDirectory, PgBlockRepository, PgEntitlementProvider};
pub use ledger::PgGiftLedger;
pub use quota::PgQuotaRepository;

use crate::error::{ServiceError, ServiceResult};
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;

/// Open a transaction whose statements abort after `statement_timeout_ms`.
///
/// A timed-out statement surfaces as `ServiceError::Timeout` and the
/// dropped transaction rolls back.
pub(crate) async fn begin_with_timeout(
    pool: &PgPool,
    statement_timeout_ms: u64,
) -> ServiceResult<Transaction<'static, Postgres>> {
    let mut tx = pool.begin().await?;
    // Transaction-local, reset on commit or rollback
    sqlx::query("SELECT set_config('statement_timeout', $1, true)")
        .bind(statement_timeout_ms.to_string())
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Parse a TEXT enum column, treating unknown values as corrupt data
pub(crate) fn parse_column<T>(column: &str, value: &str) -> ServiceResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| ServiceError::Internal(format!("bad {} value: {}", column, e)))
}
