//! PostgreSQL-backed recipient store.

use async_trait::async_trait;
use sqlx::PgPool;

use relay_common::error::AppError;
use relay_common::types::{RecipientRecord, RecipientStatus};

use crate::store::{InsertReport, RecipientStore};

/// Recipient store over the `recipients` table.
#[derive(Clone)]
pub struct PgRecipientStore {
    pool: PgPool,
}

impl PgRecipientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Any database failure means the recipient store is unavailable.
fn store_error(e: sqlx::Error) -> AppError {
    AppError::Store(e.to_string())
}

#[async_trait]
impl RecipientStore for PgRecipientStore {
    async fn reset(&self) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM recipients")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        tracing::info!(purged = result.rows_affected(), "Recipient store reset");
        Ok(())
    }

    async fn bulk_insert(&self, identifiers: &[String]) -> Result<InsertReport, AppError> {
        if identifiers.is_empty() {
            return Ok(InsertReport::default());
        }

        // Conflicting keys (already stored, or repeated in the batch) are
        // skipped by the database and show up as the difference below.
        let result = sqlx::query(
            r#"
            INSERT INTO recipients (identifier, status)
            SELECT UNNEST($1::text[]), 'pending'
            ON CONFLICT (identifier) DO NOTHING
            "#,
        )
        .bind(identifiers)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        let inserted = result.rows_affected();
        let report = InsertReport {
            inserted,
            duplicates: (identifiers.len() as u64).saturating_sub(inserted),
        };

        tracing::info!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            "Recipients loaded"
        );
        Ok(report)
    }

    async fn count_all(&self) -> Result<u64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recipients")
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(count as u64)
    }

    async fn count_pending(&self) -> Result<u64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM recipients WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(store_error)?;
        Ok(count as u64)
    }

    async fn pending_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RecipientRecord>, AppError> {
        let records: Vec<RecipientRecord> = sqlx::query_as(
            r#"
            SELECT identifier, status, created_at, updated_at
            FROM recipients
            WHERE status = 'pending'
              AND ($1::text IS NULL OR identifier > $1)
            ORDER BY identifier
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(records)
    }

    async fn update_status(
        &self,
        identifier: &str,
        status: RecipientStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE recipients
            SET status = $1,
                updated_at = CASE WHEN status = $1 THEN updated_at ELSE NOW() END
            WHERE identifier = $2
            "#,
        )
        .bind(status.to_string())
        .bind(identifier)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Recipient {} not found",
                identifier
            )));
        }

        tracing::debug!(identifier, status = %status, "Recipient status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_failures_surface_as_store_errors() {
        let err = store_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, AppError::Store(_)));

        let err = store_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Store(_)));
    }
}
