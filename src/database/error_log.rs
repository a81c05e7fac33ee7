use crate::database::error::DatabaseError;
use sqlx::PgPool;

/// Append-only error journal. Writes are best-effort from the engine's
/// point of view; a failed write is logged by the caller but never crashes
/// a handler.
pub struct ErrorLogRepository {
    pool: PgPool,
}

impl ErrorLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        kind: &str,
        sub_kind: Option<&str>,
        checkout_request_id: Option<&str>,
        context: serde_json::Value,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO error_logs (kind, sub_kind, checkout_request_id, context) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(kind)
        .bind(sub_kind)
        .bind(checkout_request_id)
        .bind(context)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
