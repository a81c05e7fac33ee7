use crate::database::error::DatabaseError;
use crate::database::records::{NewPendingReversal, ReconciliationRecord};
use bigdecimal::BigDecimal;
use sqlx::PgPool;

pub const KIND_PENDING_REVERSAL: &str = "PENDING_REVERSAL";
pub const KIND_FAILED_RECONCILIATION: &str = "FAILED_RECONCILIATION";

const COLUMNS: &str = "id, kind, checkout_request_id, original_amount, payer_msisdn, detail, \
     originator_conversation_id, created_at, resolved_at";

/// Repository for reversal bookkeeping: reversals awaiting rail
/// confirmation, and reconciliations that need manual attention.
pub struct ReconciliationRepository {
    pool: PgPool,
}

impl ReconciliationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_pending(
        &self,
        pending: &NewPendingReversal,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO reconciliations \
             (kind, checkout_request_id, original_amount, payer_msisdn, detail, \
              originator_conversation_id) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(KIND_PENDING_REVERSAL)
        .bind(&pending.checkout_request_id)
        .bind(&pending.original_amount)
        .bind(&pending.payer_msisdn)
        .bind(&pending.request_data)
        .bind(&pending.originator_conversation_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn create_failed(
        &self,
        checkout_request_id: &str,
        reason: &str,
        original_amount: &BigDecimal,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO reconciliations \
             (kind, checkout_request_id, original_amount, detail) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(KIND_FAILED_RECONCILIATION)
        .bind(checkout_request_id)
        .bind(original_amount)
        .bind(serde_json::json!({ "reason": reason }))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Resolve a reversal-result callback back to its transaction.
    pub async fn find_open_by_originator(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<ReconciliationRecord>, DatabaseError> {
        sqlx::query_as::<_, ReconciliationRecord>(&format!(
            "SELECT {COLUMNS} FROM reconciliations \
             WHERE kind = $1 AND originator_conversation_id = $2 AND resolved_at IS NULL"
        ))
        .bind(KIND_PENDING_REVERSAL)
        .bind(originator_conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn resolve_pending(
        &self,
        checkout_request_id: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE reconciliations SET resolved_at = now() \
             WHERE kind = $1 AND checkout_request_id = $2 AND resolved_at IS NULL",
        )
        .bind(KIND_PENDING_REVERSAL)
        .bind(checkout_request_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
