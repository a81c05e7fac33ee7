use crate::database::error::DatabaseError;
use crate::database::records::{
    NewRequest, NewSale, RequestRecord, SaleRecord, TransactionPatch, TransactionRecord,
};
use sqlx::PgPool;

const TRANSACTION_COLUMNS: &str = "checkout_request_id, status, payment_receipt, \
     amount_received, fulfillment_status, provider_used, fallback_attempted, \
     reconciliation_needed, created_at, last_updated";

/// Repository for requests, transactions and sales.
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist the frozen request snapshot and its pending transaction in
    /// one database transaction, so a crash cannot leave one without the
    /// other.
    pub async fn create_request(
        &self,
        request: &NewRequest,
        initial_status: &str,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO requests \
             (checkout_request_id, payer_msisdn, destination_msisdn, carrier, amount, payload) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&request.checkout_request_id)
        .bind(&request.payer_msisdn)
        .bind(&request.destination_msisdn)
        .bind(&request.carrier)
        .bind(&request.amount)
        .bind(&request.payload)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO transactions (checkout_request_id, status) VALUES ($1, $2)",
        )
        .bind(&request.checkout_request_id)
        .bind(initial_status)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_request(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<RequestRecord>, DatabaseError> {
        sqlx::query_as::<_, RequestRecord>(
            "SELECT checkout_request_id, payer_msisdn, destination_msisdn, carrier, amount, \
             payload, created_at FROM requests WHERE checkout_request_id = $1",
        )
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_transaction(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE checkout_request_id = $1"
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Compare-and-swap status transition. The update only lands when the
    /// persisted status is one of `expected`; the return value says whether
    /// this caller won. Duplicate callbacks lose here instead of producing
    /// duplicate side effects.
    pub async fn transition(
        &self,
        checkout_request_id: &str,
        expected: &[&str],
        to: &str,
        patch: &TransactionPatch,
    ) -> Result<bool, DatabaseError> {
        let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        let result = sqlx::query(
            "UPDATE transactions SET \
                 status = $2, \
                 payment_receipt = COALESCE($3, payment_receipt), \
                 amount_received = COALESCE($4, amount_received), \
                 fulfillment_status = COALESCE($5, fulfillment_status), \
                 provider_used = COALESCE($6, provider_used), \
                 fallback_attempted = COALESCE($7, fallback_attempted), \
                 reconciliation_needed = COALESCE($8, reconciliation_needed), \
                 last_updated = now() \
             WHERE checkout_request_id = $1 AND status = ANY($9)",
        )
        .bind(checkout_request_id)
        .bind(to)
        .bind(&patch.payment_receipt)
        .bind(&patch.amount_received)
        .bind(&patch.fulfillment_status)
        .bind(&patch.provider_used)
        .bind(patch.fallback_attempted)
        .bind(patch.reconciliation_needed)
        .bind(&expected)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn create_sale(&self, sale: &NewSale) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO sales \
             (checkout_request_id, original_amount, bonus, dispatched_amount, carrier, \
              bonus_percentage) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (checkout_request_id) DO NOTHING",
        )
        .bind(&sale.checkout_request_id)
        .bind(&sale.original_amount)
        .bind(&sale.bonus)
        .bind(&sale.dispatched_amount)
        .bind(&sale.carrier)
        .bind(&sale.bonus_percentage)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn complete_sale(
        &self,
        checkout_request_id: &str,
        provider_used: &str,
        dispatch_result: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE sales SET provider_used = $2, dispatch_result = $3, completed_at = now() \
             WHERE checkout_request_id = $1",
        )
        .bind(checkout_request_id)
        .bind(provider_used)
        .bind(dispatch_result)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn find_sale(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<SaleRecord>, DatabaseError> {
        sqlx::query_as::<_, SaleRecord>(
            "SELECT checkout_request_id, original_amount, bonus, dispatched_amount, carrier, \
             provider_used, dispatch_result, bonus_percentage, completed_at, created_at \
             FROM sales WHERE checkout_request_id = $1",
        )
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
