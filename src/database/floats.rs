use crate::database::error::DatabaseError;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use tracing::debug;

/// Transactional float ledger. Every movement runs inside a database
/// transaction with the balance row locked, so concurrent dispatches
/// cannot interleave a debit past zero.
pub struct FloatRepository {
    pool: PgPool,
}

impl FloatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply `delta` to the named float and return the new balance.
    /// Fails with `InsufficientFloat` when the result would be negative.
    /// A missing row auto-initializes to zero.
    pub async fn adjust(
        &self,
        float_name: &str,
        delta: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let current = Self::locked_balance(&mut tx, float_name).await?;
        let new_balance = &current + delta;
        if new_balance < BigDecimal::from(0) {
            return Err(DatabaseError::InsufficientFloat {
                float_name: float_name.to_string(),
            });
        }

        sqlx::query(
            "UPDATE float_balances SET balance = $2, last_updated = now() WHERE float_name = $1",
        )
        .bind(float_name)
        .bind(&new_balance)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        debug!(float_name, delta = %delta, balance = %new_balance, "float adjusted");
        Ok(new_balance)
    }

    /// Replace the stored balance with a provider-reported authoritative
    /// value. Returns the balance that was overwritten so the caller can
    /// log drift.
    pub async fn overwrite(
        &self,
        float_name: &str,
        balance: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let previous = Self::locked_balance(&mut tx, float_name).await?;
        sqlx::query(
            "UPDATE float_balances SET balance = $2, last_updated = now() WHERE float_name = $1",
        )
        .bind(float_name)
        .bind(balance)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(previous)
    }

    pub async fn balance(&self, float_name: &str) -> Result<BigDecimal, DatabaseError> {
        let row: Option<(BigDecimal,)> =
            sqlx::query_as("SELECT balance FROM float_balances WHERE float_name = $1")
                .bind(float_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(|(b,)| b).unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn locked_balance(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        float_name: &str,
    ) -> Result<BigDecimal, DatabaseError> {
        let existing: Option<(BigDecimal,)> =
            sqlx::query_as("SELECT balance FROM float_balances WHERE float_name = $1 FOR UPDATE")
                .bind(float_name)
                .fetch_optional(&mut **tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        match existing {
            Some((balance,)) => Ok(balance),
            None => {
                sqlx::query(
                    "INSERT INTO float_balances (float_name, balance) VALUES ($1, 0) \
                     ON CONFLICT (float_name) DO NOTHING",
                )
                .bind(float_name)
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
                Ok(BigDecimal::from(0))
            }
        }
    }
}
