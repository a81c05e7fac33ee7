use crate::database::error::DatabaseError;
use crate::database::records::BonusSettings;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use tracing::info;

/// Repository for the bonus settings singleton, its change history, and
/// the dealer configuration row.
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current percentages; a missing singleton reads as all-zero, which
    /// the bonus engine treats as "no bonus".
    pub async fn bonus_settings(&self) -> Result<BonusSettings, DatabaseError> {
        let row = sqlx::query_as::<_, BonusSettings>(
            "SELECT safaricom_percentage, africastalking_percentage \
             FROM bonus_settings WHERE singleton",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.unwrap_or_else(BonusSettings::zero))
    }

    /// Write new percentages and append a history row for every value that
    /// actually changed, atomically.
    pub async fn update_bonus_settings(
        &self,
        settings: &BonusSettings,
        actor: &str,
    ) -> Result<(), DatabaseError> {
        let current = self.bonus_settings().await?;
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO bonus_settings (singleton, safaricom_percentage, africastalking_percentage) \
             VALUES (TRUE, $1, $2) \
             ON CONFLICT (singleton) DO UPDATE SET \
                 safaricom_percentage = EXCLUDED.safaricom_percentage, \
                 africastalking_percentage = EXCLUDED.africastalking_percentage",
        )
        .bind(&settings.safaricom_percentage)
        .bind(&settings.africastalking_percentage)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let changes: [(&str, &BigDecimal, &BigDecimal); 2] = [
            (
                "safaricom",
                &current.safaricom_percentage,
                &settings.safaricom_percentage,
            ),
            (
                "africastalking",
                &current.africastalking_percentage,
                &settings.africastalking_percentage,
            ),
        ];
        for (telco, old, new) in changes {
            if old == new {
                continue;
            }
            sqlx::query(
                "INSERT INTO bonus_history (telco, old_percentage, new_percentage, actor) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(telco)
            .bind(old)
            .bind(new)
            .bind(actor)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            info!(telco, old = %old, new = %new, actor, "bonus percentage changed");
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    /// Raw dealer service PIN. Absence is a hard error: dealer dispatch
    /// cannot run without it.
    pub async fn dealer_service_pin(&self) -> Result<String, DatabaseError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT service_pin FROM dealer_config WHERE singleton")
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        row.map(|(pin,)| pin).ok_or(DatabaseError::NotFound {
            entity: "dealer_config".to_string(),
        })
    }
}
