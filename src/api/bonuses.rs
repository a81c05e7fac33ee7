//! Bonus settings administration.

use crate::api::ApiState;
use crate::database::records::BonusSettings;
use crate::error::AppError;
use axum::{extract::State, Json};
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct BonusSettingsView {
    #[serde(rename = "safaricomPercentage")]
    pub safaricom_percentage: f64,
    #[serde(rename = "africastalkingPercentage")]
    pub africastalking_percentage: f64,
}

impl BonusSettingsView {
    fn from_settings(settings: &BonusSettings) -> Self {
        Self {
            safaricom_percentage: settings.safaricom_percentage.to_f64().unwrap_or(0.0),
            africastalking_percentage: settings
                .africastalking_percentage
                .to_f64()
                .unwrap_or(0.0),
        }
    }
}

/// GET /api/airtime-bonuses/current
pub async fn current(
    State(state): State<ApiState>,
) -> Result<Json<BonusSettingsView>, AppError> {
    let settings = state.store.bonus_settings().await?;
    Ok(Json(BonusSettingsView::from_settings(&settings)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBonusBody {
    #[serde(rename = "safaricomPercentage")]
    pub safaricom_percentage: serde_json::Number,
    #[serde(rename = "africastalkingPercentage")]
    pub africastalking_percentage: serde_json::Number,
    pub actor: String,
}

/// POST /api/airtime-bonuses/update
pub async fn update(
    State(state): State<ApiState>,
    Json(body): Json<UpdateBonusBody>,
) -> Result<Json<BonusSettingsView>, AppError> {
    if body.actor.trim().is_empty() {
        return Err(AppError::missing_field("actor"));
    }
    let safaricom = parse_percentage(&body.safaricom_percentage, "safaricomPercentage")?;
    let africastalking =
        parse_percentage(&body.africastalking_percentage, "africastalkingPercentage")?;

    let settings = BonusSettings {
        safaricom_percentage: safaricom,
        africastalking_percentage: africastalking,
    };
    state
        .store
        .update_bonus_settings(&settings, body.actor.trim())
        .await?;

    info!(actor = %body.actor, "bonus settings updated");
    Ok(Json(BonusSettingsView::from_settings(&settings)))
}

fn parse_percentage(value: &serde_json::Number, field: &str) -> Result<BigDecimal, AppError> {
    // Going through the JSON literal keeps values like 2.5 exact.
    let parsed = BigDecimal::from_str(&value.to_string())
        .map_err(|_| AppError::missing_field(field))?;
    if parsed < BigDecimal::from(0) {
        return Err(AppError::negative_value(field));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_percentage() {
        let value = serde_json::Number::from_f64(-1.5).unwrap();
        assert!(parse_percentage(&value, "safaricomPercentage").is_err());
    }

    #[test]
    fn keeps_decimal_percentages_exact() {
        let value: serde_json::Number = serde_json::from_str("2.5").unwrap();
        let parsed = parse_percentage(&value, "africastalkingPercentage").unwrap();
        assert_eq!(parsed, BigDecimal::from_str("2.5").unwrap());
    }
}
