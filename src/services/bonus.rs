//! Bonus computation.
//!
//! Per-telco percentages live in the settings singleton. The home telco
//! keeps its bonus at two-decimal precision; every other telco rounds the
//! raw bonus half-up to a whole shilling, matching what their dispatch
//! APIs accept.

use crate::carriers::Carrier;
use crate::database::error::DatabaseError;
use crate::database::store::GatewayStore;
use bigdecimal::{BigDecimal, RoundingMode};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BonusQuote {
    pub bonus: BigDecimal,
    pub percentage: BigDecimal,
}

pub struct BonusEngine {
    store: Arc<dyn GatewayStore>,
}

impl BonusEngine {
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self { store }
    }

    pub async fn quote(
        &self,
        carrier: Carrier,
        amount: &BigDecimal,
    ) -> Result<BonusQuote, DatabaseError> {
        let settings = self.store.bonus_settings().await?;
        let percentage = if carrier.is_home() {
            settings.safaricom_percentage
        } else {
            settings.africastalking_percentage
        };
        Ok(BonusQuote {
            bonus: compute_bonus(carrier, amount, &percentage),
            percentage,
        })
    }
}

/// `amount × pct / 100`, rounded per the telco rule. Zero or negative
/// percentages yield a zero bonus.
pub fn compute_bonus(carrier: Carrier, amount: &BigDecimal, percentage: &BigDecimal) -> BigDecimal {
    let zero = BigDecimal::from(0);
    if percentage <= &zero || amount <= &zero {
        return zero;
    }
    let raw = amount * percentage / BigDecimal::from(100);
    if carrier.is_home() {
        raw.with_scale_round(2, RoundingMode::HalfUp)
    } else {
        raw.with_scale_round(0, RoundingMode::HalfUp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn home_bonus_keeps_two_decimals() {
        let bonus = compute_bonus(Carrier::Safaricom, &dec("100"), &dec("5"));
        assert_eq!(bonus, dec("5.00"));

        let bonus = compute_bonus(Carrier::Safaricom, &dec("55"), &dec("2.5"));
        assert_eq!(bonus, dec("1.38")); // 1.375 rounds half-up at scale 2
    }

    #[test]
    fn non_home_bonus_rounds_half_up_to_integer() {
        // raw 1.375 -> 1
        assert_eq!(compute_bonus(Carrier::Airtel, &dec("55"), &dec("2.5")), dec("1"));
        // raw 1.5 -> 2
        assert_eq!(compute_bonus(Carrier::Telkom, &dec("60"), &dec("2.5")), dec("2"));
        // raw 2.4 -> 2
        assert_eq!(compute_bonus(Carrier::Airtel, &dec("120"), &dec("2")), dec("2"));
    }

    #[test]
    fn zero_or_missing_settings_yield_zero_bonus() {
        assert_eq!(
            compute_bonus(Carrier::Safaricom, &dec("100"), &dec("0")),
            BigDecimal::from(0)
        );
        assert_eq!(
            compute_bonus(Carrier::Airtel, &dec("100"), &dec("-1")),
            BigDecimal::from(0)
        );
    }
}
