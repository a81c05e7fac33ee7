//! Dispatch routing with fallback and float accounting.
//!
//! Movement ordering is load-bearing: the float is debited before any
//! dispatch attempt, and credited back before a fallback attempt touches
//! the other float. A fully failed dispatch therefore always nets to zero
//! float movement.

use crate::airtime::error::DispatchError;
use crate::airtime::provider::{AirtimeProvider, DispatchReceipt, DispatchRequest};
use crate::database::error::DatabaseError;
use crate::database::store::GatewayStore;
use bigdecimal::{BigDecimal, RoundingMode};
use std::sync::Arc;
use tracing::{info, warn};

pub const SAFARICOM_FLOAT: &str = "SAFARICOM_FLOAT";
pub const AFRICASTALKING_FLOAT: &str = "AFRICASTALKING_FLOAT";

pub const LABEL_DEALER: &str = "dealer-direct";
pub const LABEL_AGGREGATOR: &str = "aggregator";
pub const LABEL_AGGREGATOR_FALLBACK: &str = "aggregator-fallback";

const ERROR_KIND_FULFILLMENT: &str = "AIRTIME_FULFILLMENT_ERROR";
const ERROR_SUB_DISPATCH_FAILED: &str = "AIRTIME_DISPATCH_FAILED";
const ERROR_KIND_FLOAT_WARNING: &str = "FLOAT_RECONCILIATION_WARNING";

/// Retention credited to the aggregator float on a successful aggregator
/// dispatch: 4% of the original (pre-bonus) amount.
pub fn aggregator_commission(original_amount: &BigDecimal) -> BigDecimal {
    (original_amount * BigDecimal::from(4) / BigDecimal::from(100))
        .with_scale_round(2, RoundingMode::HalfUp)
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub provider_label: &'static str,
    pub fallback_attempted: bool,
    pub receipt: DispatchReceipt,
}

/// Terminal dispatch failure; float movements have already been undone.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub error: DispatchError,
    pub fallback_attempted: bool,
}

pub struct AirtimeDispatcher {
    dealer: Arc<dyn AirtimeProvider>,
    aggregator: Arc<dyn AirtimeProvider>,
    store: Arc<dyn GatewayStore>,
}

impl AirtimeDispatcher {
    pub fn new(
        dealer: Arc<dyn AirtimeProvider>,
        aggregator: Arc<dyn AirtimeProvider>,
        store: Arc<dyn GatewayStore>,
    ) -> Self {
        Self {
            dealer,
            aggregator,
            store,
        }
    }

    /// Dispatch `request.amount` (original plus bonus) to the destination,
    /// trying dealer-direct first for the home telco with the aggregator as
    /// fallback, and the aggregator alone for everyone else.
    pub async fn dispatch(
        &self,
        checkout_request_id: &str,
        request: &DispatchRequest,
        original_amount: &BigDecimal,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        if !request.carrier.is_home() {
            return match self
                .aggregator_attempt(checkout_request_id, request, original_amount)
                .await
            {
                Ok(receipt) => Ok(DispatchOutcome {
                    provider_label: LABEL_AGGREGATOR,
                    fallback_attempted: false,
                    receipt,
                }),
                Err(error) => Err(DispatchFailure {
                    error,
                    fallback_attempted: false,
                }),
            };
        }

        // Home telco: dealer-direct first.
        if let Err(error) = self
            .debit(checkout_request_id, SAFARICOM_FLOAT, &request.amount)
            .await
        {
            return Err(DispatchFailure {
                error,
                fallback_attempted: false,
            });
        }

        match self.dealer.dispatch(request).await {
            Ok(receipt) => {
                self.apply_authoritative_balance(checkout_request_id, &receipt)
                    .await;
                Ok(DispatchOutcome {
                    provider_label: LABEL_DEALER,
                    fallback_attempted: false,
                    receipt,
                })
            }
            Err(error) => {
                self.journal_failure(checkout_request_id, self.dealer.name(), &error)
                    .await;
                warn!(
                    checkout_request_id,
                    provider = self.dealer.name(),
                    error = %error,
                    "dealer dispatch failed, crediting float back before fallback"
                );
                if let Err(credit_err) = self
                    .credit(checkout_request_id, SAFARICOM_FLOAT, &request.amount)
                    .await
                {
                    return Err(DispatchFailure {
                        error: credit_err,
                        fallback_attempted: false,
                    });
                }

                match self
                    .aggregator_attempt(checkout_request_id, request, original_amount)
                    .await
                {
                    Ok(receipt) => Ok(DispatchOutcome {
                        provider_label: LABEL_AGGREGATOR_FALLBACK,
                        fallback_attempted: true,
                        receipt,
                    }),
                    Err(error) => Err(DispatchFailure {
                        error,
                        fallback_attempted: true,
                    }),
                }
            }
        }
    }

    async fn aggregator_attempt(
        &self,
        checkout_request_id: &str,
        request: &DispatchRequest,
        original_amount: &BigDecimal,
    ) -> Result<DispatchReceipt, DispatchError> {
        self.debit(checkout_request_id, AFRICASTALKING_FLOAT, &request.amount)
            .await?;

        match self.aggregator.dispatch(request).await {
            Ok(receipt) => {
                let commission = aggregator_commission(original_amount);
                if commission > BigDecimal::from(0) {
                    if let Err(e) = self
                        .store
                        .adjust_float(AFRICASTALKING_FLOAT, &commission)
                        .await
                    {
                        // Airtime is already delivered; record the drift
                        // instead of failing the sale.
                        warn!(checkout_request_id, error = %e, "commission credit failed");
                        self.journal(
                            checkout_request_id,
                            ERROR_KIND_FLOAT_WARNING,
                            None,
                            serde_json::json!({
                                "float": AFRICASTALKING_FLOAT,
                                "missing_commission": commission.to_string(),
                                "error": e.to_string(),
                            }),
                        )
                        .await;
                    }
                }
                Ok(receipt)
            }
            Err(error) => {
                self.journal_failure(checkout_request_id, self.aggregator.name(), &error)
                    .await;
                self.credit(checkout_request_id, AFRICASTALKING_FLOAT, &request.amount)
                    .await?;
                Err(error)
            }
        }
    }

    async fn debit(
        &self,
        checkout_request_id: &str,
        float_name: &str,
        amount: &BigDecimal,
    ) -> Result<(), DispatchError> {
        let delta = -amount.clone();
        match self.store.adjust_float(float_name, &delta).await {
            Ok(balance) => {
                info!(checkout_request_id, float_name, balance = %balance, "float debited");
                Ok(())
            }
            Err(DatabaseError::InsufficientFloat { float_name }) => {
                let error = DispatchError::InsufficientFloat {
                    float_name: float_name.clone(),
                };
                self.journal_failure(checkout_request_id, &float_name, &error)
                    .await;
                Err(error)
            }
            Err(other) => Err(DispatchError::Store {
                message: other.to_string(),
            }),
        }
    }

    async fn credit(
        &self,
        checkout_request_id: &str,
        float_name: &str,
        amount: &BigDecimal,
    ) -> Result<(), DispatchError> {
        match self.store.adjust_float(float_name, amount).await {
            Ok(balance) => {
                info!(checkout_request_id, float_name, balance = %balance, "float credited back");
                Ok(())
            }
            Err(e) => Err(DispatchError::Store {
                message: e.to_string(),
            }),
        }
    }

    /// The dealer reports its own float balance after a successful top-up;
    /// it wins over our computed value, and any disagreement is journaled.
    async fn apply_authoritative_balance(
        &self,
        checkout_request_id: &str,
        receipt: &DispatchReceipt,
    ) {
        let Some(authoritative) = &receipt.new_float_balance else {
            return;
        };
        match self
            .store
            .overwrite_float(SAFARICOM_FLOAT, authoritative)
            .await
        {
            Ok(previous) => {
                if &previous != authoritative {
                    self.journal(
                        checkout_request_id,
                        ERROR_KIND_FLOAT_WARNING,
                        None,
                        serde_json::json!({
                            "float": SAFARICOM_FLOAT,
                            "local_balance": previous.to_string(),
                            "authoritative_balance": authoritative.to_string(),
                        }),
                    )
                    .await;
                }
            }
            Err(e) => {
                warn!(checkout_request_id, error = %e, "authoritative balance overwrite failed")
            }
        }
    }

    async fn journal_failure(
        &self,
        checkout_request_id: &str,
        provider: &str,
        error: &DispatchError,
    ) {
        let mut context = error.context();
        if let Some(map) = context.as_object_mut() {
            map.insert(
                "provider".to_string(),
                serde_json::Value::String(provider.to_string()),
            );
        }
        self.journal(
            checkout_request_id,
            ERROR_KIND_FULFILLMENT,
            Some(ERROR_SUB_DISPATCH_FAILED),
            context,
        )
        .await;
    }

    async fn journal(
        &self,
        checkout_request_id: &str,
        kind: &str,
        sub_kind: Option<&str>,
        context: serde_json::Value,
    ) {
        if let Err(e) = self
            .store
            .record_error(kind, sub_kind, Some(checkout_request_id), context)
            .await
        {
            warn!(checkout_request_id, error = %e, "error journal write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn commission_is_four_percent_of_original() {
        assert_eq!(
            aggregator_commission(&BigDecimal::from(100)),
            BigDecimal::from_str("4.00").unwrap()
        );
        assert_eq!(
            aggregator_commission(&BigDecimal::from(55)),
            BigDecimal::from_str("2.20").unwrap()
        );
    }
}
