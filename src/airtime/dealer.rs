//! Dealer-direct airtime dispatch for the home telco.
//!
//! The dealer API authenticates with a cached bearer token, takes the
//! amount in minor units and the service PIN base64-encoded, and reports
//! the provider transaction id and the new float balance inside a
//! free-text description that has to be scraped.

use crate::airtime::credentials::{BearerTokenCache, ServicePinCache};
use crate::airtime::error::{DispatchError, DispatchResult};
use crate::airtime::provider::{AirtimeProvider, DispatchReceipt, DispatchRequest};
use crate::carriers;
use crate::config::DealerConfig;
use crate::database::store::GatewayStore;
use crate::payments::utils::{Auth, Idempotency, UpstreamClient};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bigdecimal::{BigDecimal, ToPrimitive};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::info;

pub const PROVIDER_NAME: &str = "dealer-direct";

fn transaction_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"R\d{6}\.\d{4}\.\d{6}").expect("valid regex"))
}

fn balance_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"New balance is Ksh\.\s*([0-9]+(?:\.[0-9]+)?)").expect("valid regex")
    })
}

/// Pull the provider transaction id and the reported float balance out of
/// the dealer's free-text description. Either may be absent.
pub fn parse_description(description: &str) -> (Option<String>, Option<BigDecimal>) {
    let provider_ref = transaction_id_re()
        .find(description)
        .map(|m| m.as_str().to_string());
    let balance = balance_re()
        .captures(description)
        .and_then(|c| c.get(1))
        .and_then(|m| BigDecimal::from_str(m.as_str()).ok());
    (provider_ref, balance)
}

pub struct DealerDirect {
    config: DealerConfig,
    http: UpstreamClient,
    token: BearerTokenCache,
    pin: ServicePinCache,
}

impl DealerDirect {
    pub fn new(
        config: DealerConfig,
        http: UpstreamClient,
        store: Arc<dyn GatewayStore>,
    ) -> Self {
        let token = BearerTokenCache::new(
            config.grant_url.clone(),
            config.consumer_key.clone(),
            config.consumer_secret.clone(),
        );
        let pin = ServicePinCache::new(store);
        Self {
            config,
            http,
            token,
            pin,
        }
    }

    fn amount_minor_units(amount: &BigDecimal) -> DispatchResult<i64> {
        (amount.clone() * BigDecimal::from(100))
            .with_scale(0)
            .to_i64()
            .ok_or_else(|| DispatchError::Validation {
                message: format!("amount {} does not fit in minor units", amount),
            })
    }
}

#[async_trait]
impl AirtimeProvider for DealerDirect {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn dispatch(&self, request: &DispatchRequest) -> DispatchResult<DispatchReceipt> {
        let receiver =
            carriers::dealer_format(&request.destination).map_err(|e| {
                DispatchError::Validation {
                    message: e.to_string(),
                }
            })?;
        let sender =
            carriers::dealer_format(&self.config.sender_msisdn).map_err(|e| {
                DispatchError::Validation {
                    message: format!("dealer sender msisdn misconfigured: {}", e),
                }
            })?;

        let token = self.token.token(&self.http).await?;
        let pin = self.pin.pin().await?;
        let payload = serde_json::json!({
            "senderMsisdn": sender,
            "amount": Self::amount_minor_units(&request.amount)?,
            "servicePin": BASE64.encode(&pin),
            "receiverMsisdn": receiver,
        });

        // Dispatch must not be replayed: a duplicate POST is a duplicate
        // top-up. Failures go to the fallback policy instead.
        let raw: JsonValue = self
            .http
            .post_json(
                PROVIDER_NAME,
                &self.config.airtime_url,
                Auth::Bearer(&token),
                &payload,
                Idempotency::OneShot,
            )
            .await?;

        let status_ok = match &raw["responseStatus"] {
            JsonValue::String(s) => s == "200",
            JsonValue::Number(n) => n.as_i64() == Some(200),
            _ => false,
        };
        let description = raw["responseDesc"].as_str().unwrap_or_default().to_string();

        if !status_ok {
            return Err(DispatchError::Provider {
                provider: PROVIDER_NAME.to_string(),
                message: if description.is_empty() {
                    format!("unexpected response status {}", raw["responseStatus"])
                } else {
                    description
                },
                raw: Some(raw),
            });
        }

        let (provider_ref, new_float_balance) = parse_description(&description);
        info!(
            receiver = %receiver,
            provider_ref = provider_ref.as_deref().unwrap_or("-"),
            "dealer-direct dispatch succeeded"
        );

        Ok(DispatchReceipt {
            provider_ref,
            new_float_balance,
            raw,
        })
    }
}
