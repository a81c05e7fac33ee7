//! Payment rail client: STK push initiation and transaction reversal.

use crate::carriers;
use crate::config::DarajaConfig;
use crate::payments::error::{PaymentError, PaymentResult, RailOperation};
use crate::payments::security::SecurityCredential;
use crate::payments::types::{
    AuthResponse, ReversalWireRequest, ReversalWireResponse, StkPushWireRequest,
    StkPushWireResponse,
};
use crate::payments::utils::{Auth, Idempotency, UpstreamClient};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Safety window subtracted from the advertised token lifetime.
const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct PushAccepted {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReversalAccepted {
    pub originator_conversation_id: String,
    pub conversation_id: String,
}

/// Seam between the lifecycle engine and the payment rail. The production
/// implementation is [`DarajaClient`]; tests substitute a mock.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Initiate a push-to-pay charge against the payer. The returned
    /// checkout request id is the canonical transaction key.
    async fn stk_push(
        &self,
        payer_msisdn: &str,
        amount: i64,
        account_reference: &str,
    ) -> PaymentResult<PushAccepted>;

    /// Ask the rail to reverse a previously collected payment. `receipt`
    /// is the rail's own transaction id for the payment; the checkout
    /// request id rides along for correlation of the result callback.
    async fn reverse(
        &self,
        receipt: &str,
        amount: i64,
        checkout_request_id: &str,
    ) -> PaymentResult<ReversalAccepted>;
}

pub struct DarajaClient {
    config: DarajaConfig,
    http: UpstreamClient,
    credential: SecurityCredential,
    cached_token: RwLock<Option<(String, DateTime<Utc>)>>,
}

impl DarajaClient {
    pub fn new(
        config: DarajaConfig,
        credential: SecurityCredential,
        timeout: Duration,
        max_retries: u32,
    ) -> PaymentResult<Self> {
        let http = UpstreamClient::new(timeout, max_retries)?;
        Ok(Self {
            config,
            http,
            credential,
            cached_token: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() {
                    return Ok(token.clone());
                }
            }
        }

        let auth = BASE64.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));
        let url = self.endpoint("/oauth/v1/generate?grant_type=client_credentials");
        let response: AuthResponse = self
            .http
            .get_json("daraja-oauth", &url, Auth::Basic(&auth))
            .await?;

        let lifetime = (response.lifetime_secs() - TOKEN_SAFETY_MARGIN_SECS).max(60);
        let expiry = Utc::now() + chrono::Duration::seconds(lifetime);
        {
            let mut cached = self.cached_token.write().await;
            *cached = Some((response.access_token.clone(), expiry));
        }
        info!("payment rail access token refreshed");
        Ok(response.access_token)
    }

    fn timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }
}

/// base64(shortcode + passkey + timestamp), the rail's STK password scheme.
pub fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{short_code}{passkey}{timestamp}"))
}

#[async_trait]
impl PaymentRail for DarajaClient {
    async fn stk_push(
        &self,
        payer_msisdn: &str,
        amount: i64,
        account_reference: &str,
    ) -> PaymentResult<PushAccepted> {
        if amount <= 0 {
            return Err(PaymentError::InvalidRequest {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        let payer = carriers::rail_format(payer_msisdn).map_err(|e| {
            PaymentError::InvalidRequest {
                message: e.to_string(),
                field: Some("phoneNumber".to_string()),
            }
        })?;

        let token = self.access_token().await?;
        let timestamp = Self::timestamp();
        let request = StkPushWireRequest {
            business_short_code: self.config.short_code.clone(),
            password: stk_password(&self.config.short_code, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount,
            party_a: payer.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: payer,
            callback_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: "Airtime top-up".to_string(),
        };

        // A repeated push would prompt the payer twice, so this call never
        // retries.
        let response: StkPushWireResponse = self
            .http
            .post_json(
                "daraja-stkpush",
                &self.endpoint("/mpesa/stkpush/v1/processrequest"),
                Auth::Bearer(&token),
                &request,
                Idempotency::OneShot,
            )
            .await?;

        if response.response_code != "0" {
            return Err(PaymentError::RailRejected {
                operation: RailOperation::StkPush,
                code: response.response_code,
                description: response.response_description,
            });
        }

        info!(
            checkout_request_id = %response.checkout_request_id,
            "STK push accepted by rail"
        );

        Ok(PushAccepted {
            checkout_request_id: response.checkout_request_id,
            merchant_request_id: response.merchant_request_id,
            customer_message: response.customer_message,
        })
    }

    async fn reverse(
        &self,
        receipt: &str,
        amount: i64,
        checkout_request_id: &str,
    ) -> PaymentResult<ReversalAccepted> {
        if receipt.trim().is_empty() {
            return Err(PaymentError::InvalidRequest {
                message: "payment receipt is required for reversal".to_string(),
                field: Some("receipt".to_string()),
            });
        }

        let token = self.access_token().await?;
        let request = ReversalWireRequest {
            initiator: self.config.initiator_name.clone(),
            security_credential: self.credential.encrypt(&self.config.initiator_password)?,
            command_id: "TransactionReversal".to_string(),
            transaction_id: receipt.to_string(),
            amount,
            receiver_party: self.config.short_code.clone(),
            receiver_identifier_type: "11".to_string(),
            queue_timeout_url: self.config.reversal_timeout_url.clone(),
            result_url: self.config.reversal_result_url.clone(),
            remarks: checkout_request_id.to_string(),
            occasion: checkout_request_id.to_string(),
        };

        let response: ReversalWireResponse = self
            .http
            .post_json(
                "daraja-reversal",
                &self.endpoint("/mpesa/reversal/v1/request"),
                Auth::Bearer(&token),
                &request,
                Idempotency::OneShot,
            )
            .await?;

        if response.response_code != "0" {
            return Err(PaymentError::RailRejected {
                operation: RailOperation::Reversal,
                code: response.response_code,
                description: response.response_description,
            });
        }

        info!(
            checkout_request_id = %checkout_request_id,
            originator_conversation_id = %response.originator_conversation_id,
            "reversal accepted by rail"
        );

        Ok(ReversalAccepted {
            originator_conversation_id: response.originator_conversation_id,
            conversation_id: response.conversation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stk_password_is_base64_of_concatenation() {
        let password = stk_password("174379", "passkey", "20250101120000");
        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20250101120000");
    }

    #[test]
    fn timestamp_has_rail_layout() {
        let ts = DarajaClient::timestamp();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }
}
