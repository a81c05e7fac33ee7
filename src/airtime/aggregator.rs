//! Aggregator airtime dispatch, used for all non-home telcos and as the
//! fallback when the dealer API fails.

use crate::airtime::error::{DispatchError, DispatchResult};
use crate::airtime::provider::{AirtimeProvider, DispatchReceipt, DispatchRequest};
use crate::carriers;
use crate::config::AggregatorConfig;
use crate::payments::utils::{Auth, Idempotency, UpstreamClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

pub const PROVIDER_NAME: &str = "aggregator";

#[derive(Debug, Deserialize)]
struct AggregatorWireResponse {
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
    #[serde(default)]
    responses: Vec<RecipientResponse>,
}

#[derive(Debug, Deserialize)]
struct RecipientResponse {
    #[serde(default)]
    status: String,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
    #[serde(rename = "requestId", default)]
    request_id: Option<String>,
}

pub struct AggregatorClient {
    config: AggregatorConfig,
    http: UpstreamClient,
}

impl AggregatorClient {
    pub fn new(config: AggregatorConfig, http: UpstreamClient) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl AirtimeProvider for AggregatorClient {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn dispatch(&self, request: &DispatchRequest) -> DispatchResult<DispatchReceipt> {
        let phone =
            carriers::aggregator_format(&request.destination).map_err(|e| {
                DispatchError::Validation {
                    message: e.to_string(),
                }
            })?;

        // A batch of exactly one recipient per dispatch.
        let payload = serde_json::json!({
            "username": self.config.username,
            "recipients": [{
                "phoneNumber": phone,
                "amount": request.amount.to_string(),
                "currencyCode": "KES",
            }],
        });

        // One recipient, sent exactly once; re-sends would double-credit
        // the subscriber.
        let raw: JsonValue = self
            .http
            .post_json(
                PROVIDER_NAME,
                &self.config.airtime_url,
                Auth::ApiKey("apiKey", &self.config.api_key),
                &payload,
                Idempotency::OneShot,
            )
            .await?;

        let parsed: AggregatorWireResponse =
            serde_json::from_value(raw.clone()).map_err(|e| DispatchError::Provider {
                provider: PROVIDER_NAME.to_string(),
                message: format!("unrecognized aggregator response: {}", e),
                raw: Some(raw.clone()),
            })?;

        let recipient = parsed.responses.first();
        let sent = recipient.map(|r| r.status == "Sent").unwrap_or(false);
        let error_clear = recipient
            .and_then(|r| r.error_message.as_deref())
            .map(|m| m == "None")
            .unwrap_or(false);

        if !(sent && error_clear) {
            let message = recipient
                .and_then(|r| r.error_message.clone())
                .or(parsed.error_message)
                .unwrap_or_else(|| "aggregator did not confirm the dispatch".to_string());
            return Err(DispatchError::Provider {
                provider: PROVIDER_NAME.to_string(),
                message,
                raw: Some(raw),
            });
        }

        info!(
            phone = %phone,
            carrier = %request.carrier,
            "aggregator dispatch succeeded"
        );

        Ok(DispatchReceipt {
            provider_ref: recipient.and_then(|r| r.request_id.clone()),
            new_float_balance: None,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognizes_sent_recipient() {
        let parsed: AggregatorWireResponse = serde_json::from_value(json!({
            "errorMessage": "None",
            "numSent": 1,
            "responses": [{
                "phoneNumber": "+254712345678",
                "status": "Sent",
                "errorMessage": "None",
                "requestId": "ATQid_abc123",
            }],
        }))
        .unwrap();
        let recipient = parsed.responses.first().unwrap();
        assert_eq!(recipient.status, "Sent");
        assert_eq!(recipient.error_message.as_deref(), Some("None"));
    }

    #[test]
    fn recognizes_failed_recipient() {
        let parsed: AggregatorWireResponse = serde_json::from_value(json!({
            "errorMessage": "None",
            "responses": [{
                "phoneNumber": "+254712345678",
                "status": "Failed",
                "errorMessage": "Insufficient credit",
            }],
        }))
        .unwrap();
        let recipient = parsed.responses.first().unwrap();
        assert_ne!(recipient.status, "Sent");
    }

    #[test]
    fn tolerates_empty_response_list() {
        let parsed: AggregatorWireResponse =
            serde_json::from_value(json!({"errorMessage": "No recipients"})).unwrap();
        assert!(parsed.responses.is_empty());
    }
}
