//! Best-effort notifications to the analytics service and the offline
//! fulfillment tracker. Fire-and-forget: a delivery failure is journaled
//! under its own error kind and never affects the transaction outcome.

use crate::config::NotifyConfig;
use crate::database::store::GatewayStore;
use bigdecimal::BigDecimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const ERROR_KIND_ANALYTICS: &str = "ANALYTICS_NOTIFICATION_ERROR";

pub struct Notifier {
    config: NotifyConfig,
    http: reqwest::Client,
    store: Arc<dyn GatewayStore>,
}

impl Notifier {
    pub fn new(config: NotifyConfig, store: Arc<dyn GatewayStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            store,
        }
    }

    /// Announce a completed sale. Returns immediately; delivery happens on
    /// a spawned task.
    pub fn sale_completed(
        self: &Arc<Self>,
        checkout_request_id: &str,
        carrier: &str,
        original_amount: &BigDecimal,
        dispatched_amount: &BigDecimal,
        provider_label: &str,
    ) {
        if self.config.analytics_url.is_none() && self.config.offline_fulfillment_url.is_none() {
            return;
        }
        let payload = serde_json::json!({
            "eventId": Uuid::new_v4().to_string(),
            "type": "AIRTIME_SALE_COMPLETED",
            "checkoutRequestId": checkout_request_id,
            "carrier": carrier,
            "originalAmount": original_amount.to_string(),
            "dispatchedAmount": dispatched_amount.to_string(),
            "provider": provider_label,
        });

        let notifier = Arc::clone(self);
        let id = checkout_request_id.to_string();
        tokio::spawn(async move {
            if let Some(url) = notifier.config.analytics_url.clone() {
                notifier.post(&url, "analytics", &id, &payload).await;
            }
            if let Some(url) = notifier.config.offline_fulfillment_url.clone() {
                notifier
                    .post(&url, "offline-fulfillment", &id, &payload)
                    .await;
            }
        });
    }

    async fn post(
        &self,
        url: &str,
        target: &str,
        checkout_request_id: &str,
        payload: &serde_json::Value,
    ) {
        let result = self.http.post(url).json(payload).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(target, checkout_request_id, "notification delivered");
            }
            Ok(response) => {
                let status = response.status();
                warn!(target, checkout_request_id, %status, "notification rejected");
                self.journal(target, checkout_request_id, &format!("HTTP {status}"))
                    .await;
            }
            Err(e) => {
                warn!(target, checkout_request_id, error = %e, "notification failed");
                self.journal(target, checkout_request_id, &e.to_string()).await;
            }
        }
    }

    async fn journal(&self, target: &str, checkout_request_id: &str, error: &str) {
        if let Err(e) = self
            .store
            .record_error(
                ERROR_KIND_ANALYTICS,
                None,
                Some(checkout_request_id),
                serde_json::json!({ "target": target, "error": error }),
            )
            .await
        {
            warn!(error = %e, "error journal write failed");
        }
    }
}
