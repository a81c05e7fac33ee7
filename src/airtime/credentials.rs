//! Process-local credential caches.
//!
//! Both caches are owned by the provider instances that use them and are
//! never persisted or shared process-wide. Expiry is checked on every read;
//! a stale entry triggers a refetch under the write lock, which also gives
//! cheap single-flight behavior per key.

use crate::airtime::error::{DispatchError, DispatchResult};
use crate::database::store::GatewayStore;
use crate::payments::types::AuthResponse;
use crate::payments::utils::{Auth, UpstreamClient};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Safety window subtracted from the advertised bearer token lifetime.
const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Dealer service PINs rotate rarely; ten minutes bounds the staleness.
const SERVICE_PIN_TTL_SECS: i64 = 600;

/// Bearer token fetched with HTTP Basic against a grant URL and cached
/// until its stated lifetime minus a safety margin.
pub struct BearerTokenCache {
    grant_url: String,
    consumer_key: String,
    consumer_secret: String,
    cached: RwLock<Option<(String, DateTime<Utc>)>>,
}

impl BearerTokenCache {
    pub fn new(grant_url: String, consumer_key: String, consumer_secret: String) -> Self {
        Self {
            grant_url,
            consumer_key,
            consumer_secret,
            cached: RwLock::new(None),
        }
    }

    pub async fn token(&self, http: &UpstreamClient) -> DispatchResult<String> {
        {
            let cached = self.cached.read().await;
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() {
                    return Ok(token.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some((token, expiry)) = cached.as_ref() {
            if *expiry > Utc::now() {
                return Ok(token.clone());
            }
        }

        let auth = BASE64.encode(format!("{}:{}", self.consumer_key, self.consumer_secret));
        let response: AuthResponse = http
            .get_json("dealer-grant", &self.grant_url, Auth::Basic(&auth))
            .await
            .map_err(|e| DispatchError::Credential {
                message: format!("bearer token grant failed: {}", e),
            })?;

        let advertised = response.lifetime_secs();
        let lifetime = if advertised > TOKEN_SAFETY_MARGIN_SECS {
            advertised - TOKEN_SAFETY_MARGIN_SECS
        } else {
            DEFAULT_TOKEN_LIFETIME_SECS - TOKEN_SAFETY_MARGIN_SECS
        };
        let expiry = Utc::now() + chrono::Duration::seconds(lifetime);
        *cached = Some((response.access_token.clone(), expiry));
        debug!(lifetime_secs = lifetime, "dealer bearer token refreshed");
        Ok(response.access_token)
    }
}

/// Raw dealer service PIN read from the settings store with a fixed TTL.
pub struct ServicePinCache {
    store: Arc<dyn GatewayStore>,
    cached: RwLock<Option<(String, DateTime<Utc>)>>,
}

impl ServicePinCache {
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self {
            store,
            cached: RwLock::new(None),
        }
    }

    pub async fn pin(&self) -> DispatchResult<String> {
        {
            let cached = self.cached.read().await;
            if let Some((pin, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() {
                    return Ok(pin.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        if let Some((pin, expiry)) = cached.as_ref() {
            if *expiry > Utc::now() {
                return Ok(pin.clone());
            }
        }

        let pin = self
            .store
            .dealer_service_pin()
            .await
            .map_err(|e| DispatchError::Credential {
                message: format!("service PIN unavailable: {}", e),
            })?;
        let expiry = Utc::now() + chrono::Duration::seconds(SERVICE_PIN_TTL_SECS);
        *cached = Some((pin.clone(), expiry));
        Ok(pin)
    }
}
