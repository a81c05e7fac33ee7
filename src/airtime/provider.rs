use crate::airtime::error::DispatchResult;
use crate::carriers::Carrier;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;

/// A single airtime dispatch attempt. `amount` is the full dispatched
/// value (original plus bonus) in major currency units; providers convert
/// to their own unit at the wire boundary.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Destination in national form (`07XXXXXXXX`).
    pub destination: String,
    pub amount: BigDecimal,
    pub carrier: Carrier,
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    /// Provider-assigned transaction id, when the provider reports one.
    pub provider_ref: Option<String>,
    /// Authoritative float balance reported by the provider, when any.
    pub new_float_balance: Option<BigDecimal>,
    /// Raw provider response, kept for the audit trail.
    pub raw: JsonValue,
}

/// Common dispatch interface over the dealer-direct and aggregator APIs.
#[async_trait]
pub trait AirtimeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn dispatch(&self, request: &DispatchRequest) -> DispatchResult<DispatchReceipt>;
}
