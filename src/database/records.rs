//! Row types for the gateway's collections. The document key everywhere is
//! the rail-assigned checkout request id, so callbacks resolve in O(1).

use bigdecimal::BigDecimal;
use sqlx::FromRow;
use uuid::Uuid;

/// Immutable snapshot of an initiation request.
#[derive(Debug, Clone, FromRow)]
pub struct RequestRecord {
    pub checkout_request_id: String,
    pub payer_msisdn: String,
    pub destination_msisdn: String,
    pub carrier: String,
    pub amount: BigDecimal,
    pub payload: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Mutable transaction state; `status` holds the lifecycle state name.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRecord {
    pub checkout_request_id: String,
    pub status: String,
    pub payment_receipt: Option<String>,
    pub amount_received: Option<BigDecimal>,
    pub fulfillment_status: Option<String>,
    pub provider_used: Option<String>,
    pub fallback_attempted: bool,
    pub reconciliation_needed: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SaleRecord {
    pub checkout_request_id: String,
    pub original_amount: BigDecimal,
    pub bonus: BigDecimal,
    pub dispatched_amount: BigDecimal,
    pub carrier: String,
    pub provider_used: Option<String>,
    pub dispatch_result: Option<serde_json::Value>,
    pub bonus_percentage: BigDecimal,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ErrorLogRecord {
    pub id: Uuid,
    pub kind: String,
    pub sub_kind: Option<String>,
    pub checkout_request_id: Option<String>,
    pub context: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// One row per reversal bookkeeping entry; `kind` distinguishes reversals
/// awaiting confirmation from reconciliations that need a human.
#[derive(Debug, Clone, FromRow)]
pub struct ReconciliationRecord {
    pub id: Uuid,
    pub kind: String,
    pub checkout_request_id: String,
    pub original_amount: BigDecimal,
    pub payer_msisdn: Option<String>,
    pub detail: serde_json::Value,
    pub originator_conversation_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FloatBalanceRecord {
    pub float_name: String,
    pub balance: BigDecimal,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BonusHistoryRecord {
    pub id: Uuid,
    pub telco: String,
    pub old_percentage: BigDecimal,
    pub new_percentage: BigDecimal,
    pub actor: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Current per-telco bonus percentages (singleton).
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BonusSettings {
    pub safaricom_percentage: BigDecimal,
    pub africastalking_percentage: BigDecimal,
}

impl BonusSettings {
    pub fn zero() -> Self {
        Self {
            safaricom_percentage: BigDecimal::from(0),
            africastalking_percentage: BigDecimal::from(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Insert payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub checkout_request_id: String,
    pub payer_msisdn: String,
    pub destination_msisdn: String,
    pub carrier: String,
    pub amount: BigDecimal,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub checkout_request_id: String,
    pub original_amount: BigDecimal,
    pub bonus: BigDecimal,
    pub dispatched_amount: BigDecimal,
    pub carrier: String,
    pub bonus_percentage: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct NewPendingReversal {
    pub checkout_request_id: String,
    pub original_amount: BigDecimal,
    pub payer_msisdn: Option<String>,
    pub request_data: serde_json::Value,
    pub originator_conversation_id: Option<String>,
}

/// Partial update applied together with a status transition. `None` fields
/// keep their stored values.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub payment_receipt: Option<String>,
    pub amount_received: Option<BigDecimal>,
    pub fulfillment_status: Option<String>,
    pub provider_used: Option<String>,
    pub fallback_attempted: Option<bool>,
    pub reconciliation_needed: Option<bool>,
}
