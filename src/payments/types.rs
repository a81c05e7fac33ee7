//! Wire types for the Daraja payment rail.
//!
//! Field names are bound exactly as the rail spells them (PascalCase, and
//! one historical typo in the reversal request that the rail still expects).

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: JsonValue,
}

impl AuthResponse {
    /// The rail advertises `expires_in` as a string in production and a
    /// number in the sandbox; tolerate both.
    pub fn lifetime_secs(&self) -> i64 {
        match &self.expires_in {
            JsonValue::Number(n) => n.as_i64().unwrap_or(3600),
            JsonValue::String(s) => s.parse().unwrap_or(3600),
            _ => 3600,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StkPushWireRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: i64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushWireResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReversalWireRequest {
    #[serde(rename = "Initiator")]
    pub initiator: String,
    #[serde(rename = "SecurityCredential")]
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
    #[serde(rename = "Amount")]
    pub amount: i64,
    #[serde(rename = "ReceiverParty")]
    pub receiver_party: String,
    // The rail's documented spelling.
    #[serde(rename = "RecieverIdentifierType")]
    pub receiver_identifier_type: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "Occasion")]
    pub occasion: String,
}

#[derive(Debug, Deserialize)]
pub struct ReversalWireResponse {
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
}

// ---------------------------------------------------------------------------
// Inbound callback shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MpesaCallback {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: JsonValue,
}

/// Fields fished out of the callback metadata array. Every field is
/// optional: the rail omits items freely, so absence never panics.
#[derive(Debug, Clone, Default)]
pub struct PaymentConfirmation {
    pub amount: Option<BigDecimal>,
    pub receipt: Option<String>,
    pub payer_msisdn: Option<String>,
    pub transaction_date: Option<String>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }

    pub fn confirmation(&self) -> PaymentConfirmation {
        let mut confirmation = PaymentConfirmation::default();
        let Some(metadata) = &self.callback_metadata else {
            return confirmation;
        };

        for item in &metadata.items {
            match item.name.as_str() {
                "Amount" => confirmation.amount = decimal_value(&item.value),
                "MpesaReceiptNumber" => confirmation.receipt = string_value(&item.value),
                "PhoneNumber" => confirmation.payer_msisdn = string_value(&item.value),
                "TransactionDate" => confirmation.transaction_date = string_value(&item.value),
                _ => {}
            }
        }
        confirmation
    }
}

fn string_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decimal_value(value: &JsonValue) -> Option<BigDecimal> {
    match value {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s).ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReversalCallback {
    #[serde(rename = "Result")]
    pub result: ReversalResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReversalResult {
    #[serde(rename = "ResultType", default)]
    pub result_type: i64,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
}
