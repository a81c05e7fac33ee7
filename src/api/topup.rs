//! Initiation and status endpoints.

use crate::api::ApiState;
use crate::error::AppError;
use crate::services::lifecycle::InitiationRequest;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct StkPushBody {
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    pub amount: i64,
    pub recipient: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushAccepted {
    pub success: bool,
    pub message: String,
    #[serde(rename = "checkoutRequestID")]
    pub checkout_request_id: String,
}

/// POST /stk-push
pub async fn initiate(
    State(state): State<ApiState>,
    Json(body): Json<StkPushBody>,
) -> Result<Json<StkPushAccepted>, AppError> {
    info!(amount = body.amount, "top-up initiation received");

    let accepted = state
        .engine
        .handle_initiation(InitiationRequest {
            phone_number: body.phone_number,
            amount: body.amount,
            recipient: body.recipient,
        })
        .await?;

    Ok(Json(StkPushAccepted {
        success: true,
        message: accepted
            .customer_message
            .unwrap_or_else(|| "Payment request sent. Confirm on your phone.".to_string()),
        checkout_request_id: accepted.checkout_request_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct TransactionStatusView {
    pub status: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub amount: Option<f64>,
    pub recipient: Option<String>,
    pub carrier: Option<String>,
    #[serde(rename = "providerUsed", skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    #[serde(rename = "fallbackAttempted")]
    pub fallback_attempted: bool,
    #[serde(rename = "receipt", skip_serializing_if = "Option::is_none")]
    pub payment_receipt: Option<String>,
}

/// GET /transaction-status/{id}
pub async fn transaction_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TransactionStatusView>, AppError> {
    use bigdecimal::ToPrimitive;

    let transaction = state
        .store
        .transaction(&id)
        .await?
        .ok_or_else(|| AppError::transaction_not_found(id.clone()))?;
    let request = state.store.request(&id).await?;
    let sale = state.store.sale(&id).await?;

    Ok(Json(TransactionStatusView {
        status: transaction.status,
        created_at: transaction.created_at.to_rfc3339(),
        completed_at: sale
            .as_ref()
            .and_then(|s| s.completed_at)
            .map(|t| t.to_rfc3339()),
        amount: transaction
            .amount_received
            .as_ref()
            .or(request.as_ref().map(|r| &r.amount))
            .and_then(|a| a.to_f64()),
        recipient: request.as_ref().map(|r| r.destination_msisdn.clone()),
        carrier: request.as_ref().map(|r| r.carrier.clone()),
        provider_used: transaction.provider_used,
        fallback_attempted: transaction.fallback_attempted,
        payment_receipt: transaction.payment_receipt,
    }))
}

/// GET /ping
pub async fn ping() -> &'static str {
    "pong"
}

/// GET /
pub async fn root() -> &'static str {
    "airtime gateway up"
}
