//! Payment rail callback ingress.
//!
//! Every endpoint here answers HTTP 200 with `ResultCode: 0` no matter
//! what happened inside: a non-2xx answer makes the rail retry, and a
//! retried callback is exactly the duplicate-delivery case the engine's
//! compare-and-swap transitions exist to absorb. The engine runs on a
//! spawned task so the rail gets its acknowledgement well inside its
//! timeout window even when dispatch is slow.

use crate::api::ApiState;
use crate::payments::types::{MpesaCallback, ReversalCallback};
use crate::services::lifecycle::ERROR_KIND_CALLBACK;
use axum::{extract::State, Json};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

fn ack() -> Json<JsonValue> {
    Json(serde_json::json!({ "ResultCode": 0, "ResultDesc": "Success" }))
}

/// POST /stk-callback
pub async fn stk_callback(State(state): State<ApiState>, body: String) -> Json<JsonValue> {
    let callback: MpesaCallback = match serde_json::from_str(&body) {
        Ok(callback) => callback,
        Err(e) => {
            warn!(error = %e, "malformed payment callback");
            journal_malformed(&state, "stk-callback", &body, &e.to_string()).await;
            return ack();
        }
    };

    let stk = callback.body.stk_callback;
    info!(
        checkout_request_id = %stk.checkout_request_id,
        result_code = stk.result_code,
        "payment callback received"
    );

    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.handle_payment_callback(stk).await {
            error!(error = %e, "payment callback processing failed");
        }
    });

    ack()
}

/// POST /daraja-reversal-result
pub async fn reversal_result(State(state): State<ApiState>, body: String) -> Json<JsonValue> {
    let callback: ReversalCallback = match serde_json::from_str(&body) {
        Ok(callback) => callback,
        Err(e) => {
            warn!(error = %e, "malformed reversal result callback");
            journal_malformed(&state, "daraja-reversal-result", &body, &e.to_string()).await;
            return ack();
        }
    };

    info!(
        originator_conversation_id = %callback.result.originator_conversation_id,
        result_code = callback.result.result_code,
        "reversal result received"
    );

    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.handle_reversal_result(callback.result).await {
            error!(error = %e, "reversal result processing failed");
        }
    });

    ack()
}

/// POST /daraja-reversal-timeout
///
/// The rail's timeout callback echoes the queued request rather than a
/// result envelope, so the originator id is fished out of whichever shape
/// arrived.
pub async fn reversal_timeout(State(state): State<ApiState>, body: String) -> Json<JsonValue> {
    let payload: JsonValue = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "malformed reversal timeout callback");
            journal_malformed(&state, "daraja-reversal-timeout", &body, &e.to_string()).await;
            return ack();
        }
    };

    let originator = payload
        .pointer("/Result/OriginatorConversationID")
        .or_else(|| payload.get("OriginatorConversationID"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let Some(originator) = originator else {
        warn!("reversal timeout callback without originator conversation id");
        journal_malformed(
            &state,
            "daraja-reversal-timeout",
            &body,
            "missing OriginatorConversationID",
        )
        .await;
        return ack();
    };

    info!(originator_conversation_id = %originator, "reversal timeout received");

    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.handle_reversal_timeout(&originator).await {
            error!(error = %e, "reversal timeout processing failed");
        }
    });

    ack()
}

async fn journal_malformed(state: &ApiState, endpoint: &str, body: &str, reason: &str) {
    let context = serde_json::json!({
        "endpoint": endpoint,
        "reason": reason,
        // Raw payload capped so a hostile body cannot bloat the journal.
        "raw": body.chars().take(4096).collect::<String>(),
    });
    if let Err(e) = state
        .store
        .record_error(ERROR_KIND_CALLBACK, None, None, context)
        .await
    {
        warn!(error = %e, "error journal write failed");
    }
}
