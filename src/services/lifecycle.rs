//! Transaction lifecycle engine.
//!
//! Drives a transaction from initiation through payment confirmation,
//! dispatch with fallback, and reversal. Every state change goes through a
//! compare-and-swap transition keyed on the persisted status, which makes
//! both entry points idempotent under duplicate callback delivery: the
//! duplicate loses the swap and produces no side effects.

use crate::carriers::{self, Carrier};
use crate::database::records::{
    NewPendingReversal, NewRequest, NewSale, RequestRecord, TransactionPatch,
};
use crate::database::store::GatewayStore;
use crate::error::{AppError, AppResult};
use crate::payments::daraja::PaymentRail;
use crate::payments::types::{ReversalResult, StkCallback};
use crate::services::bonus::BonusEngine;
use crate::services::dispatch::AirtimeDispatcher;
use crate::services::notify::Notifier;
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const ERROR_KIND_PUSH_INITIATION: &str = "STK_PUSH_INITIATION_ERROR";
pub const ERROR_KIND_CALLBACK: &str = "STK_CALLBACK_ERROR";
pub const ERROR_KIND_PAYMENT: &str = "STK_PAYMENT_ERROR";
pub const ERROR_KIND_FULFILLMENT: &str = "AIRTIME_FULFILLMENT_ERROR";
pub const ERROR_KIND_CRITICAL: &str = "CRITICAL_FULFILLMENT_ERROR";

pub const ERROR_SUB_INVALID_AMOUNT: &str = "INVALID_AMOUNT_RANGE";
pub const ERROR_SUB_UNKNOWN_CARRIER: &str = "UNKNOWN_CARRIER";
pub const ERROR_SUB_RUNTIME: &str = "RUNTIME_EXCEPTION";

/// Lifecycle states. The stored string form is the SCREAMING_SNAKE name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    PushInitiated,
    MpesaPaymentFailed,
    ReceivedPendingFulfillment,
    FulfillmentInProgress,
    CompletedAndFulfilled,
    ReceivedFulfillmentFailed,
    ReversalPendingConfirmation,
    ReversalInitiationFailed,
    ReversedSuccessfully,
    ReversalFailedConfirmation,
    ReversalTimedOut,
    CriticalFulfillmentError,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::PushInitiated => "PUSH_INITIATED",
            TransactionStatus::MpesaPaymentFailed => "MPESA_PAYMENT_FAILED",
            TransactionStatus::ReceivedPendingFulfillment => "RECEIVED_PENDING_FULFILLMENT",
            TransactionStatus::FulfillmentInProgress => "FULFILLMENT_IN_PROGRESS",
            TransactionStatus::CompletedAndFulfilled => "COMPLETED_AND_FULFILLED",
            TransactionStatus::ReceivedFulfillmentFailed => "RECEIVED_FULFILLMENT_FAILED",
            TransactionStatus::ReversalPendingConfirmation => "REVERSAL_PENDING_CONFIRMATION",
            TransactionStatus::ReversalInitiationFailed => "REVERSAL_INITIATION_FAILED",
            TransactionStatus::ReversedSuccessfully => "REVERSED_SUCCESSFULLY",
            TransactionStatus::ReversalFailedConfirmation => "REVERSAL_FAILED_CONFIRMATION",
            TransactionStatus::ReversalTimedOut => "REVERSAL_TIMED_OUT",
            TransactionStatus::CriticalFulfillmentError => "CRITICAL_FULFILLMENT_ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::MpesaPaymentFailed
                | TransactionStatus::CompletedAndFulfilled
                | TransactionStatus::ReversedSuccessfully
                | TransactionStatus::ReversalFailedConfirmation
                | TransactionStatus::ReversalTimedOut
                | TransactionStatus::CriticalFulfillmentError
        )
    }

    /// Valid forward transitions from this state.
    pub fn valid_transitions(&self) -> Vec<TransactionStatus> {
        use TransactionStatus::*;
        match self {
            PushInitiated => vec![MpesaPaymentFailed, ReceivedPendingFulfillment],
            ReceivedPendingFulfillment => vec![
                FulfillmentInProgress,
                ReceivedFulfillmentFailed,
                CriticalFulfillmentError,
            ],
            FulfillmentInProgress => vec![
                CompletedAndFulfilled,
                ReceivedFulfillmentFailed,
                CriticalFulfillmentError,
            ],
            ReceivedFulfillmentFailed => vec![
                ReversalPendingConfirmation,
                ReversalInitiationFailed,
                CriticalFulfillmentError,
            ],
            ReversalPendingConfirmation => vec![
                ReversedSuccessfully,
                ReversalFailedConfirmation,
                ReversalTimedOut,
            ],
            ReversalInitiationFailed => vec![],
            MpesaPaymentFailed | CompletedAndFulfilled | ReversedSuccessfully
            | ReversalFailedConfirmation | ReversalTimedOut | CriticalFulfillmentError => vec![],
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        use TransactionStatus::*;
        match value {
            "PUSH_INITIATED" => Ok(PushInitiated),
            "MPESA_PAYMENT_FAILED" => Ok(MpesaPaymentFailed),
            "RECEIVED_PENDING_FULFILLMENT" => Ok(ReceivedPendingFulfillment),
            "FULFILLMENT_IN_PROGRESS" => Ok(FulfillmentInProgress),
            "COMPLETED_AND_FULFILLED" => Ok(CompletedAndFulfilled),
            "RECEIVED_FULFILLMENT_FAILED" => Ok(ReceivedFulfillmentFailed),
            "REVERSAL_PENDING_CONFIRMATION" => Ok(ReversalPendingConfirmation),
            "REVERSAL_INITIATION_FAILED" => Ok(ReversalInitiationFailed),
            "REVERSED_SUCCESSFULLY" => Ok(ReversedSuccessfully),
            "REVERSAL_FAILED_CONFIRMATION" => Ok(ReversalFailedConfirmation),
            "REVERSAL_TIMED_OUT" => Ok(ReversalTimedOut),
            "CRITICAL_FULFILLMENT_ERROR" => Ok(CriticalFulfillmentError),
            _ => Err(()),
        }
    }
}

/// Decoded initiation request body.
#[derive(Debug, Clone)]
pub struct InitiationRequest {
    pub phone_number: String,
    pub amount: i64,
    pub recipient: String,
}

#[derive(Debug, Clone)]
pub struct InitiationAccepted {
    pub checkout_request_id: String,
    pub customer_message: Option<String>,
}

/// Accepted top-up range in whole currency units, inclusive.
#[derive(Debug, Clone)]
pub struct EngineLimits {
    pub min_amount: i64,
    pub max_amount: i64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            min_amount: 5,
            max_amount: 5000,
        }
    }
}

impl EngineLimits {
    fn contains(&self, amount: &BigDecimal) -> bool {
        amount >= &BigDecimal::from(self.min_amount) && amount <= &BigDecimal::from(self.max_amount)
    }
}

pub struct LifecycleEngine {
    store: Arc<dyn GatewayStore>,
    rail: Arc<dyn PaymentRail>,
    dispatcher: AirtimeDispatcher,
    bonus: BonusEngine,
    notifier: Option<Arc<Notifier>>,
    limits: EngineLimits,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        rail: Arc<dyn PaymentRail>,
        dispatcher: AirtimeDispatcher,
        bonus: BonusEngine,
        notifier: Option<Arc<Notifier>>,
    ) -> Self {
        Self {
            store,
            rail,
            dispatcher,
            bonus,
            notifier,
            limits: EngineLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    // -----------------------------------------------------------------
    // Entry point 1: initiation
    // -----------------------------------------------------------------

    pub async fn handle_initiation(
        &self,
        input: InitiationRequest,
    ) -> AppResult<InitiationAccepted> {
        if input.amount < self.limits.min_amount || input.amount > self.limits.max_amount {
            self.journal(
                ERROR_KIND_PUSH_INITIATION,
                Some(ERROR_SUB_INVALID_AMOUNT),
                None,
                serde_json::json!({ "amount": input.amount }),
            )
            .await;
            return Err(AppError::amount_out_of_range(
                input.amount,
                self.limits.min_amount,
                self.limits.max_amount,
            ));
        }

        let payer_digits = input
            .phone_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .count();
        if payer_digits < 9 {
            self.journal(
                ERROR_KIND_PUSH_INITIATION,
                None,
                None,
                serde_json::json!({ "reason": "payer msisdn too short" }),
            )
            .await;
            return Err(AppError::invalid_msisdn(
                "phoneNumber",
                "expected at least nine digits",
            ));
        }
        let payer = match carriers::rail_format(&input.phone_number) {
            Ok(payer) => payer,
            Err(e) => {
                self.journal(
                    ERROR_KIND_PUSH_INITIATION,
                    None,
                    None,
                    serde_json::json!({ "reason": e.to_string() }),
                )
                .await;
                return Err(AppError::invalid_msisdn("phoneNumber", e.to_string()));
            }
        };

        let destination = match carriers::national(&input.recipient) {
            Ok(destination) => destination,
            Err(e) => {
                self.journal(
                    ERROR_KIND_PUSH_INITIATION,
                    None,
                    None,
                    serde_json::json!({ "reason": e.to_string() }),
                )
                .await;
                return Err(AppError::invalid_msisdn("recipient", e.to_string()));
            }
        };
        let Some(carrier) = carriers::classify(&destination) else {
            self.journal(
                ERROR_KIND_PUSH_INITIATION,
                Some(ERROR_SUB_UNKNOWN_CARRIER),
                None,
                serde_json::json!({ "recipient": destination }),
            )
            .await;
            return Err(AppError::unknown_carrier(destination));
        };

        // The destination number doubles as the rail's account reference.
        let push = match self
            .rail
            .stk_push(&input.phone_number, input.amount, &destination)
            .await
        {
            Ok(push) => push,
            Err(e) => {
                self.journal(
                    ERROR_KIND_PUSH_INITIATION,
                    None,
                    None,
                    serde_json::json!({
                        "payer": payer,
                        "recipient": destination,
                        "amount": input.amount,
                        "error": e.to_string(),
                    }),
                )
                .await;
                return Err(AppError::from(e));
            }
        };

        let request = NewRequest {
            checkout_request_id: push.checkout_request_id.clone(),
            payer_msisdn: payer,
            destination_msisdn: destination,
            carrier: carrier.as_str().to_string(),
            amount: BigDecimal::from(input.amount),
            payload: serde_json::json!({
                "phoneNumber": input.phone_number,
                "amount": input.amount,
                "recipient": input.recipient,
            }),
        };
        self.store
            .create_request(&request, TransactionStatus::PushInitiated.as_str())
            .await?;

        info!(
            checkout_request_id = %push.checkout_request_id,
            carrier = %carrier,
            amount = input.amount,
            "top-up initiated, awaiting payment callback"
        );

        Ok(InitiationAccepted {
            checkout_request_id: push.checkout_request_id,
            customer_message: push.customer_message,
        })
    }

    // -----------------------------------------------------------------
    // Entry point 2: payment callback
    // -----------------------------------------------------------------

    pub async fn handle_payment_callback(&self, callback: StkCallback) -> AppResult<()> {
        let id = callback.checkout_request_id.clone();

        if self.store.transaction(&id).await?.is_none() {
            warn!(checkout_request_id = %id, "payment callback for unknown transaction");
            self.journal(
                ERROR_KIND_CALLBACK,
                None,
                Some(&id),
                serde_json::json!({
                    "reason": "unknown checkout request id",
                    "result_code": callback.result_code,
                }),
            )
            .await;
            return Ok(());
        }

        if !callback.is_success() {
            let patch = TransactionPatch {
                fulfillment_status: Some("PAYMENT_FAILED".to_string()),
                ..Default::default()
            };
            let moved = self
                .store
                .transition(
                    &id,
                    &[TransactionStatus::PushInitiated.as_str()],
                    TransactionStatus::MpesaPaymentFailed.as_str(),
                    &patch,
                )
                .await?;
            if moved {
                info!(
                    checkout_request_id = %id,
                    result_code = callback.result_code,
                    "payment failed or cancelled"
                );
                self.journal(
                    ERROR_KIND_PAYMENT,
                    None,
                    Some(&id),
                    serde_json::json!({
                        "result_code": callback.result_code,
                        "result_desc": callback.result_desc,
                    }),
                )
                .await;
            } else {
                debug!(checkout_request_id = %id, "duplicate failure callback ignored");
            }
            return Ok(());
        }

        let Some(request) = self.store.request(&id).await? else {
            self.journal(
                ERROR_KIND_CALLBACK,
                None,
                Some(&id),
                serde_json::json!({ "reason": "request snapshot missing" }),
            )
            .await;
            return Ok(());
        };

        let confirmation = callback.confirmation();
        let amount_received = confirmation
            .amount
            .clone()
            .unwrap_or_else(|| request.amount.clone());

        let patch = TransactionPatch {
            payment_receipt: confirmation.receipt.clone(),
            amount_received: Some(amount_received.clone()),
            ..Default::default()
        };
        let moved = self
            .store
            .transition(
                &id,
                &[TransactionStatus::PushInitiated.as_str()],
                TransactionStatus::ReceivedPendingFulfillment.as_str(),
                &patch,
            )
            .await?;
        if !moved {
            debug!(checkout_request_id = %id, "duplicate payment callback ignored");
            return Ok(());
        }

        info!(
            checkout_request_id = %id,
            amount = %amount_received,
            receipt = confirmation.receipt.as_deref().unwrap_or("-"),
            "payment confirmed, starting fulfillment"
        );

        if let Err(err) = self.fulfill(&request, &amount_received).await {
            error!(checkout_request_id = %id, error = %err, "fulfillment aborted");
            self.journal(
                ERROR_KIND_CRITICAL,
                Some(ERROR_SUB_RUNTIME),
                Some(&id),
                serde_json::json!({ "error": err.to_string() }),
            )
            .await;
            let patch = TransactionPatch {
                reconciliation_needed: Some(true),
                ..Default::default()
            };
            if let Err(e) = self
                .store
                .transition(
                    &id,
                    &[
                        TransactionStatus::ReceivedPendingFulfillment.as_str(),
                        TransactionStatus::FulfillmentInProgress.as_str(),
                        TransactionStatus::ReceivedFulfillmentFailed.as_str(),
                    ],
                    TransactionStatus::CriticalFulfillmentError.as_str(),
                    &patch,
                )
                .await
            {
                error!(checkout_request_id = %id, error = %e, "cannot mark critical state");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Fulfillment
    // -----------------------------------------------------------------

    async fn fulfill(
        &self,
        request: &RequestRecord,
        amount_received: &BigDecimal,
    ) -> AppResult<()> {
        let id = &request.checkout_request_id;
        let carrier = Carrier::parse(&request.carrier)
            .ok_or_else(|| AppError::internal(format!("unknown stored carrier {}", request.carrier)))?;

        let quote = self.bonus.quote(carrier, amount_received).await?;
        let dispatched = amount_received + &quote.bonus;
        self.store
            .create_sale(&NewSale {
                checkout_request_id: id.clone(),
                original_amount: amount_received.clone(),
                bonus: quote.bonus.clone(),
                dispatched_amount: dispatched.clone(),
                carrier: carrier.as_str().to_string(),
                bonus_percentage: quote.percentage.clone(),
            })
            .await?;

        // Confirmed amount may differ from the requested one; re-check the
        // range and reverse instead of dispatching when it is out of bounds.
        if !self.limits.contains(amount_received) {
            self.journal(
                ERROR_KIND_FULFILLMENT,
                Some(ERROR_SUB_INVALID_AMOUNT),
                Some(id),
                serde_json::json!({ "amount": amount_received.to_string() }),
            )
            .await;
            self.store
                .transition(
                    id,
                    &[TransactionStatus::ReceivedPendingFulfillment.as_str()],
                    TransactionStatus::ReceivedFulfillmentFailed.as_str(),
                    &TransactionPatch {
                        fulfillment_status: Some(ERROR_SUB_INVALID_AMOUNT.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            self.initiate_reversal(request, amount_received, "amount outside allowed range")
                .await?;
            return Ok(());
        }

        if carriers::classify(&request.destination_msisdn).is_none() {
            self.journal(
                ERROR_KIND_FULFILLMENT,
                Some(ERROR_SUB_UNKNOWN_CARRIER),
                Some(id),
                serde_json::json!({ "recipient": request.destination_msisdn }),
            )
            .await;
            self.store
                .transition(
                    id,
                    &[TransactionStatus::ReceivedPendingFulfillment.as_str()],
                    TransactionStatus::ReceivedFulfillmentFailed.as_str(),
                    &TransactionPatch {
                        fulfillment_status: Some(ERROR_SUB_UNKNOWN_CARRIER.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            self.initiate_reversal(request, amount_received, "destination no longer dispatchable")
                .await?;
            return Ok(());
        }

        let moved = self
            .store
            .transition(
                id,
                &[TransactionStatus::ReceivedPendingFulfillment.as_str()],
                TransactionStatus::FulfillmentInProgress.as_str(),
                &TransactionPatch::default(),
            )
            .await?;
        if !moved {
            debug!(checkout_request_id = %id, "fulfillment already claimed elsewhere");
            return Ok(());
        }

        let dispatch_request = crate::airtime::provider::DispatchRequest {
            destination: request.destination_msisdn.clone(),
            amount: dispatched.clone(),
            carrier,
        };

        match self
            .dispatcher
            .dispatch(id, &dispatch_request, amount_received)
            .await
        {
            Ok(outcome) => {
                let patch = TransactionPatch {
                    provider_used: Some(outcome.provider_label.to_string()),
                    fallback_attempted: Some(outcome.fallback_attempted),
                    fulfillment_status: Some("FULFILLED".to_string()),
                    ..Default::default()
                };
                self.store
                    .transition(
                        id,
                        &[TransactionStatus::FulfillmentInProgress.as_str()],
                        TransactionStatus::CompletedAndFulfilled.as_str(),
                        &patch,
                    )
                    .await?;
                self.store
                    .complete_sale(id, outcome.provider_label, &outcome.receipt.raw)
                    .await?;
                info!(
                    checkout_request_id = %id,
                    provider = outcome.provider_label,
                    dispatched = %dispatched,
                    "airtime delivered"
                );
                if let Some(notifier) = &self.notifier {
                    notifier.sale_completed(
                        id,
                        carrier.as_str(),
                        amount_received,
                        &dispatched,
                        outcome.provider_label,
                    );
                }
                Ok(())
            }
            Err(failure) => {
                warn!(
                    checkout_request_id = %id,
                    error = %failure.error,
                    fallback_attempted = failure.fallback_attempted,
                    "dispatch failed after all attempts"
                );
                let patch = TransactionPatch {
                    fallback_attempted: Some(failure.fallback_attempted),
                    fulfillment_status: Some("DISPATCH_FAILED".to_string()),
                    ..Default::default()
                };
                self.store
                    .transition(
                        id,
                        &[TransactionStatus::FulfillmentInProgress.as_str()],
                        TransactionStatus::ReceivedFulfillmentFailed.as_str(),
                        &patch,
                    )
                    .await?;
                self.initiate_reversal(request, amount_received, &failure.error.to_string())
                    .await?;
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------
    // Reversal
    // -----------------------------------------------------------------

    async fn initiate_reversal(
        &self,
        request: &RequestRecord,
        amount: &BigDecimal,
        reason: &str,
    ) -> AppResult<()> {
        let id = &request.checkout_request_id;
        let from_states = [
            TransactionStatus::ReceivedFulfillmentFailed.as_str(),
            TransactionStatus::ReceivedPendingFulfillment.as_str(),
        ];

        let transaction = self
            .store
            .transaction(id)
            .await?
            .ok_or_else(|| AppError::transaction_not_found(id.clone()))?;
        let Some(receipt) = transaction.payment_receipt.clone() else {
            warn!(checkout_request_id = %id, "no payment receipt on record, reversal impossible");
            self.store
                .record_failed_reversal(id, "no payment receipt on record", amount)
                .await?;
            self.store
                .transition(
                    id,
                    &from_states,
                    TransactionStatus::ReversalInitiationFailed.as_str(),
                    &TransactionPatch {
                        reconciliation_needed: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(());
        };

        let amount_units = amount
            .with_scale_round(0, RoundingMode::HalfUp)
            .to_i64()
            .ok_or_else(|| AppError::internal("reversal amount out of i64 range"))?;

        match self.rail.reverse(&receipt, amount_units, id).await {
            Ok(accepted) => {
                self.store
                    .create_pending_reversal(&NewPendingReversal {
                        checkout_request_id: id.clone(),
                        original_amount: amount.clone(),
                        payer_msisdn: Some(request.payer_msisdn.clone()),
                        request_data: serde_json::json!({
                            "receipt": receipt,
                            "amount": amount_units,
                            "reason": reason,
                            "conversation_id": accepted.conversation_id,
                            "originator_conversation_id": accepted.originator_conversation_id,
                        }),
                        originator_conversation_id: Some(
                            accepted.originator_conversation_id.clone(),
                        ),
                    })
                    .await?;
                self.store
                    .transition(
                        id,
                        &from_states,
                        TransactionStatus::ReversalPendingConfirmation.as_str(),
                        &TransactionPatch::default(),
                    )
                    .await?;
                info!(
                    checkout_request_id = %id,
                    originator_conversation_id = %accepted.originator_conversation_id,
                    "reversal submitted, awaiting confirmation"
                );
            }
            Err(e) => {
                warn!(checkout_request_id = %id, error = %e, "rail rejected reversal");
                self.store
                    .record_failed_reversal(id, &e.to_string(), amount)
                    .await?;
                self.store
                    .transition(
                        id,
                        &from_states,
                        TransactionStatus::ReversalInitiationFailed.as_str(),
                        &TransactionPatch {
                            reconciliation_needed: Some(true),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Entry points 3 and 4: reversal callbacks
    // -----------------------------------------------------------------

    pub async fn handle_reversal_result(&self, result: ReversalResult) -> AppResult<()> {
        let Some(pending) = self
            .store
            .open_reversal_by_originator(&result.originator_conversation_id)
            .await?
        else {
            warn!(
                originator_conversation_id = %result.originator_conversation_id,
                "reversal result for unknown reversal"
            );
            self.journal(
                ERROR_KIND_CALLBACK,
                None,
                None,
                serde_json::json!({
                    "reason": "unmatched reversal result",
                    "originator_conversation_id": result.originator_conversation_id,
                    "result_code": result.result_code,
                }),
            )
            .await;
            return Ok(());
        };
        let id = pending.checkout_request_id.clone();

        if result.result_code == 0 {
            let moved = self
                .store
                .transition(
                    &id,
                    &[TransactionStatus::ReversalPendingConfirmation.as_str()],
                    TransactionStatus::ReversedSuccessfully.as_str(),
                    &TransactionPatch::default(),
                )
                .await?;
            if moved {
                self.store.resolve_reversal(&id).await?;
                info!(checkout_request_id = %id, "reversal confirmed by rail");
            }
        } else {
            let moved = self
                .store
                .transition(
                    &id,
                    &[TransactionStatus::ReversalPendingConfirmation.as_str()],
                    TransactionStatus::ReversalFailedConfirmation.as_str(),
                    &TransactionPatch {
                        reconciliation_needed: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            if moved {
                self.store
                    .record_failed_reversal(&id, &result.result_desc, &pending.original_amount)
                    .await?;
                self.store.resolve_reversal(&id).await?;
                warn!(
                    checkout_request_id = %id,
                    result_code = result.result_code,
                    "reversal failed, manual reconciliation needed"
                );
            }
        }
        Ok(())
    }

    pub async fn handle_reversal_timeout(
        &self,
        originator_conversation_id: &str,
    ) -> AppResult<()> {
        let Some(pending) = self
            .store
            .open_reversal_by_originator(originator_conversation_id)
            .await?
        else {
            self.journal(
                ERROR_KIND_CALLBACK,
                None,
                None,
                serde_json::json!({
                    "reason": "unmatched reversal timeout",
                    "originator_conversation_id": originator_conversation_id,
                }),
            )
            .await;
            return Ok(());
        };
        let id = pending.checkout_request_id.clone();

        let moved = self
            .store
            .transition(
                &id,
                &[TransactionStatus::ReversalPendingConfirmation.as_str()],
                TransactionStatus::ReversalTimedOut.as_str(),
                &TransactionPatch {
                    reconciliation_needed: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        if moved {
            self.store
                .record_failed_reversal(
                    &id,
                    "reversal timed out in rail queue",
                    &pending.original_amount,
                )
                .await?;
            self.store.resolve_reversal(&id).await?;
            warn!(checkout_request_id = %id, "reversal timed out, manual reconciliation needed");
        }
        Ok(())
    }

    /// Error journal writes are best-effort; a failing journal must not
    /// change the handler outcome.
    async fn journal(
        &self,
        kind: &str,
        sub_kind: Option<&str>,
        id: Option<&str>,
        context: serde_json::Value,
    ) {
        if let Err(e) = self.store.record_error(kind, sub_kind, id, context).await {
            warn!(kind, error = %e, "error journal write failed");
        }
    }
}
