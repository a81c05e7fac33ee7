//! Test doubles for the lifecycle engine: an in-memory store, a scripted
//! payment rail, and scripted airtime providers.

use airtime_gateway::airtime::error::{DispatchError, DispatchResult};
use airtime_gateway::airtime::provider::{AirtimeProvider, DispatchReceipt, DispatchRequest};
use airtime_gateway::database::error::DatabaseError;
use airtime_gateway::database::records::{
    BonusSettings, NewPendingReversal, NewRequest, NewSale, ReconciliationRecord, RequestRecord,
    SaleRecord, TransactionPatch, TransactionRecord,
};
use airtime_gateway::database::store::GatewayStore;
use airtime_gateway::payments::daraja::{PaymentRail, PushAccepted, ReversalAccepted};
use airtime_gateway::payments::error::{PaymentError, PaymentResult, RailOperation};
use airtime_gateway::payments::types::{CallbackItem, CallbackMetadata, StkCallback};
use airtime_gateway::services::bonus::BonusEngine;
use airtime_gateway::services::dispatch::AirtimeDispatcher;
use airtime_gateway::services::lifecycle::LifecycleEngine;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    requests: HashMap<String, RequestRecord>,
    transactions: HashMap<String, TransactionRecord>,
    sales: HashMap<String, SaleRecord>,
    floats: HashMap<String, BigDecimal>,
    float_movements: Vec<(String, BigDecimal)>,
    errors: Vec<(String, Option<String>, Option<String>, serde_json::Value)>,
    reconciliations: Vec<ReconciliationRecord>,
    settings: Option<BonusSettings>,
    bonus_history: Vec<(String, BigDecimal, BigDecimal, String)>,
    service_pin: Option<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_bonus_percentages(&self, safaricom: &str, africastalking: &str) {
        let mut inner = self.inner.lock().await;
        inner.settings = Some(BonusSettings {
            safaricom_percentage: dec(safaricom),
            africastalking_percentage: dec(africastalking),
        });
    }

    pub async fn seed_float(&self, name: &str, balance: &str) {
        self.inner
            .lock()
            .await
            .floats
            .insert(name.to_string(), dec(balance));
    }

    pub async fn status(&self, id: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .transactions
            .get(id)
            .map(|t| t.status.clone())
    }

    pub async fn float(&self, name: &str) -> BigDecimal {
        self.inner
            .lock()
            .await
            .floats
            .get(name)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0))
    }

    pub async fn float_movement_count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .await
            .float_movements
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    pub async fn sale_record(&self, id: &str) -> Option<SaleRecord> {
        self.inner.lock().await.sales.get(id).cloned()
    }

    pub async fn sale_count(&self) -> usize {
        self.inner.lock().await.sales.len()
    }

    pub async fn error_kinds(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .errors
            .iter()
            .map(|(kind, _, _, _)| kind.clone())
            .collect()
    }

    pub async fn reconciliation_kinds(&self, id: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .reconciliations
            .iter()
            .filter(|r| r.checkout_request_id == id)
            .map(|r| r.kind.clone())
            .collect()
    }

    pub async fn open_reversal_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .reconciliations
            .iter()
            .filter(|r| r.kind == "PENDING_REVERSAL" && r.resolved_at.is_none())
            .count()
    }

    pub async fn bonus_history(&self) -> Vec<(String, BigDecimal, BigDecimal, String)> {
        self.inner.lock().await.bonus_history.clone()
    }

    pub async fn transaction_record(&self, id: &str) -> Option<TransactionRecord> {
        self.inner.lock().await.transactions.get(id).cloned()
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn create_request(
        &self,
        request: &NewRequest,
        initial_status: &str,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        let now = chrono::Utc::now();
        inner.requests.insert(
            request.checkout_request_id.clone(),
            RequestRecord {
                checkout_request_id: request.checkout_request_id.clone(),
                payer_msisdn: request.payer_msisdn.clone(),
                destination_msisdn: request.destination_msisdn.clone(),
                carrier: request.carrier.clone(),
                amount: request.amount.clone(),
                payload: request.payload.clone(),
                created_at: now,
            },
        );
        inner.transactions.insert(
            request.checkout_request_id.clone(),
            TransactionRecord {
                checkout_request_id: request.checkout_request_id.clone(),
                status: initial_status.to_string(),
                payment_receipt: None,
                amount_received: None,
                fulfillment_status: None,
                provider_used: None,
                fallback_attempted: false,
                reconciliation_needed: false,
                created_at: now,
                last_updated: now,
            },
        );
        Ok(())
    }

    async fn request(&self, id: &str) -> Result<Option<RequestRecord>, DatabaseError> {
        Ok(self.inner.lock().await.requests.get(id).cloned())
    }

    async fn transaction(&self, id: &str) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self.inner.lock().await.transactions.get(id).cloned())
    }

    async fn transition(
        &self,
        id: &str,
        expected: &[&str],
        to: &str,
        patch: &TransactionPatch,
    ) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.lock().await;
        let Some(txn) = inner.transactions.get_mut(id) else {
            return Ok(false);
        };
        if !expected.contains(&txn.status.as_str()) {
            return Ok(false);
        }
        txn.status = to.to_string();
        if let Some(receipt) = &patch.payment_receipt {
            txn.payment_receipt = Some(receipt.clone());
        }
        if let Some(amount) = &patch.amount_received {
            txn.amount_received = Some(amount.clone());
        }
        if let Some(status) = &patch.fulfillment_status {
            txn.fulfillment_status = Some(status.clone());
        }
        if let Some(provider) = &patch.provider_used {
            txn.provider_used = Some(provider.clone());
        }
        if let Some(fallback) = patch.fallback_attempted {
            txn.fallback_attempted = fallback;
        }
        if let Some(needed) = patch.reconciliation_needed {
            txn.reconciliation_needed = needed;
        }
        txn.last_updated = chrono::Utc::now();
        Ok(true)
    }

    async fn create_sale(&self, sale: &NewSale) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        if inner.sales.contains_key(&sale.checkout_request_id) {
            return Ok(());
        }
        let now = chrono::Utc::now();
        inner.sales.insert(
            sale.checkout_request_id.clone(),
            SaleRecord {
                checkout_request_id: sale.checkout_request_id.clone(),
                original_amount: sale.original_amount.clone(),
                bonus: sale.bonus.clone(),
                dispatched_amount: sale.dispatched_amount.clone(),
                carrier: sale.carrier.clone(),
                provider_used: None,
                dispatch_result: None,
                bonus_percentage: sale.bonus_percentage.clone(),
                completed_at: None,
                created_at: now,
            },
        );
        Ok(())
    }

    async fn complete_sale(
        &self,
        id: &str,
        provider_used: &str,
        dispatch_result: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        if let Some(sale) = inner.sales.get_mut(id) {
            sale.provider_used = Some(provider_used.to_string());
            sale.dispatch_result = Some(dispatch_result.clone());
            sale.completed_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn sale(&self, id: &str) -> Result<Option<SaleRecord>, DatabaseError> {
        Ok(self.inner.lock().await.sales.get(id).cloned())
    }

    async fn adjust_float(
        &self,
        float_name: &str,
        delta: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError> {
        let mut inner = self.inner.lock().await;
        let current = inner
            .floats
            .get(float_name)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0));
        let new_balance = &current + delta;
        if new_balance < BigDecimal::from(0) {
            return Err(DatabaseError::InsufficientFloat {
                float_name: float_name.to_string(),
            });
        }
        inner
            .floats
            .insert(float_name.to_string(), new_balance.clone());
        inner
            .float_movements
            .push((float_name.to_string(), delta.clone()));
        Ok(new_balance)
    }

    async fn overwrite_float(
        &self,
        float_name: &str,
        balance: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError> {
        let mut inner = self.inner.lock().await;
        let previous = inner
            .floats
            .get(float_name)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0));
        inner.floats.insert(float_name.to_string(), balance.clone());
        Ok(previous)
    }

    async fn float_balance(&self, float_name: &str) -> Result<BigDecimal, DatabaseError> {
        Ok(self
            .inner
            .lock()
            .await
            .floats
            .get(float_name)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn record_error(
        &self,
        kind: &str,
        sub_kind: Option<&str>,
        id: Option<&str>,
        context: serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.inner.lock().await.errors.push((
            kind.to_string(),
            sub_kind.map(|s| s.to_string()),
            id.map(|s| s.to_string()),
            context,
        ));
        Ok(())
    }

    async fn create_pending_reversal(
        &self,
        pending: &NewPendingReversal,
    ) -> Result<(), DatabaseError> {
        self.inner
            .lock()
            .await
            .reconciliations
            .push(ReconciliationRecord {
                id: Uuid::new_v4(),
                kind: "PENDING_REVERSAL".to_string(),
                checkout_request_id: pending.checkout_request_id.clone(),
                original_amount: pending.original_amount.clone(),
                payer_msisdn: pending.payer_msisdn.clone(),
                detail: pending.request_data.clone(),
                originator_conversation_id: pending.originator_conversation_id.clone(),
                created_at: chrono::Utc::now(),
                resolved_at: None,
            });
        Ok(())
    }

    async fn record_failed_reversal(
        &self,
        id: &str,
        reason: &str,
        original_amount: &BigDecimal,
    ) -> Result<(), DatabaseError> {
        self.inner
            .lock()
            .await
            .reconciliations
            .push(ReconciliationRecord {
                id: Uuid::new_v4(),
                kind: "FAILED_RECONCILIATION".to_string(),
                checkout_request_id: id.to_string(),
                original_amount: original_amount.clone(),
                payer_msisdn: None,
                detail: serde_json::json!({ "reason": reason }),
                originator_conversation_id: None,
                created_at: chrono::Utc::now(),
                resolved_at: None,
            });
        Ok(())
    }

    async fn open_reversal_by_originator(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<ReconciliationRecord>, DatabaseError> {
        Ok(self
            .inner
            .lock()
            .await
            .reconciliations
            .iter()
            .find(|r| {
                r.kind == "PENDING_REVERSAL"
                    && r.resolved_at.is_none()
                    && r.originator_conversation_id.as_deref()
                        == Some(originator_conversation_id)
            })
            .cloned())
    }

    async fn resolve_reversal(&self, id: &str) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        for record in inner.reconciliations.iter_mut() {
            if record.kind == "PENDING_REVERSAL"
                && record.checkout_request_id == id
                && record.resolved_at.is_none()
            {
                record.resolved_at = Some(chrono::Utc::now());
            }
        }
        Ok(())
    }

    async fn bonus_settings(&self) -> Result<BonusSettings, DatabaseError> {
        Ok(self
            .inner
            .lock()
            .await
            .settings
            .clone()
            .unwrap_or_else(BonusSettings::zero))
    }

    async fn update_bonus_settings(
        &self,
        settings: &BonusSettings,
        actor: &str,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        let current = inner.settings.clone().unwrap_or_else(BonusSettings::zero);
        if current.safaricom_percentage != settings.safaricom_percentage {
            inner.bonus_history.push((
                "safaricom".to_string(),
                current.safaricom_percentage.clone(),
                settings.safaricom_percentage.clone(),
                actor.to_string(),
            ));
        }
        if current.africastalking_percentage != settings.africastalking_percentage {
            inner.bonus_history.push((
                "africastalking".to_string(),
                current.africastalking_percentage.clone(),
                settings.africastalking_percentage.clone(),
                actor.to_string(),
            ));
        }
        inner.settings = Some(settings.clone());
        Ok(())
    }

    async fn dealer_service_pin(&self) -> Result<String, DatabaseError> {
        self.inner
            .lock()
            .await
            .service_pin
            .clone()
            .ok_or(DatabaseError::NotFound {
                entity: "dealer_config".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Scripted payment rail
// ---------------------------------------------------------------------------

pub struct MockRail {
    pub push_calls: AtomicUsize,
    pub reverse_calls: AtomicUsize,
    next_id: AtomicUsize,
    fail_reversals: AtomicBool,
}

impl MockRail {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            push_calls: AtomicUsize::new(0),
            reverse_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            fail_reversals: AtomicBool::new(false),
        })
    }

    pub fn fail_reversals(&self) {
        self.fail_reversals.store(true, Ordering::SeqCst);
    }

    pub fn originator_for(checkout_request_id: &str) -> String {
        format!("AG_{checkout_request_id}")
    }
}

#[async_trait]
impl PaymentRail for MockRail {
    async fn stk_push(
        &self,
        _payer_msisdn: &str,
        _amount: i64,
        _account_reference: &str,
    ) -> PaymentResult<PushAccepted> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(PushAccepted {
            checkout_request_id: format!("ws_CO_{n}"),
            merchant_request_id: format!("29115-{n}-1"),
            customer_message: Some("Success. Request accepted for processing".to_string()),
        })
    }

    async fn reverse(
        &self,
        _receipt: &str,
        _amount: i64,
        checkout_request_id: &str,
    ) -> PaymentResult<ReversalAccepted> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reversals.load(Ordering::SeqCst) {
            return Err(PaymentError::RailRejected {
                operation: RailOperation::Reversal,
                code: "2001".to_string(),
                description: "The initiator is not allowed to initiate this request".to_string(),
            });
        }
        Ok(ReversalAccepted {
            originator_conversation_id: Self::originator_for(checkout_request_id),
            conversation_id: format!("AG_conv_{checkout_request_id}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted airtime providers
// ---------------------------------------------------------------------------

pub struct MockProvider {
    name: &'static str,
    outcomes: Mutex<VecDeque<DispatchResult<DispatchReceipt>>>,
    pub calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub async fn push_success(&self, provider_ref: &str, new_float_balance: Option<&str>) {
        self.outcomes.lock().await.push_back(Ok(DispatchReceipt {
            provider_ref: Some(provider_ref.to_string()),
            new_float_balance: new_float_balance.map(dec),
            raw: serde_json::json!({ "scripted": true, "ref": provider_ref }),
        }));
    }

    pub async fn push_failure(&self, message: &str) {
        self.outcomes
            .lock()
            .await
            .push_back(Err(DispatchError::Provider {
                provider: self.name.to_string(),
                message: message.to_string(),
                raw: Some(serde_json::json!({ "responseStatus": "500" })),
            }));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AirtimeProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn dispatch(&self, _request: &DispatchRequest) -> DispatchResult<DispatchReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Err(DispatchError::Provider {
                    provider: self.name.to_string(),
                    message: "no scripted outcome".to_string(),
                    raw: None,
                })
            })
    }
}

// ---------------------------------------------------------------------------
// Engine assembly and callback builders
// ---------------------------------------------------------------------------

pub fn engine_with(
    store: Arc<MemoryStore>,
    rail: Arc<MockRail>,
    dealer: Arc<MockProvider>,
    aggregator: Arc<MockProvider>,
) -> LifecycleEngine {
    let store_dyn: Arc<dyn GatewayStore> = store;
    let dispatcher = AirtimeDispatcher::new(dealer, aggregator, store_dyn.clone());
    let bonus = BonusEngine::new(store_dyn.clone());
    LifecycleEngine::new(store_dyn, rail, dispatcher, bonus, None)
}

pub fn success_callback(checkout_request_id: &str, amount: i64, receipt: &str) -> StkCallback {
    StkCallback {
        merchant_request_id: "29115-1-1".to_string(),
        checkout_request_id: checkout_request_id.to_string(),
        result_code: 0,
        result_desc: "The service request is processed successfully.".to_string(),
        callback_metadata: Some(CallbackMetadata {
            items: vec![
                CallbackItem {
                    name: "Amount".to_string(),
                    value: serde_json::json!(amount),
                },
                CallbackItem {
                    name: "MpesaReceiptNumber".to_string(),
                    value: serde_json::json!(receipt),
                },
                CallbackItem {
                    name: "PhoneNumber".to_string(),
                    value: serde_json::json!(254700000001_i64),
                },
            ],
        }),
    }
}

pub fn failed_callback(checkout_request_id: &str, result_code: i64) -> StkCallback {
    StkCallback {
        merchant_request_id: "29115-1-1".to_string(),
        checkout_request_id: checkout_request_id.to_string(),
        result_code,
        result_desc: "Request cancelled by user".to_string(),
        callback_metadata: None,
    }
}
