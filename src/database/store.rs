//! The storage seam the lifecycle engine runs against.
//!
//! Production wires [`PgStore`]; the integration tests substitute an
//! in-memory implementation so state-machine behavior can be exercised
//! without a database.

use crate::database::error::DatabaseError;
use crate::database::error_log::ErrorLogRepository;
use crate::database::floats::FloatRepository;
use crate::database::reconciliation::ReconciliationRepository;
use crate::database::records::{
    BonusSettings, NewPendingReversal, NewRequest, NewSale, ReconciliationRecord, RequestRecord,
    SaleRecord, TransactionPatch, TransactionRecord,
};
use crate::database::settings::SettingsRepository;
use crate::database::transactions::TransactionRepository;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

#[async_trait]
pub trait GatewayStore: Send + Sync {
    // -- requests / transactions / sales ---------------------------------

    async fn create_request(
        &self,
        request: &NewRequest,
        initial_status: &str,
    ) -> Result<(), DatabaseError>;

    async fn request(&self, id: &str) -> Result<Option<RequestRecord>, DatabaseError>;

    async fn transaction(&self, id: &str) -> Result<Option<TransactionRecord>, DatabaseError>;

    /// Compare-and-swap status transition; `true` when this caller won.
    async fn transition(
        &self,
        id: &str,
        expected: &[&str],
        to: &str,
        patch: &TransactionPatch,
    ) -> Result<bool, DatabaseError>;

    async fn create_sale(&self, sale: &NewSale) -> Result<(), DatabaseError>;

    async fn complete_sale(
        &self,
        id: &str,
        provider_used: &str,
        dispatch_result: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    async fn sale(&self, id: &str) -> Result<Option<SaleRecord>, DatabaseError>;

    // -- float ledger ----------------------------------------------------

    async fn adjust_float(
        &self,
        float_name: &str,
        delta: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError>;

    /// Overwrite with an authoritative balance; returns the previous value.
    async fn overwrite_float(
        &self,
        float_name: &str,
        balance: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError>;

    async fn float_balance(&self, float_name: &str) -> Result<BigDecimal, DatabaseError>;

    // -- error journal ---------------------------------------------------

    async fn record_error(
        &self,
        kind: &str,
        sub_kind: Option<&str>,
        id: Option<&str>,
        context: serde_json::Value,
    ) -> Result<(), DatabaseError>;

    // -- reversal bookkeeping --------------------------------------------

    async fn create_pending_reversal(
        &self,
        pending: &NewPendingReversal,
    ) -> Result<(), DatabaseError>;

    async fn record_failed_reversal(
        &self,
        id: &str,
        reason: &str,
        original_amount: &BigDecimal,
    ) -> Result<(), DatabaseError>;

    async fn open_reversal_by_originator(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<ReconciliationRecord>, DatabaseError>;

    async fn resolve_reversal(&self, id: &str) -> Result<(), DatabaseError>;

    // -- settings --------------------------------------------------------

    async fn bonus_settings(&self) -> Result<BonusSettings, DatabaseError>;

    async fn update_bonus_settings(
        &self,
        settings: &BonusSettings,
        actor: &str,
    ) -> Result<(), DatabaseError>;

    async fn dealer_service_pin(&self) -> Result<String, DatabaseError>;
}

/// Postgres-backed store aggregating the per-collection repositories.
pub struct PgStore {
    transactions: TransactionRepository,
    floats: FloatRepository,
    reconciliations: ReconciliationRepository,
    errors: ErrorLogRepository,
    settings: SettingsRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            transactions: TransactionRepository::new(pool.clone()),
            floats: FloatRepository::new(pool.clone()),
            reconciliations: ReconciliationRepository::new(pool.clone()),
            errors: ErrorLogRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool),
        }
    }
}

#[async_trait]
impl GatewayStore for PgStore {
    async fn create_request(
        &self,
        request: &NewRequest,
        initial_status: &str,
    ) -> Result<(), DatabaseError> {
        self.transactions.create_request(request, initial_status).await
    }

    async fn request(&self, id: &str) -> Result<Option<RequestRecord>, DatabaseError> {
        self.transactions.find_request(id).await
    }

    async fn transaction(&self, id: &str) -> Result<Option<TransactionRecord>, DatabaseError> {
        self.transactions.find_transaction(id).await
    }

    async fn transition(
        &self,
        id: &str,
        expected: &[&str],
        to: &str,
        patch: &TransactionPatch,
    ) -> Result<bool, DatabaseError> {
        self.transactions.transition(id, expected, to, patch).await
    }

    async fn create_sale(&self, sale: &NewSale) -> Result<(), DatabaseError> {
        self.transactions.create_sale(sale).await
    }

    async fn complete_sale(
        &self,
        id: &str,
        provider_used: &str,
        dispatch_result: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.transactions
            .complete_sale(id, provider_used, dispatch_result)
            .await
    }

    async fn sale(&self, id: &str) -> Result<Option<SaleRecord>, DatabaseError> {
        self.transactions.find_sale(id).await
    }

    async fn adjust_float(
        &self,
        float_name: &str,
        delta: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError> {
        self.floats.adjust(float_name, delta).await
    }

    async fn overwrite_float(
        &self,
        float_name: &str,
        balance: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError> {
        self.floats.overwrite(float_name, balance).await
    }

    async fn float_balance(&self, float_name: &str) -> Result<BigDecimal, DatabaseError> {
        self.floats.balance(float_name).await
    }

    async fn record_error(
        &self,
        kind: &str,
        sub_kind: Option<&str>,
        id: Option<&str>,
        context: serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.errors.record(kind, sub_kind, id, context).await
    }

    async fn create_pending_reversal(
        &self,
        pending: &NewPendingReversal,
    ) -> Result<(), DatabaseError> {
        self.reconciliations.create_pending(pending).await
    }

    async fn record_failed_reversal(
        &self,
        id: &str,
        reason: &str,
        original_amount: &BigDecimal,
    ) -> Result<(), DatabaseError> {
        self.reconciliations
            .create_failed(id, reason, original_amount)
            .await
    }

    async fn open_reversal_by_originator(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<ReconciliationRecord>, DatabaseError> {
        self.reconciliations
            .find_open_by_originator(originator_conversation_id)
            .await
    }

    async fn resolve_reversal(&self, id: &str) -> Result<(), DatabaseError> {
        self.reconciliations.resolve_pending(id).await
    }

    async fn bonus_settings(&self) -> Result<BonusSettings, DatabaseError> {
        self.settings.bonus_settings().await
    }

    async fn update_bonus_settings(
        &self,
        settings: &BonusSettings,
        actor: &str,
    ) -> Result<(), DatabaseError> {
        self.settings.update_bonus_settings(settings, actor).await
    }

    async fn dealer_service_pin(&self) -> Result<String, DatabaseError> {
        self.settings.dealer_service_pin().await
    }
}
