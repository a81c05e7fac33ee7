//! End-to-end lifecycle scenarios against the in-memory store and scripted
//! rail/providers.

mod common;

use airtime_gateway::payments::types::ReversalResult;
use airtime_gateway::services::dispatch::{AFRICASTALKING_FLOAT, SAFARICOM_FLOAT};
use airtime_gateway::services::lifecycle::InitiationRequest;
use common::*;

fn initiation(phone: &str, amount: i64, recipient: &str) -> InitiationRequest {
    InitiationRequest {
        phone_number: phone.to_string(),
        amount,
        recipient: recipient.to_string(),
    }
}

fn reversal_result(checkout_request_id: &str, result_code: i64) -> ReversalResult {
    ReversalResult {
        result_type: 0,
        result_code,
        result_desc: if result_code == 0 {
            "The service request is processed successfully.".to_string()
        } else {
            "Reversal failed".to_string()
        },
        originator_conversation_id: MockRail::originator_for(checkout_request_id),
        conversation_id: format!("AG_conv_{checkout_request_id}"),
        transaction_id: Some("REV123".to_string()),
    }
}

#[tokio::test]
async fn home_telco_happy_path() {
    let store = MemoryStore::new();
    store.set_bonus_percentages("5", "2").await;
    store.seed_float(SAFARICOM_FLOAT, "10000").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    dealer
        .push_success("R250101.0001.000001", Some("4900.00"))
        .await;
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let accepted = engine
        .handle_initiation(initiation("254700000001", 100, "0712345678"))
        .await
        .expect("initiation should succeed");
    let id = accepted.checkout_request_id.clone();
    assert_eq!(store.status(&id).await.as_deref(), Some("PUSH_INITIATED"));

    engine
        .handle_payment_callback(success_callback(&id, 100, "QK123"))
        .await
        .expect("callback handling should succeed");

    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("COMPLETED_AND_FULFILLED")
    );

    let sale = store.sale_record(&id).await.expect("sale must exist");
    assert_eq!(sale.original_amount, dec("100"));
    assert_eq!(sale.bonus, dec("5.00"));
    assert_eq!(sale.dispatched_amount, dec("105.00"));
    assert_eq!(sale.provider_used.as_deref(), Some("dealer-direct"));
    assert!(sale.completed_at.is_some());

    // The dealer-reported balance is authoritative.
    assert_eq!(store.float(SAFARICOM_FLOAT).await, dec("4900.00"));

    let txn = store.transaction_record(&id).await.unwrap();
    assert_eq!(txn.payment_receipt.as_deref(), Some("QK123"));
    assert!(!txn.fallback_attempted);
    assert_eq!(aggregator.call_count(), 0);
}

#[tokio::test]
async fn home_telco_falls_back_to_aggregator() {
    let store = MemoryStore::new();
    store.set_bonus_percentages("5", "2").await;
    store.seed_float(SAFARICOM_FLOAT, "1000").await;
    store.seed_float(AFRICASTALKING_FLOAT, "500").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    dealer.push_failure("responseStatus 500").await;
    aggregator.push_success("ATQid_1", None).await;
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0712345678"))
        .await
        .unwrap()
        .checkout_request_id;
    engine
        .handle_payment_callback(success_callback(&id, 100, "QK124"))
        .await
        .unwrap();

    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("COMPLETED_AND_FULFILLED")
    );

    // Home float was debited then credited back in full.
    assert_eq!(store.float(SAFARICOM_FLOAT).await, dec("1000"));
    // Aggregator float: -dispatched + 4% commission on the original amount.
    assert_eq!(store.float(AFRICASTALKING_FLOAT).await, dec("399.00"));

    let sale = store.sale_record(&id).await.unwrap();
    assert_eq!(sale.provider_used.as_deref(), Some("aggregator-fallback"));
    let txn = store.transaction_record(&id).await.unwrap();
    assert!(txn.fallback_attempted);
    assert_eq!(dealer.call_count(), 1);
    assert_eq!(aggregator.call_count(), 1);

    // The failed dealer attempt is journaled.
    assert!(store
        .error_kinds()
        .await
        .contains(&"AIRTIME_FULFILLMENT_ERROR".to_string()));
}

#[tokio::test]
async fn full_dispatch_failure_triggers_reversal_and_confirmation_closes_it() {
    let store = MemoryStore::new();
    store.set_bonus_percentages("5", "2").await;
    store.seed_float(SAFARICOM_FLOAT, "1000").await;
    store.seed_float(AFRICASTALKING_FLOAT, "500").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    dealer.push_failure("responseStatus 500").await;
    aggregator.push_failure("Insufficient credit").await;
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0712345678"))
        .await
        .unwrap()
        .checkout_request_id;
    engine
        .handle_payment_callback(success_callback(&id, 100, "QK125"))
        .await
        .unwrap();

    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("REVERSAL_PENDING_CONFIRMATION")
    );
    assert_eq!(rail.reverse_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Net float change is zero after a fully failed dispatch.
    assert_eq!(store.float(SAFARICOM_FLOAT).await, dec("1000"));
    assert_eq!(store.float(AFRICASTALKING_FLOAT).await, dec("500"));
    assert_eq!(
        store.reconciliation_kinds(&id).await,
        vec!["PENDING_REVERSAL".to_string()]
    );

    engine
        .handle_reversal_result(reversal_result(&id, 0))
        .await
        .unwrap();
    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("REVERSED_SUCCESSFULLY")
    );
    assert_eq!(store.open_reversal_count().await, 0);
}

#[tokio::test]
async fn rejected_reversal_submission_is_recorded() {
    let store = MemoryStore::new();
    store.seed_float(AFRICASTALKING_FLOAT, "500").await;
    let rail = MockRail::new();
    rail.fail_reversals();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    aggregator.push_failure("Insufficient credit").await;
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0733345678"))
        .await
        .unwrap()
        .checkout_request_id;
    engine
        .handle_payment_callback(success_callback(&id, 100, "QK126"))
        .await
        .unwrap();

    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("REVERSAL_INITIATION_FAILED")
    );
    assert_eq!(
        store.reconciliation_kinds(&id).await,
        vec!["FAILED_RECONCILIATION".to_string()]
    );
    let txn = store.transaction_record(&id).await.unwrap();
    assert!(txn.reconciliation_needed);
}

#[tokio::test]
async fn failed_reversal_confirmation_needs_manual_reconciliation() {
    let store = MemoryStore::new();
    store.seed_float(AFRICASTALKING_FLOAT, "500").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    aggregator.push_failure("Insufficient credit").await;
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0733345678"))
        .await
        .unwrap()
        .checkout_request_id;
    engine
        .handle_payment_callback(success_callback(&id, 100, "QK127"))
        .await
        .unwrap();
    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("REVERSAL_PENDING_CONFIRMATION")
    );

    engine
        .handle_reversal_result(reversal_result(&id, 1))
        .await
        .unwrap();
    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("REVERSAL_FAILED_CONFIRMATION")
    );
    assert!(store
        .reconciliation_kinds(&id)
        .await
        .contains(&"FAILED_RECONCILIATION".to_string()));
}

#[tokio::test]
async fn reversal_timeout_is_terminal() {
    let store = MemoryStore::new();
    store.seed_float(AFRICASTALKING_FLOAT, "500").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    aggregator.push_failure("Insufficient credit").await;
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0733345678"))
        .await
        .unwrap()
        .checkout_request_id;
    engine
        .handle_payment_callback(success_callback(&id, 100, "QK128"))
        .await
        .unwrap();

    engine
        .handle_reversal_timeout(&MockRail::originator_for(&id))
        .await
        .unwrap();
    assert_eq!(store.status(&id).await.as_deref(), Some("REVERSAL_TIMED_OUT"));
    assert!(store
        .reconciliation_kinds(&id)
        .await
        .contains(&"FAILED_RECONCILIATION".to_string()));
}

#[tokio::test]
async fn amount_out_of_range_is_rejected_before_the_rail() {
    let store = MemoryStore::new();
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    let engine = engine_with(store.clone(), rail.clone(), dealer, aggregator);

    for amount in [3, 4, 5001] {
        let err = engine
            .handle_initiation(initiation("254700000001", amount, "0712345678"))
            .await
            .expect_err("out-of-range amount must be rejected");
        assert_eq!(err.status_code(), 400);
    }
    assert_eq!(rail.push_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // Boundaries are inclusive.
    for amount in [5, 5000] {
        engine
            .handle_initiation(initiation("254700000001", amount, "0712345678"))
            .await
            .expect("boundary amounts must be accepted");
    }
    assert_eq!(rail.push_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unsupported_carrier_fails_initiation() {
    let store = MemoryStore::new();
    let rail = MockRail::new();
    let engine = engine_with(
        store.clone(),
        rail.clone(),
        MockProvider::new("dealer-direct"),
        MockProvider::new("aggregator"),
    );

    let err = engine
        .handle_initiation(initiation("254700000001", 100, "0744345678"))
        .await
        .expect_err("unallocated prefix must be rejected");
    assert_eq!(err.status_code(), 400);
    assert_eq!(rail.push_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_payment_is_terminal_without_float_movement() {
    let store = MemoryStore::new();
    store.seed_float(SAFARICOM_FLOAT, "1000").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0712345678"))
        .await
        .unwrap()
        .checkout_request_id;
    engine
        .handle_payment_callback(failed_callback(&id, 1032))
        .await
        .unwrap();

    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("MPESA_PAYMENT_FAILED")
    );
    assert_eq!(store.sale_count().await, 0);
    assert_eq!(store.float_movement_count(SAFARICOM_FLOAT).await, 0);
    assert_eq!(dealer.call_count(), 0);
    assert!(store
        .error_kinds()
        .await
        .contains(&"STK_PAYMENT_ERROR".to_string()));

    // Duplicate failure callback is absorbed.
    engine
        .handle_payment_callback(failed_callback(&id, 1032))
        .await
        .unwrap();
    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("MPESA_PAYMENT_FAILED")
    );
}

#[tokio::test]
async fn duplicate_success_callback_produces_one_sale_and_one_debit() {
    let store = MemoryStore::new();
    store.set_bonus_percentages("5", "2").await;
    store.seed_float(SAFARICOM_FLOAT, "10000").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    dealer.push_success("R250101.0001.000002", None).await;
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0712345678"))
        .await
        .unwrap()
        .checkout_request_id;

    engine
        .handle_payment_callback(success_callback(&id, 100, "QK129"))
        .await
        .unwrap();
    engine
        .handle_payment_callback(success_callback(&id, 100, "QK129"))
        .await
        .unwrap();

    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("COMPLETED_AND_FULFILLED")
    );
    assert_eq!(store.sale_count().await, 1);
    assert_eq!(dealer.call_count(), 1);
    // Exactly one debit; no credit-back ever happened.
    assert_eq!(store.float_movement_count(SAFARICOM_FLOAT).await, 1);
    assert_eq!(store.float(SAFARICOM_FLOAT).await, dec("9895.00"));
}

#[tokio::test]
async fn non_home_carrier_dispatches_via_aggregator_only() {
    let store = MemoryStore::new();
    store.set_bonus_percentages("5", "2").await;
    store.seed_float(AFRICASTALKING_FLOAT, "200").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    aggregator.push_success("ATQid_2", None).await;
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0733345678"))
        .await
        .unwrap()
        .checkout_request_id;
    engine
        .handle_payment_callback(success_callback(&id, 100, "QK130"))
        .await
        .unwrap();

    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("COMPLETED_AND_FULFILLED")
    );
    let sale = store.sale_record(&id).await.unwrap();
    // 2% of 100 rounds half-up to a whole 2 shillings for non-home telcos.
    assert_eq!(sale.bonus, dec("2"));
    assert_eq!(sale.dispatched_amount, dec("102"));
    assert_eq!(sale.provider_used.as_deref(), Some("aggregator"));
    assert_eq!(dealer.call_count(), 0);
    // 200 - 102 + 4.00 commission.
    assert_eq!(store.float(AFRICASTALKING_FLOAT).await, dec("102.00"));
}

#[tokio::test]
async fn insufficient_float_fails_dispatch_and_reverses_payment() {
    let store = MemoryStore::new();
    store.set_bonus_percentages("5", "2").await;
    store.seed_float(SAFARICOM_FLOAT, "50").await;
    let rail = MockRail::new();
    let dealer = MockProvider::new("dealer-direct");
    let aggregator = MockProvider::new("aggregator");
    let engine = engine_with(store.clone(), rail.clone(), dealer.clone(), aggregator.clone());

    let id = engine
        .handle_initiation(initiation("254700000001", 100, "0712345678"))
        .await
        .unwrap()
        .checkout_request_id;
    engine
        .handle_payment_callback(success_callback(&id, 100, "QK131"))
        .await
        .unwrap();

    assert_eq!(
        store.status(&id).await.as_deref(),
        Some("REVERSAL_PENDING_CONFIRMATION")
    );
    // Balance never moved and never went negative.
    assert_eq!(store.float(SAFARICOM_FLOAT).await, dec("50"));
    assert_eq!(dealer.call_count(), 0);
    assert_eq!(rail.reverse_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bonus_settings_update_appends_history_for_changed_values() {
    use airtime_gateway::database::records::BonusSettings;
    use airtime_gateway::database::store::GatewayStore;

    let store = MemoryStore::new();
    store.set_bonus_percentages("5", "2").await;

    let settings = BonusSettings {
        safaricom_percentage: dec("6"),
        africastalking_percentage: dec("2"),
    };
    store
        .update_bonus_settings(&settings, "ops@example.com")
        .await
        .unwrap();

    let history = store.bonus_history().await;
    assert_eq!(history.len(), 1);
    let (telco, old, new, actor) = &history[0];
    assert_eq!(telco, "safaricom");
    assert_eq!(old, &dec("5"));
    assert_eq!(new, &dec("6"));
    assert_eq!(actor, "ops@example.com");
}
