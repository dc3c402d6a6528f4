//! Integration tests for gateway reconciliation
//!
//! ## Test Coverage
//! - Paid transaction recorded once, with restoration of the paying customer
//! - Repeated polls and interrupted settlements
//! - Expired transactions
//! - HTTP gateway adapter behind the full engine
//!
//! ## Running Tests
//! ```bash
//! cargo test -p netbill-billing --test reconciliation
//! ```

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::{Harness, ROUTER_HOST};
use mockito::Matcher;
use netbill_billing::{
    EnforcementConfig, EnforcementEngine, GatewayConfig, GatewayStatus, HttpGatewayClient,
    NotificationEvent, ReconciliationOutcome, RecordingNotifier, Shutdown, StateStore,
};
use netbill_shared::{CustomerStatus, InvoiceStatus, NewPayment, TransactionStatus};
use time::OffsetDateTime;

// ============================================================================
// Paid transactions
// ============================================================================

#[tokio::test]
async fn test_paid_transaction_is_recorded_and_customer_restored() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let customer = h.customer(router, "10.0.0.5").await;
    let invoice = h.overdue_invoice(customer, 9, 50_000).await;
    let tx = h.pending_transaction(invoice, "TX123", 50_000).await;

    h.engine.run_suspension_check().await;
    assert_eq!(h.status(customer).await, CustomerStatus::Suspended);

    h.gateway.set_status("TX123", GatewayStatus::Paid, 50_000).await;
    let report = h.engine.run_payment_reconciliation().await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.paid_customer_ids, vec![customer]);

    let payments = h.store.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].invoice_id, invoice);
    assert_eq!(payments[0].amount, 50_000);
    assert_eq!(payments[0].reference_number, "TX123");

    assert_eq!(
        h.store.invoice(invoice).await.unwrap().status,
        InvoiceStatus::Paid
    );
    assert_eq!(
        h.store.transaction(tx).await.unwrap().status,
        TransactionStatus::Success
    );

    // Restored straight away, without waiting for the restoration tick
    assert_eq!(h.status(customer).await, CustomerStatus::Active);
    assert_eq!(h.blocked_entries(ROUTER_HOST, "10.0.0.5").await, 0);

    let payment_notices = h
        .notifier
        .events()
        .await
        .into_iter()
        .filter(|e| matches!(e, NotificationEvent::PaymentReceived { .. }))
        .count();
    assert_eq!(payment_notices, 1);
}

#[tokio::test]
async fn test_second_poll_records_nothing_new() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let customer = h.customer(router, "10.0.0.5").await;
    let invoice = h.overdue_invoice(customer, 1, 50_000).await;
    h.pending_transaction(invoice, "TX123", 50_000).await;
    h.gateway.set_status("TX123", GatewayStatus::Paid, 50_000).await;

    let first = h.engine.run_payment_reconciliation().await;
    let second = h.engine.run_payment_reconciliation().await;

    assert_eq!(first.processed, 1);
    assert_eq!(second.checked, 0);
    assert_eq!(h.store.payments().await.len(), 1);
    assert_eq!(h.notifier.events().await.len(), 1);
}

#[tokio::test]
async fn test_interrupted_settlement_heals_on_next_poll() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let customer = h.customer(router, "10.0.0.5").await;
    let invoice = h.overdue_invoice(customer, 1, 50_000).await;
    let tx = h.pending_transaction(invoice, "TX900", 50_000).await;
    h.gateway.set_status("TX900", GatewayStatus::Paid, 50_000).await;

    // Previous run died right after inserting the payment
    h.store
        .insert_payment_if_absent(&NewPayment {
            invoice_id: invoice,
            amount: 50_000,
            payment_method: "QRIS".to_string(),
            reference_number: "TX900".to_string(),
            payment_date: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    let report = h.engine.run_payment_reconciliation().await;

    assert_eq!(report.already_recorded, 1);
    assert_eq!(report.details[0].outcome, ReconciliationOutcome::AlreadyRecorded);
    assert_eq!(h.store.payments().await.len(), 1);
    assert_eq!(
        h.store.invoice(invoice).await.unwrap().status,
        InvoiceStatus::Paid
    );
    assert_eq!(
        h.store.transaction(tx).await.unwrap().status,
        TransactionStatus::Success
    );
    assert!(h.notifier.events().await.is_empty());
}

#[tokio::test]
async fn test_expired_transaction_is_closed() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let customer = h.customer(router, "10.0.0.5").await;
    let invoice = h.overdue_invoice(customer, 1, 50_000).await;
    let tx = h.pending_transaction(invoice, "TX-OLD", 50_000).await;
    h.gateway.set_status("TX-OLD", GatewayStatus::Expired, 0).await;

    let report = h.engine.run_payment_reconciliation().await;

    assert_eq!(report.expired, 1);
    assert_eq!(
        h.store.transaction(tx).await.unwrap().status,
        TransactionStatus::Failed
    );
    assert_eq!(
        h.store.invoice(invoice).await.unwrap().status,
        InvoiceStatus::Unpaid
    );
    assert!(h.store.payments().await.is_empty());
}

#[tokio::test]
async fn test_restore_on_payment_can_be_switched_off() {
    let h = Harness::with_config(EnforcementConfig {
        restore_on_payment: false,
        ..Default::default()
    });
    let router = h.router(ROUTER_HOST).await;
    let customer = h.customer(router, "10.0.0.5").await;
    let invoice = h.overdue_invoice(customer, 9, 50_000).await;
    h.pending_transaction(invoice, "TX123", 50_000).await;

    h.engine.run_suspension_check().await;
    h.gateway.set_status("TX123", GatewayStatus::Paid, 50_000).await;
    h.engine.run_payment_reconciliation().await;
    assert_eq!(h.status(customer).await, CustomerStatus::Suspended);

    h.engine.run_restoration_check().await;
    assert_eq!(h.status(customer).await, CustomerStatus::Active);
}

#[tokio::test]
async fn test_customer_with_other_debt_stays_suspended() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let customer = h.customer(router, "10.0.0.5").await;
    let older = h.overdue_invoice(customer, 40, 50_000).await;
    h.overdue_invoice(customer, 9, 50_000).await;
    h.pending_transaction(older, "TX-PART", 50_000).await;

    h.engine.run_suspension_check().await;
    h.gateway.set_status("TX-PART", GatewayStatus::Paid, 50_000).await;
    let report = h.engine.run_payment_reconciliation().await;

    assert_eq!(report.processed, 1);
    assert_eq!(h.status(customer).await, CustomerStatus::Suspended);
    assert_eq!(h.blocked_entries(ROUTER_HOST, "10.0.0.5").await, 1);
}

// ============================================================================
// HTTP gateway
// ============================================================================

#[tokio::test]
async fn test_http_gateway_behind_engine() {
    let mut server = mockito::Server::new_async().await;
    let paid_at = OffsetDateTime::now_utc().unix_timestamp();
    let mock = server
        .mock("GET", "/api/transaction/detail")
        .match_query(Matcher::UrlEncoded("reference".into(), "TX123".into()))
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"success":true,"message":"","data":{{"reference":"TX123","status":"PAID","amount":50000,"payment_method":"BRIVA","paid_at":{}}}}}"#,
            paid_at
        ))
        .create_async()
        .await;

    let config = EnforcementConfig {
        gateway: GatewayConfig {
            base_url: format!("{}/api", server.url()),
            api_key: "test-key".to_string(),
            ..EnforcementConfig::default().gateway
        },
        ..Default::default()
    };
    let h = Harness::with_config(config.clone());
    let router = h.router(ROUTER_HOST).await;
    let customer = h.customer(router, "10.0.0.5").await;
    let invoice = h.overdue_invoice(customer, 1, 50_000).await;
    h.pending_transaction(invoice, "TX123", 50_000).await;

    let engine = EnforcementEngine::new(
        config.clone(),
        h.store.clone(),
        h.connector.clone(),
        Arc::new(HttpGatewayClient::new(&config.gateway).unwrap()),
        Arc::new(RecordingNotifier::new()),
        Shutdown::never(),
    );
    let report = engine.run_payment_reconciliation().await;

    mock.assert_async().await;
    assert_eq!(report.processed, 1);
    let payments = h.store.payments().await;
    assert_eq!(payments[0].payment_method, "BRIVA");
    assert_eq!(payments[0].payment_date.unix_timestamp(), paid_at);
}
