//! Integration tests for the suspend / restore cycle
//!
//! Drives `EnforcementEngine` end to end over the in-memory store and
//! emulated routers.
//!
//! ## Test Coverage
//! - Grace period boundary and the global disable switch
//! - Idempotent blocking on repeated runs
//! - Per-customer failure isolation
//! - Full suspend, pay, restore cycle
//! - Manual triggers queueing behind a running check
//!
//! ## Running Tests
//! ```bash
//! cargo test -p netbill-billing --test enforcement_flow
//! ```

#![allow(clippy::unwrap_used)]

mod common;

use common::{Harness, ROUTER_HOST};
use netbill_billing::{DeviceFault, EnforcementConfig, NetworkIdentity, SuspensionOutcome};
use netbill_shared::{CustomerStatus, EnforcementMethod};

// ============================================================================
// Suspension
// ============================================================================

#[tokio::test]
async fn test_grace_period_boundary() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let due_today = h.customer(router, "10.0.0.10").await;
    let one_short = h.customer(router, "10.0.0.11").await;
    h.overdue_invoice(due_today, 7, 150_000).await;
    h.overdue_invoice(one_short, 6, 150_000).await;

    let report = h.engine.run_suspension_check().await;

    assert_eq!(report.checked, 1);
    assert_eq!(report.suspended, 1);
    assert_eq!(h.status(due_today).await, CustomerStatus::Suspended);
    assert_eq!(h.status(one_short).await, CustomerStatus::Active);
}

#[tokio::test]
async fn test_disabled_switch_touches_nothing() {
    let h = Harness::with_config(EnforcementConfig {
        auto_suspension_enabled: false,
        ..Default::default()
    });
    let router = h.router(ROUTER_HOST).await;
    let id = h.customer(router, "10.0.0.10").await;
    h.overdue_invoice(id, 30, 150_000).await;

    let report = h.engine.run_suspension_check().await;

    assert!(report.disabled);
    assert_eq!(report.checked, 0);
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(h.status(id).await, CustomerStatus::Active);
}

#[tokio::test]
async fn test_repeated_runs_leave_one_block() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let id = h.customer(router, "10.0.0.5").await;
    h.overdue_invoice(id, 10, 150_000).await;

    h.engine.run_suspension_check().await;
    // Operator flips the status back by hand while the block is still on the router
    h.store
        .insert_customer({
            let mut c = h.store.customer(id).await.unwrap();
            c.status = CustomerStatus::Active;
            c
        })
        .await;
    let second = h.engine.run_suspension_check().await;

    assert_eq!(second.suspended, 1);
    assert_eq!(h.blocked_entries(ROUTER_HOST, "10.0.0.5").await, 1);
    assert_eq!(h.status(id).await, CustomerStatus::Suspended);
}

#[tokio::test]
async fn test_one_failing_router_does_not_stop_the_batch() {
    let h = Harness::new();
    let healthy = h.router(ROUTER_HOST).await;
    let stuck = h.router("192.168.77.1").await;
    let first = h.customer(healthy, "10.0.0.1").await;
    let second = h.customer(stuck, "10.0.0.2").await;
    let third = h.customer(healthy, "10.0.0.3").await;
    h.overdue_invoice(first, 12, 100_000).await;
    h.overdue_invoice(second, 11, 100_000).await;
    h.overdue_invoice(third, 10, 100_000).await;
    h.connector
        .inject_fault("192.168.77.1", DeviceFault::CommandTimeout)
        .await;

    let report = h.engine.run_suspension_check().await;

    assert_eq!(report.checked, 3);
    assert_eq!(report.suspended, 2);
    assert_eq!(report.errors, 1);
    let failed = report
        .details
        .iter()
        .find(|d| d.outcome == SuspensionOutcome::Failed)
        .unwrap();
    assert_eq!(failed.customer_id, second);
    // Timeout is a connectivity error, so no further strategy was tried
    assert_eq!(failed.strategies, vec![EnforcementMethod::AddressList]);
    assert_eq!(h.status(first).await, CustomerStatus::Suspended);
    assert_eq!(h.status(second).await, CustomerStatus::Active);
    assert_eq!(h.status(third).await, CustomerStatus::Suspended);
}

#[tokio::test]
async fn test_store_outage_is_reported_not_raised() {
    let h = Harness::new();
    h.store.set_unavailable(true);

    let report = h.engine.run_suspension_check().await;

    assert!(report.aborted.is_some());
    assert_eq!(report.checked, 0);

    h.store.set_unavailable(false);
    assert!(h.engine.run_suspension_check().await.aborted.is_none());
}

// ============================================================================
// Suspend, pay, restore
// ============================================================================

#[tokio::test]
async fn test_suspend_then_restore_after_payment() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let id = h.customer(router, "10.0.0.5").await;
    let invoice = h.overdue_invoice(id, 9, 150_000).await;

    let suspended = h.engine.run_suspension_check().await;
    assert_eq!(suspended.suspended, 1);
    assert_eq!(h.blocked_entries(ROUTER_HOST, "10.0.0.5").await, 1);

    // Nothing to restore while the invoice is open
    let early = h.engine.run_restoration_check().await;
    assert_eq!(early.restored, 0);
    assert_eq!(h.status(id).await, CustomerStatus::Suspended);

    h.store.mark_invoice_paid(invoice).await;
    let restored = h.engine.run_restoration_check().await;

    assert_eq!(restored.restored, 1);
    assert_eq!(h.status(id).await, CustomerStatus::Active);
    assert_eq!(h.blocked_entries(ROUTER_HOST, "10.0.0.5").await, 0);

    let identity = NetworkIdentity {
        ip: Some("10.0.0.5".parse().unwrap()),
        ..Default::default()
    };
    assert!(!h.any_block_active(ROUTER_HOST, &identity).await);
}

#[tokio::test]
async fn test_restore_clears_blocks_from_every_method() {
    let h = Harness::with_config(EnforcementConfig {
        suspension_method: EnforcementMethod::Bandwidth,
        ..Default::default()
    });
    let router = h.router(ROUTER_HOST).await;
    let id = h.customer(router, "10.0.0.8").await;
    let invoice = h.overdue_invoice(id, 20, 150_000).await;

    h.engine.run_suspension_check().await;
    let identity = NetworkIdentity {
        ip: Some("10.0.0.8".parse().unwrap()),
        ..Default::default()
    };
    assert!(h.any_block_active(ROUTER_HOST, &identity).await);

    h.store.mark_invoice_paid(invoice).await;
    let report = h.engine.run_restoration_check().await;

    assert_eq!(report.restored, 1);
    assert_eq!(report.details[0].reverted, vec![EnforcementMethod::Bandwidth]);
    assert!(!h.any_block_active(ROUTER_HOST, &identity).await);
}

#[tokio::test]
async fn test_notifications_follow_the_cycle() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let id = h.customer(router, "10.0.0.5").await;
    let invoice = h.overdue_invoice(id, 9, 150_000).await;
    h.notifier.set_failing(true);

    h.engine.run_suspension_check().await;
    h.store.mark_invoice_paid(invoice).await;
    h.engine.run_restoration_check().await;

    // Delivery failures never change outcomes
    assert_eq!(h.status(id).await, CustomerStatus::Active);
    assert_eq!(h.notifier.events().await.len(), 2);
}

// ============================================================================
// Triggers
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_triggers_run_one_after_another() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    for n in 1..=5 {
        let id = h.customer(router, &format!("10.0.1.{}", n)).await;
        h.overdue_invoice(id, 14, 150_000).await;
    }

    let (a, b) = tokio::join!(
        {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.run_suspension_check().await })
        },
        {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.run_suspension_check().await })
        }
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // The second run only sees what the first left behind
    assert_eq!(a.suspended + b.suspended, 5);
    assert_eq!(a.checked + b.checked, 5);
    for n in 1..=5 {
        assert_eq!(
            h.blocked_entries(ROUTER_HOST, &format!("10.0.1.{}", n)).await,
            1
        );
    }
}

#[tokio::test]
async fn test_shutdown_stops_new_work() {
    let h = Harness::new();
    let router = h.router(ROUTER_HOST).await;
    let id = h.customer(router, "10.0.0.5").await;
    h.overdue_invoice(id, 9, 150_000).await;

    h.trigger.trigger();
    let report = h.engine.run_suspension_check().await;

    assert_eq!(report.checked, 0);
    assert_eq!(h.status(id).await, CustomerStatus::Active);
}
