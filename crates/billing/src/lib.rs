// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Engine wiring takes every port explicitly
#![allow(clippy::result_large_err)] // BillingError carries device and gateway context strings
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Netbill Enforcement Engine
//!
//! Suspends subscribers with overdue invoices at their network edge,
//! restores them once paid, and reconciles payment-gateway state.
//!
//! ## Features
//!
//! - **Overdue Scanning**: Find customers past the grace period, one case per customer
//! - **Suspension**: Block through RouterOS address lists, DHCP leases, queues or firewall rules
//! - **Restoration**: Revert every block once no unpaid invoice remains
//! - **Reconciliation**: Poll the gateway and record each paid transaction exactly once
//! - **Audit Trail**: Every strategy call against a device is recorded
//! - **Scheduling**: Independent, non-overlapping periodic runs with manual triggers

pub mod audit;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod gateway;
pub mod notifier;
pub mod reconciler;
pub mod report;
pub mod scanner;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod strategy;

// Audit
pub use audit::{AttemptBuilder, AttemptLogger};

// Config
pub use config::{EnforcementConfig, GatewayConfig, NotifyConfig, ScheduleConfig};

// Controller
pub use controller::SuspensionController;

// Device
pub use device::{
    DeviceConnector, DeviceFault, DeviceSession, InMemoryConnector, InMemoryDevice,
    RouterOsConnector,
};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{
    GatewayClient, GatewayStatus, GatewayTransactionStatus, HttpGatewayClient, InMemoryGateway,
};

// Notifier
pub use notifier::{
    notifier_from_config, LogNotifier, NotificationEvent, Notifier, RecordingNotifier,
    WebhookNotifier,
};

// Reconciler
pub use reconciler::PaymentReconciler;

// Reports
pub use report::{
    ReconciliationDetail, ReconciliationOutcome, ReconciliationReport, RestorationDetail,
    RestorationOutcome, RestorationReport, SuspensionDetail, SuspensionOutcome, SuspensionReport,
};

// Scanner
pub use scanner::{OverdueCase, OverdueScanner};

// Scheduler
pub use scheduler::{Scheduler, SchedulerHandle};

// Shutdown
pub use shutdown::{Shutdown, ShutdownTrigger};

// Store
pub use store::{InMemoryStateStore, PaymentInsert, PgStateStore, StateStore};

// Strategies
pub use strategy::{NetworkIdentity, StrategySet, SuspensionStrategy};

use std::sync::Arc;

use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;

/// Trigger surface over the three workflows.
///
/// Each workflow has its own guard, so a manual trigger and a scheduled
/// tick of the same workflow queue up instead of interleaving. Different
/// workflows run concurrently.
pub struct EnforcementEngine {
    config: EnforcementConfig,
    controller: SuspensionController,
    reconciler: PaymentReconciler,
    shutdown: Shutdown,
    suspension_guard: Mutex<()>,
    restoration_guard: Mutex<()>,
    reconciliation_guard: Mutex<()>,
}

impl EnforcementEngine {
    /// Create an engine wired to PostgreSQL, RouterOS and the HTTP gateway
    pub fn from_config(
        config: EnforcementConfig,
        pool: PgPool,
        shutdown: Shutdown,
    ) -> BillingResult<Self> {
        let store = Arc::new(PgStateStore::new(pool));
        let connector = Arc::new(RouterOsConnector::new(config.device_timeout));
        let gateway = Arc::new(HttpGatewayClient::new(&config.gateway)?);
        let notifier = notifier_from_config(&config.notify)?;
        Ok(Self::new(config, store, connector, gateway, notifier, shutdown))
    }

    /// Create an engine with explicit ports
    pub fn new(
        config: EnforcementConfig,
        store: Arc<dyn StateStore>,
        connector: Arc<dyn DeviceConnector>,
        gateway: Arc<dyn GatewayClient>,
        notifier: Arc<dyn Notifier>,
        shutdown: Shutdown,
    ) -> Self {
        let controller = SuspensionController::new(
            store.clone(),
            connector,
            notifier.clone(),
            StrategySet::from_config(&config),
            config.suspension_method,
        );
        let reconciler = PaymentReconciler::new(store, gateway, notifier);

        Self {
            config,
            controller,
            reconciler,
            shutdown,
            suspension_guard: Mutex::new(()),
            restoration_guard: Mutex::new(()),
            reconciliation_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EnforcementConfig {
        &self.config
    }

    /// Calendar date in the billing timezone
    pub fn today(&self) -> Date {
        OffsetDateTime::now_utc()
            .to_offset(self.config.utc_offset)
            .date()
    }

    pub async fn run_suspension_check(&self) -> SuspensionReport {
        let _guard = self.suspension_guard.lock().await;

        if !self.config.auto_suspension_enabled {
            tracing::info!("Automatic suspension disabled, skipping run");
            return SuspensionReport::disabled();
        }

        let today = self.today();
        match self
            .controller
            .suspend_overdue(self.config.grace_period_days, today, &self.shutdown)
            .await
        {
            Ok(report) => {
                tracing::info!(
                    checked = report.checked,
                    suspended = report.suspended,
                    skipped = report.skipped,
                    errors = report.errors,
                    %today,
                    "Suspension check complete"
                );
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "Suspension check aborted");
                SuspensionReport {
                    aborted: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    pub async fn run_restoration_check(&self) -> RestorationReport {
        let _guard = self.restoration_guard.lock().await;

        match self.controller.restore_paid(&self.shutdown).await {
            Ok(report) => {
                tracing::info!(
                    checked = report.checked,
                    restored = report.restored,
                    not_found = report.not_found,
                    errors = report.errors,
                    partial = report.partial,
                    "Restoration check complete"
                );
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "Restoration check aborted");
                RestorationReport {
                    aborted: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    pub async fn run_payment_reconciliation(&self) -> ReconciliationReport {
        let report = {
            let _guard = self.reconciliation_guard.lock().await;
            let result = match time::Duration::try_from(self.config.reconciliation_window) {
                Ok(window) => {
                    self.reconciler
                        .reconcile_pending(window, OffsetDateTime::now_utc(), &self.shutdown)
                        .await
                }
                Err(e) => Err(BillingError::Config(format!(
                    "Invalid reconciliation window: {}",
                    e
                ))),
            };

            match result {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "Payment reconciliation aborted");
                    return ReconciliationReport {
                        aborted: Some(e.to_string()),
                        ..Default::default()
                    };
                }
            }
        };

        if self.config.restore_on_payment && !report.paid_customer_ids.is_empty() {
            self.restore_after_payment(&report.paid_customer_ids).await;
        }
        report
    }

    async fn restore_after_payment(&self, customer_ids: &[uuid::Uuid]) {
        let _guard = self.restoration_guard.lock().await;
        match self
            .controller
            .restore_customers(customer_ids, &self.shutdown)
            .await
        {
            Ok(restored) if restored.checked > 0 => {
                tracing::info!(
                    restored = restored.restored,
                    errors = restored.errors,
                    "Payment-triggered restoration complete"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Payment-triggered restoration failed, next restoration check will retry");
            }
        }
    }

    /// Drop audit records past the retention period
    pub async fn purge_audit_trail(&self) -> BillingResult<u64> {
        self.controller
            .audit()
            .purge_older_than(self.config.attempt_retention_days)
            .await
    }
}
