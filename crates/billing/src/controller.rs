//! Suspension controller
//!
//! Orchestrates suspend and restore decisions. Customers are processed one
//! at a time with a fresh device session each, so one unreachable router or
//! one broken record never blocks the rest of the batch.
//!
//! ## Suspend
//! The configured method is tried first, then the fallbacks; the first
//! strategy that reports `applied` wins and the customer becomes `suspended`.
//!
//! ## Restore
//! Every applicable strategy is reverted, because which one was applied
//! originally is not known reliably. Reverting an inactive strategy is a
//! harmless no-op. A customer only becomes `active` once every revert
//! succeeded; after a partial revert they stay `suspended` for the next run.

use std::net::IpAddr;
use std::sync::Arc;

use netbill_shared::{
    AttemptOutcome, Customer, CustomerStatus, EnforcementMethod, NetworkDevice, SuspensionAction,
};
use time::Date;
use uuid::Uuid;

use crate::audit::{AttemptBuilder, AttemptLogger};
use crate::device::{params, DeviceConnector, DeviceSession};
use crate::error::{BillingError, BillingResult};
use crate::notifier::Notifier;
use crate::report::{
    RestorationDetail, RestorationOutcome, RestorationReport, SuspensionDetail,
    SuspensionOutcome, SuspensionReport,
};
use crate::scanner::{OverdueCase, OverdueScanner};
use crate::shutdown::Shutdown;
use crate::store::StateStore;
use crate::strategy::{NetworkIdentity, StrategySet};

const PPP_ACTIVE: &str = "/ppp/active/print";

pub struct SuspensionController {
    store: Arc<dyn StateStore>,
    connector: Arc<dyn DeviceConnector>,
    notifier: Arc<dyn Notifier>,
    strategies: StrategySet,
    scanner: OverdueScanner,
    audit: AttemptLogger,
    preferred: EnforcementMethod,
}

/// Why a customer could not be acted on before any strategy ran
enum Preflight {
    /// Data inconsistency, reported as skipped
    Skip(String),
    /// Configuration or connectivity failure
    Fail(BillingError),
}

impl SuspensionController {
    pub fn new(
        store: Arc<dyn StateStore>,
        connector: Arc<dyn DeviceConnector>,
        notifier: Arc<dyn Notifier>,
        strategies: StrategySet,
        preferred: EnforcementMethod,
    ) -> Self {
        Self {
            scanner: OverdueScanner::new(store.clone()),
            audit: AttemptLogger::new(store.clone()),
            store,
            connector,
            notifier,
            strategies,
            preferred,
        }
    }

    pub fn audit(&self) -> &AttemptLogger {
        &self.audit
    }

    /// Suspend every actionable overdue customer as of `today`.
    /// Only a failed scan aborts the run; per-customer problems land in the report.
    pub async fn suspend_overdue(
        &self,
        grace_period_days: i64,
        today: Date,
        shutdown: &Shutdown,
    ) -> BillingResult<SuspensionReport> {
        let cases = self.scanner.scan(grace_period_days, today).await?;
        let mut report = SuspensionReport::default();

        for case in cases {
            if shutdown.is_triggered() {
                tracing::info!(remaining_from = %case.customer.id, "Shutdown requested, stopping suspension run");
                break;
            }
            report.checked += 1;
            let detail = self.suspend_case(&case).await;
            report.push(detail);
        }

        Ok(report)
    }

    async fn suspend_case(&self, case: &OverdueCase) -> SuspensionDetail {
        let customer = &case.customer;
        let reason = format!(
            "invoice {} overdue by {} days",
            case.invoice.invoice_number, case.days_overdue
        );
        let mut detail = SuspensionDetail {
            customer_id: customer.id,
            invoice_id: case.invoice.id,
            days_overdue: case.days_overdue,
            outcome: SuspensionOutcome::Failed,
            strategies: Vec::new(),
            message: None,
        };

        let (mut session, identity) = match self.open(customer).await {
            Ok(opened) => opened,
            Err(Preflight::Skip(msg)) => {
                tracing::warn!(customer_id = %customer.id, reason = %msg, "Skipping suspension");
                detail.outcome = SuspensionOutcome::Skipped;
                detail.message = Some(msg);
                return detail;
            }
            Err(Preflight::Fail(e)) => {
                log_preflight_failure(customer.id, SuspensionAction::Suspend, &e);
                detail.message = Some(e.to_string());
                return detail;
            }
        };

        let mut errors = Vec::new();
        let mut applied = None;
        for strategy in self.strategies.suspend_plan(self.preferred, &identity) {
            let method = strategy.method();
            detail.strategies.push(method);
            let attempt =
                AttemptBuilder::new(customer.id, SuspensionAction::Suspend, method).target(&identity);

            match strategy.apply(session.as_mut(), &identity, &reason).await {
                Ok(true) => {
                    self.audit
                        .log(attempt.outcome(AttemptOutcome::Applied).message(reason.clone()))
                        .await;
                    applied = Some(method);
                    break;
                }
                Ok(false) => {
                    self.audit
                        .log(attempt.outcome(AttemptOutcome::NotActive).message("nothing to block"))
                        .await;
                    errors.push(format!("{}: nothing to block", method));
                }
                Err(e) => {
                    tracing::warn!(customer_id = %customer.id, method = %method, error = %e, "Suspension strategy failed");
                    self.audit
                        .log(attempt.outcome(AttemptOutcome::Failed).message(e.to_string()))
                        .await;
                    let stop = e.is_connectivity();
                    errors.push(format!("{}: {}", method, e));
                    // A dead session will fail every remaining strategy too
                    if stop {
                        break;
                    }
                }
            }
        }
        close(session, customer.id).await;

        let Some(method) = applied else {
            detail.message = Some(if errors.is_empty() {
                "no applicable strategy".to_string()
            } else {
                errors.join("; ")
            });
            return detail;
        };

        if let Err(e) = self
            .store
            .set_customer_status(customer.id, CustomerStatus::Suspended)
            .await
        {
            tracing::error!(customer_id = %customer.id, error = %e, "Blocked on device but failed to update status");
            detail.message = Some(format!("blocked via {} but status update failed: {}", method, e));
            return detail;
        }

        tracing::info!(
            customer_id = %customer.id,
            invoice_id = %case.invoice.id,
            days_overdue = case.days_overdue,
            method = %method,
            "Customer suspended"
        );

        if let Err(e) = self.notifier.notify_suspended(customer, &reason).await {
            tracing::warn!(customer_id = %customer.id, error = %e, "Failed to send suspension notice");
        }

        detail.outcome = SuspensionOutcome::Suspended;
        if !errors.is_empty() {
            detail.message = Some(errors.join("; "));
        }
        detail
    }

    /// Restore every suspended customer with no unpaid invoices left
    pub async fn restore_paid(&self, shutdown: &Shutdown) -> BillingResult<RestorationReport> {
        let suspended = self
            .store
            .list_customers_by_status(CustomerStatus::Suspended)
            .await?;
        let mut report = RestorationReport::default();

        for customer in suspended {
            if shutdown.is_triggered() {
                tracing::info!("Shutdown requested, stopping restoration run");
                break;
            }
            self.restore_if_settled(customer, &mut report).await;
        }

        Ok(report)
    }

    /// Restore only the given customers, e.g. those whose invoices were just paid
    pub async fn restore_customers(
        &self,
        customer_ids: &[Uuid],
        shutdown: &Shutdown,
    ) -> BillingResult<RestorationReport> {
        let mut report = RestorationReport::default();
        for id in customer_ids {
            if shutdown.is_triggered() {
                break;
            }
            match self.store.get_customer(*id).await? {
                Some(customer) if customer.is_suspended() => {
                    self.restore_if_settled(customer, &mut report).await;
                }
                _ => {}
            }
        }
        Ok(report)
    }

    async fn restore_if_settled(&self, customer: Customer, report: &mut RestorationReport) {
        match self.store.count_unpaid_invoices(customer.id).await {
            Ok(0) => {}
            Ok(_) => return,
            Err(e) => {
                report.checked += 1;
                report.push(RestorationDetail {
                    customer_id: customer.id,
                    outcome: RestorationOutcome::Failed,
                    reverted: Vec::new(),
                    message: Some(e.to_string()),
                });
                return;
            }
        }

        report.checked += 1;
        let detail = self.restore_customer(&customer).await;
        report.push(detail);
    }

    async fn restore_customer(&self, customer: &Customer) -> RestorationDetail {
        let mut detail = RestorationDetail {
            customer_id: customer.id,
            outcome: RestorationOutcome::Failed,
            reverted: Vec::new(),
            message: None,
        };

        let (mut session, identity) = match self.open(customer).await {
            Ok(opened) => opened,
            Err(Preflight::Skip(msg)) => {
                tracing::warn!(customer_id = %customer.id, reason = %msg, "Skipping restoration");
                detail.outcome = RestorationOutcome::Skipped;
                detail.message = Some(msg);
                return detail;
            }
            Err(Preflight::Fail(e)) => {
                log_preflight_failure(customer.id, SuspensionAction::Restore, &e);
                detail.message = Some(e.to_string());
                return detail;
            }
        };

        let mut errors = Vec::new();
        for strategy in self.strategies.applicable(&identity) {
            let method = strategy.method();
            let attempt =
                AttemptBuilder::new(customer.id, SuspensionAction::Restore, method).target(&identity);

            match strategy.revert(session.as_mut(), &identity).await {
                Ok(true) => {
                    self.audit.log(attempt.outcome(AttemptOutcome::Reverted)).await;
                    detail.reverted.push(method);
                }
                Ok(false) => {
                    self.audit.log(attempt.outcome(AttemptOutcome::NotActive)).await;
                }
                Err(e) => {
                    tracing::warn!(customer_id = %customer.id, method = %method, error = %e, "Revert failed");
                    self.audit
                        .log(attempt.outcome(AttemptOutcome::Failed).message(e.to_string()))
                        .await;
                    let stop = e.is_connectivity();
                    errors.push(format!("{}: {}", method, e));
                    if stop {
                        break;
                    }
                }
            }
        }
        close(session, customer.id).await;

        if !errors.is_empty() {
            detail.message = Some(errors.join("; "));
        }

        if !errors.is_empty() {
            // Stays suspended so the next restoration run retries the leftover block
            if !detail.reverted.is_empty() {
                tracing::warn!(
                    customer_id = %customer.id,
                    reverted = ?detail.reverted,
                    "Partially unblocked, leaving customer suspended"
                );
            }
            return detail;
        }

        if detail.reverted.is_empty() {
            tracing::info!(customer_id = %customer.id, "No active suspension found on device");
            detail.outcome = RestorationOutcome::NoSuspensionFound;
            return detail;
        }

        if let Err(e) = self
            .store
            .set_customer_status(customer.id, CustomerStatus::Active)
            .await
        {
            tracing::error!(customer_id = %customer.id, error = %e, "Unblocked on device but failed to update status");
            detail.message = Some(format!("unblocked but status update failed: {}", e));
            return detail;
        }

        tracing::info!(customer_id = %customer.id, reverted = ?detail.reverted, "Customer restored");
        if let Err(e) = self.notifier.notify_restored(customer).await {
            tracing::warn!(customer_id = %customer.id, error = %e, "Failed to send restoration notice");
        }

        detail.outcome = RestorationOutcome::Restored;
        detail
    }

    /// Resolve the customer's device, connect, and work out the addressing
    /// the strategies can key on
    async fn open(
        &self,
        customer: &Customer,
    ) -> Result<(Box<dyn DeviceSession>, NetworkIdentity), Preflight> {
        let mut identity = NetworkIdentity::from_customer(customer);
        if !identity.is_resolvable() && identity.pppoe_username.is_none() {
            return Err(Preflight::Skip(
                BillingError::MissingIdentity("no IP, MAC or PPPoE username on record".into())
                    .to_string(),
            ));
        }

        let device = self.device_for(customer).await.map_err(Preflight::Fail)?;

        let mut session = self
            .connector
            .connect(&device)
            .await
            .map_err(Preflight::Fail)?;

        if identity.ip.is_none() {
            if let Some(username) = identity.pppoe_username.clone() {
                match resolve_pppoe_address(session.as_mut(), &username).await {
                    Ok(ip) => identity.ip = ip,
                    Err(e) => {
                        close(session, customer.id).await;
                        return Err(Preflight::Fail(e));
                    }
                }
            }
        }

        if !identity.is_resolvable() {
            close(session, customer.id).await;
            return Err(Preflight::Skip(
                BillingError::MissingIdentity(
                    "PPPoE session not active and no MAC on record".into(),
                )
                .to_string(),
            ));
        }

        Ok((session, identity))
    }

    async fn device_for(&self, customer: &Customer) -> BillingResult<NetworkDevice> {
        let device_id = customer.device_id.ok_or_else(|| {
            BillingError::Config("no enforcement device assigned".to_string())
        })?;
        let device = self
            .store
            .get_device(device_id)
            .await?
            .ok_or_else(|| BillingError::Config(format!("device {} not found", device_id)))?;
        if !device.has_credentials() {
            return Err(BillingError::Config(format!(
                "device {} has no API credentials",
                device.name
            )));
        }
        Ok(device)
    }
}

/// Current address of an active PPPoE session, if any
async fn resolve_pppoe_address(
    session: &mut dyn DeviceSession,
    username: &str,
) -> BillingResult<Option<IpAddr>> {
    let rows = session
        .write(PPP_ACTIVE, &params([("?name", username)]))
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("address"))
        .find_map(|addr| addr.parse().ok()))
}

/// Configuration problems need an operator; connectivity ones clear on a later tick
fn log_preflight_failure(customer_id: Uuid, action: SuspensionAction, error: &BillingError) {
    if error.is_configuration() {
        tracing::error!(
            customer_id = %customer_id,
            action = ?action,
            error = %error,
            "Enforcement device misconfigured for customer"
        );
    } else {
        tracing::warn!(
            customer_id = %customer_id,
            action = ?action,
            error = %error,
            "Cannot reach enforcement device for customer"
        );
    }
}

async fn close(mut session: Box<dyn DeviceSession>, customer_id: Uuid) {
    if let Err(e) = session.close().await {
        tracing::debug!(customer_id = %customer_id, error = %e, "Error closing device session");
    }
}
