//! Workflow reports
//!
//! Every trigger returns one of these, even when the run was aborted, so
//! operators always get counts plus a per-item detail list.

use netbill_shared::EnforcementMethod;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one overdue case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionOutcome {
    Suspended,
    Failed,
    /// No usable network identity or other data inconsistency
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionDetail {
    pub customer_id: Uuid,
    pub invoice_id: Uuid,
    pub days_overdue: i64,
    pub outcome: SuspensionOutcome,
    /// Strategies that were attempted, in order
    pub strategies: Vec<EnforcementMethod>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuspensionReport {
    pub checked: u32,
    pub suspended: u32,
    pub skipped: u32,
    pub errors: u32,
    /// Automatic suspension switched off globally; nothing was scanned
    pub disabled: bool,
    pub aborted: Option<String>,
    pub details: Vec<SuspensionDetail>,
}

impl SuspensionReport {
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Default::default()
        }
    }

    pub(crate) fn push(&mut self, detail: SuspensionDetail) {
        match detail.outcome {
            SuspensionOutcome::Suspended => self.suspended += 1,
            SuspensionOutcome::Failed => self.errors += 1,
            SuspensionOutcome::Skipped => self.skipped += 1,
        }
        self.details.push(detail);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorationOutcome {
    Restored,
    /// Every strategy reported nothing to revert
    NoSuspensionFound,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationDetail {
    pub customer_id: Uuid,
    pub outcome: RestorationOutcome,
    /// Strategies that actually reverted something
    pub reverted: Vec<EnforcementMethod>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestorationReport {
    pub checked: u32,
    pub restored: u32,
    pub not_found: u32,
    pub skipped: u32,
    pub errors: u32,
    /// Failed customers where some block was already removed; retried next run
    pub partial: u32,
    pub aborted: Option<String>,
    pub details: Vec<RestorationDetail>,
}

impl RestorationReport {
    pub(crate) fn push(&mut self, detail: RestorationDetail) {
        match detail.outcome {
            RestorationOutcome::Restored => self.restored += 1,
            RestorationOutcome::NoSuspensionFound => self.not_found += 1,
            RestorationOutcome::Failed => {
                self.errors += 1;
                if !detail.reverted.is_empty() {
                    self.partial += 1;
                }
            }
            RestorationOutcome::Skipped => self.skipped += 1,
        }
        self.details.push(detail);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    PaymentRecorded,
    AlreadyRecorded,
    /// Gateway reported expired, failed or refunded
    MarkedFailed,
    StillPending,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationDetail {
    pub transaction_id: Uuid,
    pub invoice_id: Uuid,
    pub reference: String,
    pub outcome: ReconciliationOutcome,
    pub payment_id: Option<Uuid>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub checked: u32,
    pub processed: u32,
    pub already_recorded: u32,
    pub expired: u32,
    pub pending: u32,
    pub skipped: u32,
    pub errors: u32,
    pub aborted: Option<String>,
    pub details: Vec<ReconciliationDetail>,
    /// Customers whose invoices were settled by this run
    pub paid_customer_ids: Vec<Uuid>,
}

impl ReconciliationReport {
    pub(crate) fn push(&mut self, detail: ReconciliationDetail) {
        match detail.outcome {
            ReconciliationOutcome::PaymentRecorded => self.processed += 1,
            ReconciliationOutcome::AlreadyRecorded => self.already_recorded += 1,
            ReconciliationOutcome::MarkedFailed => self.expired += 1,
            ReconciliationOutcome::StillPending => self.pending += 1,
            ReconciliationOutcome::Skipped => self.skipped += 1,
            ReconciliationOutcome::Failed => self.errors += 1,
        }
        self.details.push(detail);
    }

    pub(crate) fn mark_paid(&mut self, customer_id: Uuid) {
        if !self.paid_customer_ids.contains(&customer_id) {
            self.paid_customer_ids.push(customer_id);
        }
    }
}
