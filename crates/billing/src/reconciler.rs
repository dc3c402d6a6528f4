//! Payment reconciliation
//!
//! Polls the gateway for every pending transaction in the lookback window
//! and brings local state in line with it. The gateway is authoritative.
//!
//! Settling a paid transaction is a sequence of idempotent steps:
//! 1. insert the payment (unique on invoice + reference)
//! 2. mark the invoice paid
//! 3. mark the transaction success
//!
//! A crash between steps leaves the transaction pending, so the next run
//! repeats the sequence; step 1 then reports the existing row and the run
//! finishes the remaining steps without a second payment.

use std::sync::Arc;

use netbill_shared::{GatewayTransaction, Invoice, InvoiceStatus, NewPayment, TransactionStatus};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::gateway::{GatewayClient, GatewayStatus, GatewayTransactionStatus};
use crate::notifier::Notifier;
use crate::report::{ReconciliationDetail, ReconciliationOutcome, ReconciliationReport};
use crate::shutdown::Shutdown;
use crate::store::StateStore;

pub struct PaymentReconciler {
    store: Arc<dyn StateStore>,
    gateway: Arc<dyn GatewayClient>,
    notifier: Arc<dyn Notifier>,
}

/// Result of settling one paid transaction
struct Settlement {
    outcome: ReconciliationOutcome,
    payment_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    message: Option<String>,
}

impl Settlement {
    fn skipped(message: impl Into<String>) -> Self {
        Self {
            outcome: ReconciliationOutcome::Skipped,
            payment_id: None,
            customer_id: None,
            message: Some(message.into()),
        }
    }
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn StateStore>,
        gateway: Arc<dyn GatewayClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    /// Reconcile pending transactions created within `window` of `now`.
    /// Only a failed pending-transaction query aborts the run.
    pub async fn reconcile_pending(
        &self,
        window: Duration,
        now: OffsetDateTime,
        shutdown: &Shutdown,
    ) -> BillingResult<ReconciliationReport> {
        let since = now - window;
        let pending = self
            .store
            .get_pending_transactions(self.gateway.name(), since)
            .await?;
        let mut report = ReconciliationReport::default();

        tracing::debug!(
            gateway = self.gateway.name(),
            pending = pending.len(),
            "Reconciling pending transactions"
        );

        for tx in pending {
            if shutdown.is_triggered() {
                tracing::info!("Shutdown requested, stopping reconciliation run");
                break;
            }
            report.checked += 1;

            let mut detail = ReconciliationDetail {
                transaction_id: tx.id,
                invoice_id: tx.invoice_id,
                reference: tx.reference.clone(),
                outcome: ReconciliationOutcome::Failed,
                payment_id: None,
                message: None,
            };

            match self.reconcile_one(&tx, now).await {
                Ok(settlement) => {
                    detail.outcome = settlement.outcome;
                    detail.payment_id = settlement.payment_id;
                    detail.message = settlement.message;
                    if let Some(customer_id) = settlement.customer_id {
                        report.mark_paid(customer_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        transaction_id = %tx.id,
                        reference = %tx.reference,
                        error = %e,
                        "Failed to reconcile transaction"
                    );
                    detail.message = Some(e.to_string());
                }
            }
            report.push(detail);
        }

        if report.processed > 0 || report.expired > 0 {
            tracing::info!(
                checked = report.checked,
                processed = report.processed,
                expired = report.expired,
                errors = report.errors,
                "Reconciliation run complete"
            );
        }
        Ok(report)
    }

    async fn reconcile_one(
        &self,
        tx: &GatewayTransaction,
        now: OffsetDateTime,
    ) -> BillingResult<Settlement> {
        let remote = self.gateway.get_transaction_status(&tx.reference).await?;

        match remote.status {
            GatewayStatus::Paid => self.settle(tx, &remote, now).await,
            status if status.is_failure() => {
                self.store
                    .set_transaction_status(tx.id, TransactionStatus::Failed)
                    .await?;
                tracing::info!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    status = %status,
                    "Gateway closed transaction without payment"
                );
                Ok(Settlement {
                    outcome: ReconciliationOutcome::MarkedFailed,
                    payment_id: None,
                    customer_id: None,
                    message: Some(status.to_string()),
                })
            }
            _ => Ok(Settlement {
                outcome: ReconciliationOutcome::StillPending,
                payment_id: None,
                customer_id: None,
                message: None,
            }),
        }
    }

    async fn settle(
        &self,
        tx: &GatewayTransaction,
        remote: &GatewayTransactionStatus,
        now: OffsetDateTime,
    ) -> BillingResult<Settlement> {
        let Some(invoice) = self.store.get_invoice(tx.invoice_id).await? else {
            tracing::warn!(transaction_id = %tx.id, invoice_id = %tx.invoice_id, "Paid transaction references a missing invoice");
            return Ok(Settlement::skipped("invoice not found"));
        };

        match invoice.status {
            InvoiceStatus::Cancelled => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    invoice_id = %invoice.id,
                    "Gateway reports payment for a cancelled invoice"
                );
                Ok(Settlement::skipped("invoice cancelled"))
            }
            InvoiceStatus::Paid => self.settle_paid_invoice(tx, &invoice).await,
            InvoiceStatus::Unpaid => self.record_payment(tx, &invoice, remote, now).await,
        }
    }

    /// Invoice already paid: only close the transaction if our payment is the one on file
    async fn settle_paid_invoice(
        &self,
        tx: &GatewayTransaction,
        invoice: &Invoice,
    ) -> BillingResult<Settlement> {
        match self.store.find_payment(invoice.id, &tx.reference).await? {
            Some(payment) => {
                self.store
                    .set_transaction_status(tx.id, TransactionStatus::Success)
                    .await?;
                Ok(Settlement {
                    outcome: ReconciliationOutcome::AlreadyRecorded,
                    payment_id: Some(payment.id),
                    customer_id: None,
                    message: None,
                })
            }
            None => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    invoice_id = %invoice.id,
                    "Invoice was settled through another payment"
                );
                Ok(Settlement::skipped("invoice already paid by another payment"))
            }
        }
    }

    async fn record_payment(
        &self,
        tx: &GatewayTransaction,
        invoice: &Invoice,
        remote: &GatewayTransactionStatus,
        now: OffsetDateTime,
    ) -> BillingResult<Settlement> {
        let amount = if remote.amount > 0 { remote.amount } else { tx.amount };
        if amount != invoice.amount {
            tracing::warn!(
                invoice_id = %invoice.id,
                expected = invoice.amount,
                received = amount,
                "Payment amount differs from invoice amount"
            );
        }

        let paid_at = remote.paid_at.unwrap_or(now);
        let payment = NewPayment {
            invoice_id: invoice.id,
            amount,
            payment_method: remote
                .payment_method
                .clone()
                .unwrap_or_else(|| self.gateway.name().to_string()),
            reference_number: tx.reference.clone(),
            payment_date: paid_at,
        };

        let insert = self.store.insert_payment_if_absent(&payment).await?;
        self.store
            .set_invoice_status(invoice.id, InvoiceStatus::Paid, Some(paid_at))
            .await?;
        self.store
            .set_transaction_status(tx.id, TransactionStatus::Success)
            .await?;

        if !insert.inserted {
            tracing::info!(
                transaction_id = %tx.id,
                payment_id = %insert.payment_id,
                "Completed an interrupted settlement"
            );
            return Ok(Settlement {
                outcome: ReconciliationOutcome::AlreadyRecorded,
                payment_id: Some(insert.payment_id),
                customer_id: Some(invoice.customer_id),
                message: None,
            });
        }

        tracing::info!(
            transaction_id = %tx.id,
            invoice_id = %invoice.id,
            payment_id = %insert.payment_id,
            amount = amount,
            "Payment recorded from gateway"
        );

        if let Some(recorded) = self.store.find_payment(invoice.id, &tx.reference).await? {
            if let Err(e) = self.notifier.notify_payment_received(&recorded).await {
                tracing::warn!(payment_id = %recorded.id, error = %e, "Failed to send payment notice");
            }
        }

        Ok(Settlement {
            outcome: ReconciliationOutcome::PaymentRecorded,
            payment_id: Some(insert.payment_id),
            customer_id: Some(invoice.customer_id),
            message: None,
        })
    }
}
