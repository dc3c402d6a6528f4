//! Persistent state access
//!
//! The engine reads and writes the billing ledger only through [`StateStore`].
//! Every write is a single-row operation; the unique `(invoice_id,
//! reference_number)` key on payments is the only cross-workflow guard.

mod memory;
mod postgres;

pub use memory::InMemoryStateStore;
pub use postgres::PgStateStore;

use async_trait::async_trait;
use netbill_shared::{
    Customer, CustomerStatus, GatewayTransaction, Invoice, InvoiceStatus, NetworkDevice,
    NewPayment, Payment, SuspensionAttempt, TransactionStatus,
};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of an insert-or-ignore payment write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentInsert {
    /// Whether this call created the row
    pub inserted: bool,
    /// Id of the new row, or of the row that already held the key
    pub payment_id: Uuid,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Unpaid invoices with `due_date <= as_of`, oldest due date first
    async fn get_overdue_unpaid_invoices(&self, as_of: Date) -> BillingResult<Vec<Invoice>>;

    async fn get_customer(&self, id: Uuid) -> BillingResult<Option<Customer>>;

    async fn list_customers_by_status(
        &self,
        status: CustomerStatus,
    ) -> BillingResult<Vec<Customer>>;

    async fn set_customer_status(&self, id: Uuid, status: CustomerStatus) -> BillingResult<()>;

    async fn count_unpaid_invoices(&self, customer_id: Uuid) -> BillingResult<i64>;

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>>;

    /// Conditional update; returns whether the status actually changed.
    /// `paid_at` is only written when moving to `paid`.
    async fn set_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<bool>;

    /// Pending transactions for `gateway` created at or after `since`
    async fn get_pending_transactions(
        &self,
        gateway: &str,
        since: OffsetDateTime,
    ) -> BillingResult<Vec<GatewayTransaction>>;

    /// Moves a pending transaction to `status`; terminal rows are left alone.
    /// Returns whether the row changed.
    async fn set_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> BillingResult<bool>;

    async fn insert_payment_if_absent(&self, payment: &NewPayment) -> BillingResult<PaymentInsert>;

    async fn find_payment(
        &self,
        invoice_id: Uuid,
        reference_number: &str,
    ) -> BillingResult<Option<Payment>>;

    async fn get_device(&self, id: Uuid) -> BillingResult<Option<NetworkDevice>>;

    async fn record_suspension_attempt(&self, attempt: &SuspensionAttempt) -> BillingResult<()>;

    /// Deletes audit rows older than `before`, returning how many went
    async fn purge_suspension_attempts(&self, before: OffsetDateTime) -> BillingResult<u64>;
}
