//! In-memory state store
//!
//! Same semantics as the Postgres store, used by tests and local dry-runs.
//! `set_unavailable(true)` makes every call fail like a lost database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use netbill_shared::{
    Customer, CustomerStatus, GatewayTransaction, Invoice, InvoiceStatus, NetworkDevice,
    NewPayment, Payment, SuspensionAttempt, TransactionStatus,
};
use time::{Date, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PaymentInsert, StateStore};
use crate::error::{BillingError, BillingResult};

#[derive(Default)]
struct Tables {
    customers: HashMap<Uuid, Customer>,
    invoices: HashMap<Uuid, Invoice>,
    payments: Vec<Payment>,
    transactions: HashMap<Uuid, GatewayTransaction>,
    devices: HashMap<Uuid, NetworkDevice>,
    attempts: Vec<SuspensionAttempt>,
}

#[derive(Default)]
pub struct InMemoryStateStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> BillingResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BillingError::Database(
                "state store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.tables
            .write()
            .await
            .customers
            .insert(customer.id, customer);
    }

    pub async fn insert_invoice(&self, invoice: Invoice) {
        self.tables.write().await.invoices.insert(invoice.id, invoice);
    }

    pub async fn insert_transaction(&self, transaction: GatewayTransaction) {
        self.tables
            .write()
            .await
            .transactions
            .insert(transaction.id, transaction);
    }

    pub async fn insert_device(&self, device: NetworkDevice) {
        self.tables.write().await.devices.insert(device.id, device);
    }

    pub async fn customer(&self, id: Uuid) -> Option<Customer> {
        self.tables.read().await.customers.get(&id).cloned()
    }

    pub async fn invoice(&self, id: Uuid) -> Option<Invoice> {
        self.tables.read().await.invoices.get(&id).cloned()
    }

    pub async fn transaction(&self, id: Uuid) -> Option<GatewayTransaction> {
        self.tables.read().await.transactions.get(&id).cloned()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.read().await.payments.clone()
    }

    pub async fn attempts(&self) -> Vec<SuspensionAttempt> {
        self.tables.read().await.attempts.clone()
    }

    /// Mark an invoice paid outside the reconciler, as a cashier would
    pub async fn mark_invoice_paid(&self, id: Uuid) {
        if let Some(invoice) = self.tables.write().await.invoices.get_mut(&id) {
            invoice.status = InvoiceStatus::Paid;
            invoice.paid_at = Some(OffsetDateTime::now_utc());
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_overdue_unpaid_invoices(&self, as_of: Date) -> BillingResult<Vec<Invoice>> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut invoices: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|i| i.status == InvoiceStatus::Unpaid && i.due_date <= as_of)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(invoices)
    }

    async fn get_customer(&self, id: Uuid) -> BillingResult<Option<Customer>> {
        self.check()?;
        Ok(self.tables.read().await.customers.get(&id).cloned())
    }

    async fn list_customers_by_status(
        &self,
        status: CustomerStatus,
    ) -> BillingResult<Vec<Customer>> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut customers: Vec<Customer> = tables
            .customers
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        customers.sort_by_key(|c| c.created_at);
        Ok(customers)
    }

    async fn set_customer_status(&self, id: Uuid, status: CustomerStatus) -> BillingResult<()> {
        self.check()?;
        if let Some(customer) = self.tables.write().await.customers.get_mut(&id) {
            customer.status = status;
        }
        Ok(())
    }

    async fn count_unpaid_invoices(&self, customer_id: Uuid) -> BillingResult<i64> {
        self.check()?;
        let tables = self.tables.read().await;
        let count = tables
            .invoices
            .values()
            .filter(|i| i.customer_id == customer_id && i.status == InvoiceStatus::Unpaid)
            .count();
        Ok(count as i64)
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        self.check()?;
        Ok(self.tables.read().await.invoices.get(&id).cloned())
    }

    async fn set_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(invoice) = tables.invoices.get_mut(&id) else {
            return Ok(false);
        };
        if invoice.status == status {
            return Ok(false);
        }
        invoice.status = status;
        if status == InvoiceStatus::Paid {
            invoice.paid_at = Some(paid_at.unwrap_or_else(OffsetDateTime::now_utc));
        }
        Ok(true)
    }

    async fn get_pending_transactions(
        &self,
        gateway: &str,
        since: OffsetDateTime,
    ) -> BillingResult<Vec<GatewayTransaction>> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut transactions: Vec<GatewayTransaction> = tables
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Pending
                    && t.gateway == gateway
                    && t.created_at >= since
            })
            .cloned()
            .collect();
        transactions.sort_by_key(|t| t.created_at);
        Ok(transactions)
    }

    async fn set_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> BillingResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        match tables.transactions.get_mut(&id) {
            Some(tx) if tx.status == TransactionStatus::Pending && tx.status != status => {
                tx.status = status;
                tx.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_payment_if_absent(&self, payment: &NewPayment) -> BillingResult<PaymentInsert> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.payments.iter().find(|p| {
            p.invoice_id == payment.invoice_id && p.reference_number == payment.reference_number
        }) {
            return Ok(PaymentInsert {
                inserted: false,
                payment_id: existing.id,
            });
        }

        let id = Uuid::new_v4();
        tables.payments.push(Payment {
            id,
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            payment_method: payment.payment_method.clone(),
            reference_number: payment.reference_number.clone(),
            payment_date: payment.payment_date,
        });
        Ok(PaymentInsert {
            inserted: true,
            payment_id: id,
        })
    }

    async fn find_payment(
        &self,
        invoice_id: Uuid,
        reference_number: &str,
    ) -> BillingResult<Option<Payment>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .find(|p| p.invoice_id == invoice_id && p.reference_number == reference_number)
            .cloned())
    }

    async fn get_device(&self, id: Uuid) -> BillingResult<Option<NetworkDevice>> {
        self.check()?;
        Ok(self.tables.read().await.devices.get(&id).cloned())
    }

    async fn record_suspension_attempt(&self, attempt: &SuspensionAttempt) -> BillingResult<()> {
        self.check()?;
        self.tables.write().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn purge_suspension_attempts(&self, before: OffsetDateTime) -> BillingResult<u64> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let len = tables.attempts.len();
        tables.attempts.retain(|a| a.created_at >= before);
        Ok((len - tables.attempts.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netbill_shared::ConnectionType;
    use time::macros::date;

    fn invoice(customer_id: Uuid, due_date: Date, status: InvoiceStatus) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            customer_id,
            invoice_number: format!("INV-{}", Uuid::new_v4().simple()),
            amount: 50_000,
            due_date,
            status,
            paid_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_overdue_query_filters_and_orders() {
        let store = InMemoryStateStore::new();
        let customer = Uuid::new_v4();
        store
            .insert_invoice(invoice(customer, date!(2025 - 03 - 10), InvoiceStatus::Unpaid))
            .await;
        store
            .insert_invoice(invoice(customer, date!(2025 - 03 - 01), InvoiceStatus::Unpaid))
            .await;
        store
            .insert_invoice(invoice(customer, date!(2025 - 02 - 01), InvoiceStatus::Paid))
            .await;
        store
            .insert_invoice(invoice(customer, date!(2025 - 04 - 01), InvoiceStatus::Unpaid))
            .await;

        let overdue = store
            .get_overdue_unpaid_invoices(date!(2025 - 03 - 15))
            .await
            .unwrap();
        assert_eq!(overdue.len(), 2);
        assert_eq!(overdue[0].due_date, date!(2025 - 03 - 01));
        assert_eq!(store.count_unpaid_invoices(customer).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_payment_insert_reports_existing_row() {
        let store = InMemoryStateStore::new();
        let payment = NewPayment {
            invoice_id: Uuid::new_v4(),
            amount: 50_000,
            payment_method: "QRIS".to_string(),
            reference_number: "TX123".to_string(),
            payment_date: OffsetDateTime::now_utc(),
        };

        let first = store.insert_payment_if_absent(&payment).await.unwrap();
        let second = store.insert_payment_if_absent(&payment).await.unwrap();
        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.payment_id, second.payment_id);
        assert_eq!(store.payments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_status_updates_are_conditional() {
        let store = InMemoryStateStore::new();
        let inv = invoice(Uuid::new_v4(), date!(2025 - 03 - 01), InvoiceStatus::Unpaid);
        let id = inv.id;
        store.insert_invoice(inv).await;

        assert!(store
            .set_invoice_status(id, InvoiceStatus::Paid, None)
            .await
            .unwrap());
        assert!(!store
            .set_invoice_status(id, InvoiceStatus::Paid, None)
            .await
            .unwrap());
        assert!(store.invoice(id).await.unwrap().paid_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_transactions_are_not_revisited() {
        let store = InMemoryStateStore::new();
        let now = OffsetDateTime::now_utc();
        let tx = GatewayTransaction {
            id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            gateway: "tripay".to_string(),
            order_id: "ORD-1".to_string(),
            reference: "TX1".to_string(),
            status: TransactionStatus::Pending,
            amount: 50_000,
            created_at: now,
            updated_at: now,
        };
        let id = tx.id;
        store.insert_transaction(tx).await;

        assert!(store
            .set_transaction_status(id, TransactionStatus::Failed)
            .await
            .unwrap());
        assert!(!store
            .set_transaction_status(id, TransactionStatus::Success)
            .await
            .unwrap());
        assert_eq!(
            store.transaction(id).await.unwrap().status,
            TransactionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemoryStateStore::new();
        store
            .insert_customer(Customer {
                id: Uuid::new_v4(),
                name: "Toko Maju".to_string(),
                status: CustomerStatus::Active,
                auto_suspension_enabled: true,
                connection_type: ConnectionType::Static,
                pppoe_username: None,
                ip_address: Some("10.0.0.9".to_string()),
                mac_address: None,
                device_id: None,
                phone: None,
                created_at: OffsetDateTime::now_utc(),
            })
            .await;

        store.set_unavailable(true);
        assert!(matches!(
            store.list_customers_by_status(CustomerStatus::Active).await,
            Err(BillingError::Database(_))
        ));

        store.set_unavailable(false);
        assert_eq!(
            store
                .list_customers_by_status(CustomerStatus::Active)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
