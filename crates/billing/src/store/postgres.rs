//! PostgreSQL-backed state store

use async_trait::async_trait;
use netbill_shared::{
    Customer, CustomerStatus, GatewayTransaction, Invoice, InvoiceStatus, NetworkDevice,
    NewPayment, Payment, SuspensionAttempt, TransactionStatus,
};
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{PaymentInsert, StateStore};
use crate::error::BillingResult;

const CUSTOMER_COLUMNS: &str = r#"
    id, name, status, auto_suspension_enabled, connection_type,
    pppoe_username, ip_address, mac_address, device_id, phone, created_at
"#;

pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn get_overdue_unpaid_invoices(&self, as_of: Date) -> BillingResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, customer_id, invoice_number, amount, due_date, status, paid_at, created_at
            FROM invoices
            WHERE status = 'unpaid' AND due_date <= $1
            ORDER BY due_date ASC, created_at ASC
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }

    async fn get_customer(&self, id: Uuid) -> BillingResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE id = $1",
            CUSTOMER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    async fn list_customers_by_status(
        &self,
        status: CustomerStatus,
    ) -> BillingResult<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE status = $1 ORDER BY created_at ASC",
            CUSTOMER_COLUMNS
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(customers)
    }

    async fn set_customer_status(&self, id: Uuid, status: CustomerStatus) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE customers
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_unpaid_invoices(&self, customer_id: Uuid) -> BillingResult<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM invoices
            WHERE customer_id = $1 AND status = 'unpaid'
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, customer_id, invoice_number, amount, due_date, status, paid_at, created_at
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }

    async fn set_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        let paid_at = match status {
            InvoiceStatus::Paid => Some(paid_at.unwrap_or_else(OffsetDateTime::now_utc)),
            _ => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2,
                paid_at = COALESCE($3, paid_at),
                updated_at = NOW()
            WHERE id = $1 AND status <> $2
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_pending_transactions(
        &self,
        gateway: &str,
        since: OffsetDateTime,
    ) -> BillingResult<Vec<GatewayTransaction>> {
        let transactions = sqlx::query_as::<_, GatewayTransaction>(
            r#"
            SELECT id, invoice_id, gateway, order_id, reference, status, amount, created_at, updated_at
            FROM gateway_transactions
            WHERE status = 'pending' AND gateway = $1 AND created_at >= $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(gateway)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn set_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE gateway_transactions
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND status <> $2
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_payment_if_absent(&self, payment: &NewPayment) -> BillingResult<PaymentInsert> {
        // Insert-or-ignore on the de-duplication key, then tell the caller
        // whether this call was the one that wrote the row.
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO payments (invoice_id, amount, payment_method, reference_number, payment_date)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (invoice_id, reference_number) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(&payment.payment_method)
        .bind(&payment.reference_number)
        .bind(payment.payment_date)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((payment_id,)) = inserted {
            return Ok(PaymentInsert {
                inserted: true,
                payment_id,
            });
        }

        let existing: (Uuid,) = sqlx::query_as(
            r#"
            SELECT id FROM payments
            WHERE invoice_id = $1 AND reference_number = $2
            "#,
        )
        .bind(payment.invoice_id)
        .bind(&payment.reference_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(PaymentInsert {
            inserted: false,
            payment_id: existing.0,
        })
    }

    async fn find_payment(
        &self,
        invoice_id: Uuid,
        reference_number: &str,
    ) -> BillingResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, invoice_id, amount, payment_method, reference_number, payment_date
            FROM payments
            WHERE invoice_id = $1 AND reference_number = $2
            "#,
        )
        .bind(invoice_id)
        .bind(reference_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn get_device(&self, id: Uuid) -> BillingResult<Option<NetworkDevice>> {
        let device = sqlx::query_as::<_, NetworkDevice>(
            r#"
            SELECT id, name, host, api_port, username, password
            FROM network_devices
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn record_suspension_attempt(&self, attempt: &SuspensionAttempt) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO suspension_attempts (
                id, customer_id, action, method, target_ip, target_mac, outcome, message, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.customer_id)
        .bind(attempt.action.to_string())
        .bind(attempt.method.to_string())
        .bind(&attempt.target_ip)
        .bind(&attempt.target_mac)
        .bind(attempt.outcome.to_string())
        .bind(&attempt.message)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_suspension_attempts(&self, before: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query("DELETE FROM suspension_attempts WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netbill_shared::{create_pool, run_migrations};

    async fn store() -> PgStateStore {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = create_pool(&url, 2).await.unwrap();
        run_migrations(&pool).await.unwrap();
        PgStateStore::new(pool)
    }

    async fn seed_invoice(store: &PgStateStore) -> Uuid {
        let customer_id: (Uuid,) = sqlx::query_as(
            "INSERT INTO customers (name, connection_type, ip_address) VALUES ('pg-test', 'static', '10.9.9.9') RETURNING id",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();

        let invoice_id: (Uuid,) = sqlx::query_as(
            "INSERT INTO invoices (customer_id, invoice_number, amount, due_date) VALUES ($1, $2, 50000, CURRENT_DATE - 10) RETURNING id",
        )
        .bind(customer_id.0)
        .bind(format!("INV-{}", Uuid::new_v4()))
        .fetch_one(store.pool())
        .await
        .unwrap();

        invoice_id.0
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_payment_insert_is_deduplicated() {
        let store = store().await;
        let invoice_id = seed_invoice(&store).await;
        let payment = NewPayment {
            invoice_id,
            amount: 50_000,
            payment_method: "QRIS".to_string(),
            reference_number: "TX-PG-1".to_string(),
            payment_date: OffsetDateTime::now_utc(),
        };

        let first = store.insert_payment_if_absent(&payment).await.unwrap();
        let second = store.insert_payment_if_absent(&payment).await.unwrap();
        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.payment_id, second.payment_id);

        assert!(store
            .set_invoice_status(invoice_id, InvoiceStatus::Paid, None)
            .await
            .unwrap());
        assert!(!store
            .set_invoice_status(invoice_id, InvoiceStatus::Paid, None)
            .await
            .unwrap());
    }
}
