//! Overdue scanner
//!
//! Pure query: finds customers whose oldest unpaid invoice has been overdue
//! for at least the grace period. No side effects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use netbill_shared::{Customer, CustomerStatus, Invoice};
use serde::Serialize;
use time::Date;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::StateStore;

/// An actionable (customer, invoice) pair
#[derive(Debug, Clone, Serialize)]
pub struct OverdueCase {
    pub customer: Customer,
    /// Earliest-due unpaid invoice of the customer
    pub invoice: Invoice,
    pub days_overdue: i64,
}

/// Whole calendar days between the due date and `today`; negative when not yet due
pub fn days_overdue(due_date: Date, today: Date) -> i64 {
    (today - due_date).whole_days()
}

pub struct OverdueScanner {
    store: Arc<dyn StateStore>,
}

impl OverdueScanner {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Actionable cases as of `today`, one per customer, oldest due date first
    pub async fn scan(&self, grace_period_days: i64, today: Date) -> BillingResult<Vec<OverdueCase>> {
        let invoices = self.store.get_overdue_unpaid_invoices(today).await?;

        // Invoices arrive oldest first, so the first one seen per customer
        // is the earliest due.
        let mut seen = HashSet::new();
        let oldest: Vec<Invoice> = invoices
            .into_iter()
            .filter(|invoice| seen.insert(invoice.customer_id))
            .collect();

        let mut customers: HashMap<Uuid, Option<Customer>> = HashMap::new();
        let mut cases = Vec::new();
        for invoice in oldest {
            let days = days_overdue(invoice.due_date, today);
            if days < grace_period_days {
                continue;
            }

            let customer = match customers.get(&invoice.customer_id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.store.get_customer(invoice.customer_id).await?;
                    customers.insert(invoice.customer_id, fetched.clone());
                    fetched
                }
            };

            let Some(customer) = customer else {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    customer_id = %invoice.customer_id,
                    "Overdue invoice references a missing customer"
                );
                continue;
            };

            if !customer.auto_suspension_enabled || customer.status != CustomerStatus::Active {
                continue;
            }

            cases.push(OverdueCase {
                customer,
                invoice,
                days_overdue: days,
            });
        }

        tracing::debug!(cases = cases.len(), grace_period_days, %today, "Overdue scan complete");
        Ok(cases)
    }
}
