//! Scripted gateway for tests and dry-runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{GatewayClient, GatewayStatus, GatewayTransactionStatus};
use crate::error::{BillingError, BillingResult};

#[derive(Clone)]
enum Scripted {
    Status(GatewayTransactionStatus),
    Timeout,
    Malformed,
}

pub struct InMemoryGateway {
    name: String,
    responses: RwLock<HashMap<String, Scripted>>,
    calls: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn set_status(&self, reference: &str, status: GatewayStatus, amount: i64) {
        let paid_at = (status == GatewayStatus::Paid).then(OffsetDateTime::now_utc);
        self.responses.write().await.insert(
            reference.to_string(),
            Scripted::Status(GatewayTransactionStatus {
                reference: reference.to_string(),
                status,
                amount,
                payment_method: Some("QRIS".to_string()),
                paid_at,
            }),
        );
    }

    /// Lookups for `reference` time out
    pub async fn set_timeout(&self, reference: &str) {
        self.responses
            .write()
            .await
            .insert(reference.to_string(), Scripted::Timeout);
    }

    /// Lookups for `reference` return an unparseable body
    pub async fn set_malformed(&self, reference: &str) {
        self.responses
            .write()
            .await
            .insert(reference.to_string(), Scripted::Malformed);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayClient for InMemoryGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_transaction_status(
        &self,
        reference: &str,
    ) -> BillingResult<GatewayTransactionStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.read().await.get(reference).cloned() {
            Some(Scripted::Status(status)) => Ok(status),
            Some(Scripted::Timeout) => Err(BillingError::GatewayTimeout(format!(
                "{} lookup of {}",
                self.name, reference
            ))),
            Some(Scripted::Malformed) => Err(BillingError::GatewayResponse(format!(
                "{} sent a malformed body for {}",
                self.name, reference
            ))),
            None => Err(BillingError::GatewayResponse(format!(
                "{} does not know transaction {}",
                self.name, reference
            ))),
        }
    }
}
