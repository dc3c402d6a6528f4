//! Suspension audit trail
//!
//! Append-only record of every strategy call made against a device. Used to
//! answer "why is this subscriber cut off?" and "what did restore touch?".
//! Writes are best-effort: a failed audit insert is logged, never surfaced.

use std::sync::Arc;

use netbill_shared::{AttemptOutcome, EnforcementMethod, SuspensionAction, SuspensionAttempt};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::StateStore;
use crate::strategy::NetworkIdentity;

/// Builder for suspension attempt records
pub struct AttemptBuilder {
    customer_id: Uuid,
    action: SuspensionAction,
    method: EnforcementMethod,
    target_ip: Option<String>,
    target_mac: Option<String>,
    outcome: AttemptOutcome,
    message: Option<String>,
}

impl AttemptBuilder {
    pub fn new(customer_id: Uuid, action: SuspensionAction, method: EnforcementMethod) -> Self {
        Self {
            customer_id,
            action,
            method,
            target_ip: None,
            target_mac: None,
            outcome: AttemptOutcome::Failed,
            message: None,
        }
    }

    /// Record the addressing the strategy keyed on
    pub fn target(mut self, identity: &NetworkIdentity) -> Self {
        self.target_ip = identity.ip.map(|ip| ip.to_string());
        self.target_mac = identity.mac.as_ref().map(|mac| mac.to_string());
        self
    }

    pub fn outcome(mut self, outcome: AttemptOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn build(self) -> SuspensionAttempt {
        SuspensionAttempt {
            id: Uuid::new_v4(),
            customer_id: self.customer_id,
            action: self.action,
            method: self.method,
            target_ip: self.target_ip,
            target_mac: self.target_mac,
            outcome: self.outcome,
            message: self.message,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Writes attempts to the store
#[derive(Clone)]
pub struct AttemptLogger {
    store: Arc<dyn StateStore>,
}

impl AttemptLogger {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn log(&self, builder: AttemptBuilder) {
        let attempt = builder.build();
        if let Err(e) = self.store.record_suspension_attempt(&attempt).await {
            tracing::warn!(
                customer_id = %attempt.customer_id,
                method = %attempt.method,
                outcome = %attempt.outcome,
                error = %e,
                "Failed to record suspension attempt"
            );
        }
    }

    /// Drop attempts older than `retention_days`
    pub async fn purge_older_than(&self, retention_days: i64) -> BillingResult<u64> {
        let cutoff = OffsetDateTime::now_utc() - time::Duration::days(retention_days.max(1));
        let purged = self.store.purge_suspension_attempts(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged = purged, retention_days = retention_days, "Purged old suspension attempts");
        }
        Ok(purged)
    }
}
