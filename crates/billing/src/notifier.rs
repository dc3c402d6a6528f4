//! Outbound notifications
//!
//! Fire-and-forget from the engine's point of view: callers log a failed
//! delivery and carry on. Message formatting belongs to the receiver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use netbill_shared::{Customer, Payment};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::NotifyConfig;
use crate::error::{BillingError, BillingResult};

/// Header carrying the hex HMAC-SHA256 of the request body
pub const SIGNATURE_HEADER: &str = "X-Netbill-Signature";

/// A notification as delivered to the receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    CustomerSuspended {
        customer_id: Uuid,
        customer_name: String,
        phone: Option<String>,
        reason: String,
    },
    CustomerRestored {
        customer_id: Uuid,
        customer_name: String,
        phone: Option<String>,
    },
    PaymentReceived {
        payment_id: Uuid,
        invoice_id: Uuid,
        amount: i64,
        payment_method: String,
        reference_number: String,
    },
}

impl NotificationEvent {
    pub fn suspended(customer: &Customer, reason: &str) -> Self {
        Self::CustomerSuspended {
            customer_id: customer.id,
            customer_name: customer.name.clone(),
            phone: customer.phone.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn restored(customer: &Customer) -> Self {
        Self::CustomerRestored {
            customer_id: customer.id,
            customer_name: customer.name.clone(),
            phone: customer.phone.clone(),
        }
    }

    pub fn payment_received(payment: &Payment) -> Self {
        Self::PaymentReceived {
            payment_id: payment.id,
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            payment_method: payment.payment_method.clone(),
            reference_number: payment.reference_number.clone(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: NotificationEvent) -> BillingResult<()>;

    async fn notify_suspended(&self, customer: &Customer, reason: &str) -> BillingResult<()> {
        self.send(NotificationEvent::suspended(customer, reason))
            .await
    }

    async fn notify_restored(&self, customer: &Customer) -> BillingResult<()> {
        self.send(NotificationEvent::restored(customer)).await
    }

    async fn notify_payment_received(&self, payment: &Payment) -> BillingResult<()> {
        self.send(NotificationEvent::payment_received(payment))
            .await
    }
}

/// Writes notifications to the log only
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, event: NotificationEvent) -> BillingResult<()> {
        match &event {
            NotificationEvent::CustomerSuspended {
                customer_id, reason, ..
            } => {
                tracing::info!(customer_id = %customer_id, reason = %reason, "Notify: customer suspended");
            }
            NotificationEvent::CustomerRestored { customer_id, .. } => {
                tracing::info!(customer_id = %customer_id, "Notify: customer restored");
            }
            NotificationEvent::PaymentReceived {
                payment_id, amount, ..
            } => {
                tracing::info!(payment_id = %payment_id, amount = amount, "Notify: payment received");
            }
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to a configured URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    #[serde(flatten)]
    event: &'a NotificationEvent,
    /// Unix seconds
    sent_at: i64,
}

impl WebhookNotifier {
    /// `timeout` bounds one whole delivery, connect through response
    pub fn new(
        url: impl Into<String>,
        secret: Option<String>,
        timeout: Duration,
    ) -> BillingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }

    fn sign(secret: &str, body: &[u8]) -> BillingResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| BillingError::Config(format!("Invalid webhook secret: {}", e)))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, event: NotificationEvent) -> BillingResult<()> {
        let body = serde_json::to_vec(&WebhookEnvelope {
            event: &event,
            sent_at: OffsetDateTime::now_utc().unix_timestamp(),
        })
        .map_err(|e| BillingError::Internal(format!("Failed to encode notification: {}", e)))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, Self::sign(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| BillingError::Notification(format!("{}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(BillingError::Notification(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Keeps every notification in memory; used by tests and dry-runs
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail after recording it
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, event: NotificationEvent) -> BillingResult<()> {
        self.events.lock().await.push(event);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BillingError::Notification(
                "recording notifier set to fail".to_string(),
            ));
        }
        Ok(())
    }
}

/// Webhook when a URL is configured, log otherwise
pub fn notifier_from_config(config: &NotifyConfig) -> BillingResult<Arc<dyn Notifier>> {
    Ok(match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            config.webhook_secret.clone(),
            config.timeout,
        )?),
        None => Arc::new(LogNotifier),
    })
}
