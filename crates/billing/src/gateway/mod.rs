//! Payment gateway port
//!
//! The gateway is the system of record for whether a payment intent was paid.

mod http;
mod memory;

pub use http::HttpGatewayClient;
pub use memory::InMemoryGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::BillingResult;

/// Authoritative transaction state as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatewayStatus {
    Unpaid,
    Paid,
    Expired,
    Failed,
    Refund,
}

impl GatewayStatus {
    /// Expired, failed and refunded intents all close the local transaction
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Expired | Self::Failed | Self::Refund)
    }
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaid => write!(f, "UNPAID"),
            Self::Paid => write!(f, "PAID"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Refund => write!(f, "REFUND"),
        }
    }
}

impl std::str::FromStr for GatewayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UNPAID" => Ok(Self::Unpaid),
            "PAID" => Ok(Self::Paid),
            "EXPIRED" => Ok(Self::Expired),
            "FAILED" => Ok(Self::Failed),
            "REFUND" => Ok(Self::Refund),
            _ => Err(format!("Unknown gateway status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTransactionStatus {
    pub reference: String,
    pub status: GatewayStatus,
    pub amount: i64,
    pub payment_method: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Gateway name as stored on local transactions
    fn name(&self) -> &str;

    async fn get_transaction_status(&self, reference: &str)
        -> BillingResult<GatewayTransactionStatus>;
}
