//! Billing error types

use thiserror::Error;

/// Enforcement and reconciliation errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Customer has no usable network identity: {0}")]
    MissingIdentity(String),

    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("Device timed out: {0}")]
    DeviceTimeout(String),

    #[error("Device authentication failed: {0}")]
    DeviceAuth(String),

    #[error("Device rejected command: {0}")]
    DeviceCommand(String),

    #[error("Device protocol error: {0}")]
    DeviceProtocol(String),

    #[error("Payment gateway request failed: {0}")]
    GatewayHttp(String),

    #[error("Payment gateway timed out: {0}")]
    GatewayTimeout(String),

    #[error("Malformed payment gateway response: {0}")]
    GatewayResponse(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Connectivity failures are retried on the next scheduled tick, never in-loop
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            BillingError::DeviceUnreachable(_)
                | BillingError::DeviceTimeout(_)
                | BillingError::GatewayHttp(_)
                | BillingError::GatewayTimeout(_)
        )
    }

    /// Missing credentials or addressing fields; fixing them needs an operator
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BillingError::Config(_) | BillingError::MissingIdentity(_) | BillingError::DeviceAuth(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BillingError::GatewayTimeout(err.to_string())
        } else if err.is_decode() {
            BillingError::GatewayResponse(err.to_string())
        } else {
            BillingError::GatewayHttp(err.to_string())
        }
    }
}

impl From<std::io::Error> for BillingError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => BillingError::DeviceTimeout(err.to_string()),
            std::io::ErrorKind::UnexpectedEof => {
                BillingError::DeviceProtocol(format!("connection closed: {}", err))
            }
            std::io::ErrorKind::InvalidData => BillingError::DeviceProtocol(err.to_string()),
            _ => BillingError::DeviceUnreachable(err.to_string()),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
