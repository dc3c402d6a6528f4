//! Error types for NetBill

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetbillError {
    #[error("Validation error: {0}")]
    Validation(String),
}
