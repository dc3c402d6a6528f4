#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! NetBill Shared Types and Utilities
//!
//! This crate contains the persisted data model, errors, and database helpers
//! shared by the enforcement engine and the worker.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
