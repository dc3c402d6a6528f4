//! Device command channel
//!
//! A [`DeviceSession`] executes menu commands such as
//! `/ip/firewall/address-list/print` against one enforcement target and
//! returns the printed rows. Sessions are opened per workflow item through a
//! [`DeviceConnector`] and closed afterwards; nothing is pooled.
//!
//! Parameter keys starting with `?` are queries (used by `print`), all other
//! keys are attributes.

mod memory;
mod routeros;

pub use memory::{DeviceFault, InMemoryConnector, InMemoryDevice};
pub use routeros::{RouterOsConnector, RouterOsSession};

use std::collections::BTreeMap;

use async_trait::async_trait;
use netbill_shared::NetworkDevice;

use crate::error::BillingResult;

/// Command parameters, ordered for stable wire encoding
pub type Params = BTreeMap<String, String>;

/// One printed item
pub type Row = BTreeMap<String, String>;

/// Key of the device-assigned item identifier
pub const ID_KEY: &str = ".id";

#[async_trait]
pub trait DeviceSession: Send {
    async fn write(&mut self, command: &str, params: &Params) -> BillingResult<Vec<Row>>;

    async fn close(&mut self) -> BillingResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Open and authenticate a session, bounded by the configured timeout
    async fn connect(&self, device: &NetworkDevice) -> BillingResult<Box<dyn DeviceSession>>;
}

/// Build a parameter map from literal pairs
pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Ids of the given rows, skipping rows without one
pub fn row_ids(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get(ID_KEY).cloned())
        .collect()
}
