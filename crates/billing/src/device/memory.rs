//! In-memory device emulator
//!
//! Emulates the RouterOS `print`/`add`/`set`/`remove` verbs over menu tables
//! so strategies can be exercised without hardware. Devices are keyed by
//! host; faults can be injected per host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use netbill_shared::NetworkDevice;
use tokio::sync::Mutex;

use super::{DeviceConnector, DeviceSession, Params, Row, ID_KEY};
use crate::error::{BillingError, BillingResult};

/// Injected failure for one host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    /// Connection refused
    Unreachable,
    /// Connect does not complete in time
    ConnectTimeout,
    /// Login rejected
    AuthFailure,
    /// Connect works, every command times out
    CommandTimeout,
}

/// Menu tables of one emulated device
#[derive(Default)]
pub struct InMemoryDevice {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    log: Mutex<Vec<(String, Params)>>,
    rejected: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl InMemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row as if the device had created it (leases, PPPoE sessions)
    pub async fn seed(&self, menu: &str, row: Row) -> String {
        let id = self.allocate_id();
        let mut row = row;
        row.insert(ID_KEY.to_string(), id.clone());
        self.tables
            .lock()
            .await
            .entry(menu.to_string())
            .or_default()
            .push(row);
        id
    }

    pub async fn rows(&self, menu: &str) -> Vec<Row> {
        self.tables
            .lock()
            .await
            .get(menu)
            .cloned()
            .unwrap_or_default()
    }

    /// Every command executed so far, in order
    pub async fn commands(&self) -> Vec<(String, Params)> {
        self.log.lock().await.clone()
    }

    /// Number of executed commands whose path starts with `prefix`
    pub async fn command_count(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .await
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(prefix))
            .count()
    }

    /// Make the device refuse every command starting with `prefix`, as
    /// RouterOS does with a `!trap` reply
    pub async fn reject(&self, prefix: &str) {
        self.rejected.lock().await.push(prefix.to_string());
    }

    pub async fn clear_rejections(&self) {
        self.rejected.lock().await.clear();
    }

    fn allocate_id(&self) -> String {
        format!("*{:X}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn execute(&self, command: &str, params: &Params) -> BillingResult<Vec<Row>> {
        self.log
            .lock()
            .await
            .push((command.to_string(), params.clone()));

        if self
            .rejected
            .lock()
            .await
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            return Err(BillingError::DeviceCommand(format!(
                "{}: failure: item busy",
                command
            )));
        }

        let (menu, verb) = command
            .rsplit_once('/')
            .ok_or_else(|| BillingError::DeviceCommand(format!("bad command {}", command)))?;

        let mut tables = self.tables.lock().await;
        match verb {
            "print" => {
                let rows = tables.get(menu).map(Vec::as_slice).unwrap_or_default();
                Ok(rows
                    .iter()
                    .filter(|row| matches_query(row, params))
                    .cloned()
                    .collect())
            }
            "add" => {
                let mut row: Row = params
                    .iter()
                    .filter(|(k, _)| !k.starts_with('?'))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                row.insert(ID_KEY.to_string(), self.allocate_id());
                tables.entry(menu.to_string()).or_default().push(row);
                Ok(Vec::new())
            }
            "set" => {
                let row = find_row(tables.get_mut(menu), params, command)?;
                for (k, v) in params.iter().filter(|(k, _)| k.as_str() != ID_KEY) {
                    row.insert(k.clone(), v.clone());
                }
                Ok(Vec::new())
            }
            "remove" => {
                let id = item_id(params, command)?;
                let rows = tables.get_mut(menu);
                match rows.and_then(|rows| {
                    rows.iter()
                        .position(|r| r.get(ID_KEY) == Some(&id))
                        .map(|pos| rows.remove(pos))
                }) {
                    Some(_) => Ok(Vec::new()),
                    None => Err(no_such_item(command)),
                }
            }
            _ => Err(BillingError::DeviceCommand(format!(
                "{}: no such command",
                command
            ))),
        }
    }
}

fn matches_query(row: &Row, params: &Params) -> bool {
    params
        .iter()
        .filter_map(|(k, v)| k.strip_prefix('?').map(|field| (field, v)))
        .all(|(field, value)| row.get(field) == Some(value))
}

fn item_id(params: &Params, command: &str) -> BillingResult<String> {
    params
        .get(ID_KEY)
        .cloned()
        .ok_or_else(|| BillingError::DeviceCommand(format!("{}: missing .id", command)))
}

fn find_row<'a>(
    rows: Option<&'a mut Vec<Row>>,
    params: &Params,
    command: &str,
) -> BillingResult<&'a mut Row> {
    let id = item_id(params, command)?;
    rows.and_then(|rows| rows.iter_mut().find(|r| r.get(ID_KEY) == Some(&id)))
        .ok_or_else(|| no_such_item(command))
}

fn no_such_item(command: &str) -> BillingError {
    BillingError::DeviceCommand(format!("{}: no such item", command))
}

struct InMemorySession {
    device: Arc<InMemoryDevice>,
    host: String,
    fail_commands: bool,
}

#[async_trait]
impl DeviceSession for InMemorySession {
    async fn write(&mut self, command: &str, params: &Params) -> BillingResult<Vec<Row>> {
        if self.fail_commands {
            return Err(BillingError::DeviceTimeout(format!(
                "{} on {}",
                command, self.host
            )));
        }
        self.device.execute(command, params).await
    }
}

/// Hands out sessions to emulated devices, one device per host
#[derive(Default)]
pub struct InMemoryConnector {
    devices: Mutex<HashMap<String, Arc<InMemoryDevice>>>,
    faults: Mutex<HashMap<String, DeviceFault>>,
    connects: AtomicU64,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The emulated device behind `host`, created on first use
    pub async fn device(&self, host: &str) -> Arc<InMemoryDevice> {
        self.devices
            .lock()
            .await
            .entry(host.to_string())
            .or_default()
            .clone()
    }

    pub async fn inject_fault(&self, host: &str, fault: DeviceFault) {
        self.faults.lock().await.insert(host.to_string(), fault);
    }

    pub async fn clear_fault(&self, host: &str) {
        self.faults.lock().await.remove(host);
    }

    /// Successful and failed connection attempts so far
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnector for InMemoryConnector {
    async fn connect(&self, device: &NetworkDevice) -> BillingResult<Box<dyn DeviceSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !device.has_credentials() {
            return Err(BillingError::Config(format!(
                "device {} has no API credentials",
                device.name
            )));
        }

        let fault = self.faults.lock().await.get(&device.host).copied();
        match fault {
            Some(DeviceFault::Unreachable) => {
                return Err(BillingError::DeviceUnreachable(format!(
                    "{}: connection refused",
                    device.address()
                )))
            }
            Some(DeviceFault::ConnectTimeout) => {
                return Err(BillingError::DeviceTimeout(format!(
                    "connect to {}",
                    device.address()
                )))
            }
            Some(DeviceFault::AuthFailure) => {
                return Err(BillingError::DeviceAuth(format!(
                    "{}: invalid user name or password",
                    device.name
                )))
            }
            _ => {}
        }

        Ok(Box::new(InMemorySession {
            device: self.device(&device.host).await,
            host: device.host.clone(),
            fail_commands: fault == Some(DeviceFault::CommandTimeout),
        }))
    }
}
