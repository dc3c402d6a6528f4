//! Suspension strategies
//!
//! Each strategy is one independent, idempotent way of cutting a subscriber
//! off at the router. Every operation follows check-then-act against live
//! device state: `print` first, then `add`/`set`/`remove` only when needed,
//! so repeating an operation never creates duplicate entries.
//!
//! Which strategies apply depends on the identity fields the customer has:
//! IP-keyed strategies need an address, the DHCP strategy needs a MAC.

mod address_list;
mod bandwidth;
mod dhcp_lease;
mod firewall;

pub use address_list::AddressListBlock;
pub use bandwidth::BandwidthThrottle;
pub use dhcp_lease::DhcpLeaseBlock;
pub use firewall::FirewallDrop;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use netbill_shared::{Customer, EnforcementMethod, MacAddress};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::EnforcementConfig;
use crate::device::DeviceSession;
use crate::error::{BillingError, BillingResult};

/// Addressing fields a strategy can key on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub ip: Option<IpAddr>,
    pub mac: Option<MacAddress>,
    pub pppoe_username: Option<String>,
}

impl NetworkIdentity {
    /// Identity as stored on the customer record, before any device lookup
    pub fn from_customer(customer: &Customer) -> Self {
        Self {
            ip: customer.static_ip(),
            mac: customer.mac(),
            pppoe_username: customer.pppoe_user().map(str::to_string),
        }
    }

    /// Whether any strategy could key on this identity
    pub fn is_resolvable(&self) -> bool {
        self.ip.is_some() || self.mac.is_some()
    }

    pub(crate) fn require_ip(&self, method: EnforcementMethod) -> BillingResult<IpAddr> {
        self.ip.ok_or_else(|| {
            BillingError::MissingIdentity(format!("{} needs an IP address", method))
        })
    }

    pub(crate) fn require_mac(&self, method: EnforcementMethod) -> BillingResult<&MacAddress> {
        self.mac.as_ref().ok_or_else(|| {
            BillingError::MissingIdentity(format!("{} needs a MAC address", method))
        })
    }
}

#[async_trait]
pub trait SuspensionStrategy: Send + Sync {
    fn method(&self) -> EnforcementMethod;

    fn is_applicable(&self, identity: &NetworkIdentity) -> bool;

    /// Returns `false` when there was nothing to block (soft failure)
    async fn apply(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
        reason: &str,
    ) -> BillingResult<bool>;

    /// Returns `false` when nothing was active
    async fn revert(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
    ) -> BillingResult<bool>;

    async fn is_active(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
    ) -> BillingResult<bool>;
}

/// Order tried after the preferred method when suspending
const FALLBACK_ORDER: [EnforcementMethod; 4] = [
    EnforcementMethod::AddressList,
    EnforcementMethod::Firewall,
    EnforcementMethod::Bandwidth,
    EnforcementMethod::DhcpLease,
];

/// The fixed set of strategies known to the engine
#[derive(Clone)]
pub struct StrategySet {
    strategies: Vec<Arc<dyn SuspensionStrategy>>,
}

impl StrategySet {
    pub fn new(strategies: Vec<Arc<dyn SuspensionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn from_config(config: &EnforcementConfig) -> Self {
        Self::new(vec![
            Arc::new(AddressListBlock::new(config.address_list_name.clone())),
            Arc::new(DhcpLeaseBlock),
            Arc::new(BandwidthThrottle::new(config.bandwidth_limit.clone())),
            Arc::new(FirewallDrop),
        ])
    }

    pub fn get(&self, method: EnforcementMethod) -> Option<Arc<dyn SuspensionStrategy>> {
        self.strategies
            .iter()
            .find(|s| s.method() == method)
            .cloned()
    }

    /// Strategies to try on suspend: the preferred one first, then the
    /// fallbacks, keeping only those the identity can satisfy
    pub fn suspend_plan(
        &self,
        preferred: EnforcementMethod,
        identity: &NetworkIdentity,
    ) -> Vec<Arc<dyn SuspensionStrategy>> {
        let mut order = vec![preferred];
        order.extend(FALLBACK_ORDER.iter().copied().filter(|m| *m != preferred));

        order
            .into_iter()
            .filter_map(|m| self.get(m))
            .filter(|s| s.is_applicable(identity))
            .collect()
    }

    /// Every strategy the identity can satisfy, used on restore
    pub fn applicable(&self, identity: &NetworkIdentity) -> Vec<Arc<dyn SuspensionStrategy>> {
        self.strategies
            .iter()
            .filter(|s| s.is_applicable(identity))
            .cloned()
            .collect()
    }
}

/// Device-side comment carrying the reason and when it was applied
pub(crate) fn block_comment(reason: &str) -> String {
    let stamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    format!("netbill: {} @ {}", reason, stamp)
}

/// Host route form RouterOS expects for queue targets
pub(crate) fn host_prefix(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}/32", v4),
        IpAddr::V6(v6) => format!("{}/128", v6),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use netbill_shared::NetworkDevice;
    use uuid::Uuid;

    use super::NetworkIdentity;
    use crate::device::{DeviceConnector, DeviceSession, InMemoryConnector, InMemoryDevice};

    pub async fn session() -> (Arc<InMemoryDevice>, Box<dyn DeviceSession>) {
        let connector = InMemoryConnector::new();
        let router = NetworkDevice {
            id: Uuid::new_v4(),
            name: "core".to_string(),
            host: "192.168.88.1".to_string(),
            api_port: 8728,
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let session = connector.connect(&router).await.unwrap();
        (connector.device(&router.host).await, session)
    }

    pub fn ip_identity(ip: &str) -> NetworkIdentity {
        NetworkIdentity {
            ip: Some(ip.parse().unwrap()),
            ..Default::default()
        }
    }

    pub fn mac_identity(mac: &str) -> NetworkIdentity {
        NetworkIdentity {
            mac: Some(mac.parse().unwrap()),
            ..Default::default()
        }
    }
}
