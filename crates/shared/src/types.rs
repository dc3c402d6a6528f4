//! Common types used across NetBill

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::NetbillError;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle status of a subscriber account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Suspended,
    Inactive,
}

impl Default for CustomerStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl std::str::FromStr for CustomerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "inactive" => Ok(Self::Inactive),
            _ => Err(format!("Invalid customer status: {}", s)),
        }
    }
}

/// How the subscriber reaches the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// PPPoE dial-in, identified by username; IP assigned per session
    Pppoe,
    /// Statically addressed
    Static,
    /// Addressed through a DHCP lease
    Dhcp,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pppoe => write!(f, "pppoe"),
            Self::Static => write!(f, "static"),
            Self::Dhcp => write!(f, "dhcp"),
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pppoe" => Ok(Self::Pppoe),
            "static" => Ok(Self::Static),
            "dhcp" => Ok(Self::Dhcp),
            _ => Err(format!("Invalid connection type: {}", s)),
        }
    }
}

/// Invoice status. `paid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Cancelled,
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaid => write!(f, "unpaid"),
            Self::Paid => write!(f, "paid"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid invoice status: {}", s)),
        }
    }
}

/// Local status of a payment-gateway transaction.
/// `success` and `failed` are terminal and never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

/// Network-level mechanism used to deny or degrade a subscriber's access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMethod {
    /// Source address placed on a firewall address-list that is dropped
    AddressList,
    /// DHCP lease flagged with block-access
    DhcpLease,
    /// Simple queue throttling the address to a minimal rate
    Bandwidth,
    /// Dedicated drop filter rule for the source address
    Firewall,
}

impl EnforcementMethod {
    pub const ALL: [EnforcementMethod; 4] = [
        Self::AddressList,
        Self::DhcpLease,
        Self::Bandwidth,
        Self::Firewall,
    ];
}

impl std::fmt::Display for EnforcementMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddressList => write!(f, "address_list"),
            Self::DhcpLease => write!(f, "dhcp_lease"),
            Self::Bandwidth => write!(f, "bandwidth"),
            Self::Firewall => write!(f, "firewall"),
        }
    }
}

impl std::str::FromStr for EnforcementMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "address_list" => Ok(Self::AddressList),
            "dhcp_lease" | "dhcp" => Ok(Self::DhcpLease),
            "bandwidth" | "queue" => Ok(Self::Bandwidth),
            "firewall" => Ok(Self::Firewall),
            _ => Err(format!("Invalid enforcement method: {}", s)),
        }
    }
}

/// Direction of an enforcement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SuspensionAction {
    Suspend,
    Restore,
}

impl std::fmt::Display for SuspensionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suspend => write!(f, "suspend"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// What a single strategy call achieved on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Applied,
    Reverted,
    /// Nothing to act on (no lease found, nothing to revert)
    NotActive,
    Failed,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Reverted => write!(f, "reverted"),
            Self::NotActive => write!(f, "not_active"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Value Types
// =============================================================================

/// Hardware address normalised to the upper-case, colon-separated form
/// RouterOS reports in lease tables (e.g. `AA:BB:CC:00:11:22`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for MacAddress {
    type Err = NetbillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(NetbillError::Validation(format!(
                "Invalid MAC address: {}",
                s
            )));
        }

        let upper = hex.to_ascii_uppercase();
        let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
        Ok(Self(octets.join(":")))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = NetbillError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Subscriber account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub status: CustomerStatus,
    pub auto_suspension_enabled: bool,
    pub connection_type: ConnectionType,
    pub pppoe_username: Option<String>,
    /// Static address, stored as text
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    /// Enforcement target this subscriber hangs off
    pub device_id: Option<Uuid>,
    pub phone: Option<String>,
    pub created_at: OffsetDateTime,
}

impl Customer {
    /// Parsed static address. Unparseable values are treated as absent.
    pub fn static_ip(&self) -> Option<IpAddr> {
        self.ip_address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
    }

    /// Parsed hardware address. Unparseable values are treated as absent.
    pub fn mac(&self) -> Option<MacAddress> {
        self.mac_address
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| s.parse().ok())
    }

    pub fn pppoe_user(&self) -> Option<&str> {
        self.pppoe_username
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_suspended(&self) -> bool {
        self.status == CustomerStatus::Suspended
    }
}

/// Billing invoice
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub invoice_number: String,
    pub amount: i64,
    /// Immutable once issued
    pub due_date: Date,
    pub status: InvoiceStatus,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Recorded payment. `(invoice_id, reference_number)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: i64,
    pub payment_method: String,
    /// Gateway transaction reference or manual reference
    pub reference_number: String,
    pub payment_date: OffsetDateTime,
}

/// Payment to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub invoice_id: Uuid,
    pub amount: i64,
    pub payment_method: String,
    pub reference_number: String,
    pub payment_date: OffsetDateTime,
}

/// Payment intent created at an external gateway
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GatewayTransaction {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub gateway: String,
    pub order_id: String,
    /// Gateway-side reference used for status lookups
    pub reference: String,
    pub status: TransactionStatus,
    pub amount: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Network enforcement target (router) with API credentials
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct NetworkDevice {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub api_port: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl NetworkDevice {
    /// `host:port` for socket connections
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.api_port)
    }

    /// Whether enough credentials are present to attempt a login
    pub fn has_credentials(&self) -> bool {
        !self.host.trim().is_empty() && !self.username.trim().is_empty() && self.api_port > 0
    }
}

impl std::fmt::Debug for NetworkDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("api_port", &self.api_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Audit record for one strategy call against a device
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SuspensionAttempt {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub action: SuspensionAction,
    pub method: EnforcementMethod,
    pub target_ip: Option<String>,
    pub target_mac: Option<String>,
    pub outcome: AttemptOutcome,
    pub message: Option<String>,
    pub created_at: OffsetDateTime,
}
