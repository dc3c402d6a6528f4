//! Enforcement engine configuration
//!
//! Loaded from environment variables; every option has a default except the
//! gateway credential, which may legitimately be empty in development.

use std::time::Duration;

use netbill_shared::EnforcementMethod;
use time::UtcOffset;

use crate::error::{BillingError, BillingResult};

/// Default number of days past due before enforcement is permitted
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 7;

/// Default look-back window for pending gateway transactions
pub const DEFAULT_RECONCILIATION_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default timeout for device connect and each device command
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for gateway HTTP calls
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for one notification webhook delivery
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Payment gateway settings
#[derive(Clone)]
pub struct GatewayConfig {
    /// Gateway name stored on transactions (e.g. `tripay`)
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Periods for the three workflow timers
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub suspension_interval: Duration,
    pub restoration_interval: Duration,
    pub reconciliation_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            suspension_interval: Duration::from_secs(3600),
            restoration_interval: Duration::from_secs(900),
            reconciliation_interval: Duration::from_secs(300),
        }
    }
}

/// Outbound notification settings
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// When set, notifications are POSTed here as JSON
    pub webhook_url: Option<String>,
    /// HMAC-SHA256 key for the `X-Netbill-Signature` header
    pub webhook_secret: Option<String>,
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }
}

/// Configuration for the enforcement and reconciliation engine
#[derive(Debug, Clone)]
pub struct EnforcementConfig {
    pub grace_period_days: i64,
    /// Global switch; per-customer flags still apply when this is on
    pub auto_suspension_enabled: bool,
    /// Strategy tried first when suspending
    pub suspension_method: EnforcementMethod,
    pub address_list_name: String,
    /// RouterOS max-limit string, e.g. `1k/1k`
    pub bandwidth_limit: String,
    pub reconciliation_window: Duration,
    pub device_timeout: Duration,
    /// Offset used to turn "now" into a calendar date for overdue math
    pub utc_offset: UtcOffset,
    pub restore_on_payment: bool,
    pub attempt_retention_days: i64,
    pub gateway: GatewayConfig,
    pub schedule: ScheduleConfig,
    pub notify: NotifyConfig,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
            auto_suspension_enabled: true,
            suspension_method: EnforcementMethod::AddressList,
            address_list_name: "netbill-suspended".to_string(),
            bandwidth_limit: "1k/1k".to_string(),
            reconciliation_window: DEFAULT_RECONCILIATION_WINDOW,
            device_timeout: DEFAULT_DEVICE_TIMEOUT,
            utc_offset: UtcOffset::UTC,
            restore_on_payment: true,
            attempt_retention_days: 90,
            gateway: GatewayConfig {
                name: "tripay".to_string(),
                base_url: "https://tripay.co.id/api".to_string(),
                api_key: String::new(),
                timeout: DEFAULT_GATEWAY_TIMEOUT,
            },
            schedule: ScheduleConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl EnforcementConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (environment, file, test map)
    pub fn from_lookup<F>(lookup: F) -> BillingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let grace_period_days = parse_or(&get, "GRACE_PERIOD_DAYS", defaults.grace_period_days)?;
        if grace_period_days < 0 {
            return Err(BillingError::Config(
                "GRACE_PERIOD_DAYS must not be negative".to_string(),
            ));
        }

        let suspension_method = match get("SUSPENSION_METHOD") {
            Some(raw) => raw.parse::<EnforcementMethod>().map_err(BillingError::Config)?,
            None => defaults.suspension_method,
        };

        let bandwidth_limit =
            get("SUSPENSION_BANDWIDTH_LIMIT").unwrap_or(defaults.bandwidth_limit);
        if !is_valid_rate(&bandwidth_limit) {
            return Err(BillingError::Config(format!(
                "SUSPENSION_BANDWIDTH_LIMIT is not a valid rate: {}",
                bandwidth_limit
            )));
        }

        let offset_hours: i8 = parse_or(&get, "BILLING_UTC_OFFSET_HOURS", 0)?;
        let utc_offset = UtcOffset::from_hms(offset_hours, 0, 0).map_err(|e| {
            BillingError::Config(format!("BILLING_UTC_OFFSET_HOURS out of range: {}", e))
        })?;

        let window_hours: u64 = parse_or(
            &get,
            "RECONCILIATION_WINDOW_HOURS",
            defaults.reconciliation_window.as_secs() / 3600,
        )?;
        let reconciliation_window = window_hours
            .checked_mul(3600)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                BillingError::Config(format!(
                    "RECONCILIATION_WINDOW_HOURS out of range: {}",
                    window_hours
                ))
            })?;

        Ok(Self {
            grace_period_days,
            auto_suspension_enabled: parse_or(
                &get,
                "AUTO_SUSPENSION_ENABLED",
                defaults.auto_suspension_enabled,
            )?,
            suspension_method,
            address_list_name: get("SUSPENSION_ADDRESS_LIST")
                .unwrap_or(defaults.address_list_name),
            bandwidth_limit,
            reconciliation_window,
            device_timeout: positive_secs(&get, "DEVICE_TIMEOUT_SECS", defaults.device_timeout)?,
            utc_offset,
            restore_on_payment: parse_or(&get, "RESTORE_ON_PAYMENT", defaults.restore_on_payment)?,
            attempt_retention_days: parse_or(
                &get,
                "SUSPENSION_ATTEMPT_RETENTION_DAYS",
                defaults.attempt_retention_days,
            )?,
            gateway: GatewayConfig {
                name: get("PAYMENT_GATEWAY_NAME").unwrap_or(defaults.gateway.name),
                base_url: get("PAYMENT_GATEWAY_BASE_URL")
                    .unwrap_or(defaults.gateway.base_url)
                    .trim_end_matches('/')
                    .to_string(),
                api_key: get("PAYMENT_GATEWAY_API_KEY").unwrap_or_default(),
                timeout: positive_secs(&get, "GATEWAY_TIMEOUT_SECS", defaults.gateway.timeout)?,
            },
            schedule: ScheduleConfig {
                suspension_interval: positive_secs(
                    &get,
                    "SUSPENSION_CHECK_INTERVAL_SECS",
                    defaults.schedule.suspension_interval,
                )?,
                restoration_interval: positive_secs(
                    &get,
                    "RESTORATION_CHECK_INTERVAL_SECS",
                    defaults.schedule.restoration_interval,
                )?,
                reconciliation_interval: positive_secs(
                    &get,
                    "PAYMENT_RECONCILIATION_INTERVAL_SECS",
                    defaults.schedule.reconciliation_interval,
                )?,
            },
            notify: NotifyConfig {
                webhook_url: get("NOTIFY_WEBHOOK_URL"),
                webhook_secret: get("NOTIFY_WEBHOOK_SECRET"),
                timeout: positive_secs(&get, "NOTIFY_TIMEOUT_SECS", defaults.notify.timeout)?,
            },
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> BillingResult<T>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| BillingError::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

/// Whole seconds, rejecting zero
fn positive_secs<G>(get: &G, key: &str, default: Duration) -> BillingResult<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(get, key, default.as_secs())?;
    if secs == 0 {
        return Err(BillingError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_secs(secs))
}

/// Accepts RouterOS rate strings such as `512k`, `1M/1M`, `64000/64000`
pub fn is_valid_rate(rate: &str) -> bool {
    fn single(part: &str) -> bool {
        let digits = part.trim_end_matches(['k', 'K', 'm', 'M', 'g', 'G']);
        part.len() - digits.len() <= 1
            && !digits.is_empty()
            && digits.chars().all(|c| c.is_ascii_digit())
    }

    let mut parts = rate.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(up), None, None) => single(up),
        (Some(up), Some(down), None) => single(up) && single(down),
        _ => false,
    }
}
