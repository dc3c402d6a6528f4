//! Firewall drop: a dedicated forward-chain drop rule for the source address

use std::net::IpAddr;

use async_trait::async_trait;
use netbill_shared::EnforcementMethod;

use super::{NetworkIdentity, SuspensionStrategy};
use crate::device::{params, row_ids, DeviceSession, ID_KEY};
use crate::error::BillingResult;

const FILTER: &str = "/ip/firewall/filter";

pub struct FirewallDrop;

impl FirewallDrop {
    pub fn rule_name(ip: IpAddr) -> String {
        format!("netbill-drop-{}", ip)
    }
}

#[async_trait]
impl SuspensionStrategy for FirewallDrop {
    fn method(&self) -> EnforcementMethod {
        EnforcementMethod::Firewall
    }

    fn is_applicable(&self, identity: &NetworkIdentity) -> bool {
        identity.ip.is_some()
    }

    async fn apply(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
        _reason: &str,
    ) -> BillingResult<bool> {
        let ip = identity.require_ip(self.method())?;
        let address = ip.to_string();
        let existing = session
            .write(
                &format!("{}/print", FILTER),
                &params([
                    ("?chain", "forward"),
                    ("?action", "drop"),
                    ("?src-address", address.as_str()),
                ]),
            )
            .await?;
        if !existing.is_empty() {
            return Ok(true);
        }

        // The comment doubles as the rule's deterministic name
        let name = Self::rule_name(ip);
        session
            .write(
                &format!("{}/add", FILTER),
                &params([
                    ("chain", "forward"),
                    ("action", "drop"),
                    ("src-address", address.as_str()),
                    ("comment", name.as_str()),
                ]),
            )
            .await?;
        Ok(true)
    }

    async fn revert(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
    ) -> BillingResult<bool> {
        let address = identity.require_ip(self.method())?.to_string();
        let rules = session
            .write(
                &format!("{}/print", FILTER),
                &params([("?action", "drop"), ("?src-address", address.as_str())]),
            )
            .await?;

        let ids = row_ids(&rules);
        for id in &ids {
            session
                .write(&format!("{}/remove", FILTER), &params([(ID_KEY, id.as_str())]))
                .await?;
        }
        Ok(!ids.is_empty())
    }

    async fn is_active(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
    ) -> BillingResult<bool> {
        let address = identity.require_ip(self.method())?.to_string();
        let rules = session
            .write(
                &format!("{}/print", FILTER),
                &params([("?action", "drop"), ("?src-address", address.as_str())]),
            )
            .await?;
        Ok(!rules.is_empty())
    }
}
