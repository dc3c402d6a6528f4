//! DHCP lease block: flags the subscriber's lease with `block-access`

use async_trait::async_trait;
use netbill_shared::EnforcementMethod;

use super::{block_comment, NetworkIdentity, SuspensionStrategy};
use crate::device::{params, row_ids, DeviceSession, Row, ID_KEY};
use crate::error::BillingResult;

const LEASES: &str = "/ip/dhcp-server/lease";

pub struct DhcpLeaseBlock;

impl DhcpLeaseBlock {
    async fn leases(
        &self,
        session: &mut dyn DeviceSession,
        mac: &str,
        blocked_only: bool,
    ) -> BillingResult<Vec<Row>> {
        let mut query = params([("?mac-address", mac)]);
        if blocked_only {
            query.insert("?block-access".to_string(), "yes".to_string());
        }
        session.write(&format!("{}/print", LEASES), &query).await
    }
}

#[async_trait]
impl SuspensionStrategy for DhcpLeaseBlock {
    fn method(&self) -> EnforcementMethod {
        EnforcementMethod::DhcpLease
    }

    fn is_applicable(&self, identity: &NetworkIdentity) -> bool {
        identity.mac.is_some()
    }

    async fn apply(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
        reason: &str,
    ) -> BillingResult<bool> {
        let mac = identity.require_mac(self.method())?.to_string();
        let leases = self.leases(session, &mac, false).await?;
        if leases.is_empty() {
            tracing::debug!(mac = %mac, "No DHCP lease to block");
            return Ok(false);
        }

        let comment = block_comment(reason);
        for lease in &leases {
            let Some(id) = lease.get(ID_KEY) else {
                continue;
            };
            if lease.get("block-access").map(String::as_str) == Some("yes") {
                continue;
            }
            session
                .write(
                    &format!("{}/set", LEASES),
                    &params([
                        (ID_KEY, id.as_str()),
                        ("block-access", "yes"),
                        ("comment", comment.as_str()),
                    ]),
                )
                .await?;
        }
        Ok(true)
    }

    async fn revert(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
    ) -> BillingResult<bool> {
        let mac = identity.require_mac(self.method())?.to_string();
        let ids = row_ids(&self.leases(session, &mac, true).await?);
        for id in &ids {
            session
                .write(
                    &format!("{}/set", LEASES),
                    &params([
                        (ID_KEY, id.as_str()),
                        ("block-access", "no"),
                        ("comment", ""),
                    ]),
                )
                .await?;
        }
        Ok(!ids.is_empty())
    }

    async fn is_active(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
    ) -> BillingResult<bool> {
        let mac = identity.require_mac(self.method())?.to_string();
        Ok(!self.leases(session, &mac, true).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::{mac_identity, session};

    #[tokio::test]
    async fn test_missing_lease_is_soft_failure() {
        let (device, mut session) = session().await;
        let identity = mac_identity("aa:bb:cc:00:11:22");

        assert!(!DhcpLeaseBlock
            .apply(session.as_mut(), &identity, "overdue")
            .await
            .unwrap());
        assert_eq!(device.command_count("/ip/dhcp-server/lease/set").await, 0);
    }

    #[tokio::test]
    async fn test_block_and_unblock_lease() {
        let (device, mut session) = session().await;
        device
            .seed(
                LEASES,
                params([("mac-address", "AA:BB:CC:00:11:22"), ("address", "10.0.1.20")]),
            )
            .await;
        let identity = mac_identity("aa-bb-cc-00-11-22");

        assert!(DhcpLeaseBlock
            .apply(session.as_mut(), &identity, "overdue")
            .await
            .unwrap());
        assert!(DhcpLeaseBlock
            .apply(session.as_mut(), &identity, "overdue")
            .await
            .unwrap());
        // Second apply saw the lease already blocked
        assert_eq!(device.command_count("/ip/dhcp-server/lease/set").await, 1);
        assert!(DhcpLeaseBlock
            .is_active(session.as_mut(), &identity)
            .await
            .unwrap());

        assert!(DhcpLeaseBlock
            .revert(session.as_mut(), &identity)
            .await
            .unwrap());
        let lease = &device.rows(LEASES).await[0];
        assert_eq!(lease.get("block-access").map(String::as_str), Some("no"));
        assert_eq!(lease.get("comment").map(String::as_str), Some(""));

        assert!(!DhcpLeaseBlock
            .revert(session.as_mut(), &identity)
            .await
            .unwrap());
    }
}
