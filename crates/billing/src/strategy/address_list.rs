//! Address-list block
//!
//! The subscriber's address goes onto a named firewall address-list. Two drop
//! filter rules (forward and input) keyed on that list are created lazily the
//! first time anything is blocked on a device.

use async_trait::async_trait;
use netbill_shared::EnforcementMethod;

use super::{block_comment, NetworkIdentity, SuspensionStrategy};
use crate::device::{params, row_ids, DeviceSession, Row, ID_KEY};
use crate::error::BillingResult;

const ADDRESS_LIST: &str = "/ip/firewall/address-list";
const FILTER: &str = "/ip/firewall/filter";
const DROP_CHAINS: [&str; 2] = ["forward", "input"];

pub struct AddressListBlock {
    list: String,
}

impl AddressListBlock {
    pub fn new(list: impl Into<String>) -> Self {
        Self { list: list.into() }
    }

    async fn ensure_drop_rules(&self, session: &mut dyn DeviceSession) -> BillingResult<()> {
        for chain in DROP_CHAINS {
            let existing = session
                .write(
                    &format!("{}/print", FILTER),
                    &params([
                        ("?chain", chain),
                        ("?src-address-list", self.list.as_str()),
                        ("?action", "drop"),
                    ]),
                )
                .await?;

            if existing.is_empty() {
                session
                    .write(
                        &format!("{}/add", FILTER),
                        &params([
                            ("chain", chain),
                            ("src-address-list", self.list.as_str()),
                            ("action", "drop"),
                            ("comment", "netbill: drop suspended subscribers"),
                        ]),
                    )
                    .await?;
                tracing::info!(list = %self.list, chain = chain, "Created address-list drop rule");
            }
        }
        Ok(())
    }

    async fn entries(
        &self,
        session: &mut dyn DeviceSession,
        address: &str,
    ) -> BillingResult<Vec<Row>> {
        session
            .write(
                &format!("{}/print", ADDRESS_LIST),
                &params([("?list", self.list.as_str()), ("?address", address)]),
            )
            .await
    }
}

#[async_trait]
impl SuspensionStrategy for AddressListBlock {
    fn method(&self) -> EnforcementMethod {
        EnforcementMethod::AddressList
    }

    fn is_applicable(&self, identity: &NetworkIdentity) -> bool {
        identity.ip.is_some()
    }

    async fn apply(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
        reason: &str,
    ) -> BillingResult<bool> {
        let address = identity.require_ip(self.method())?.to_string();
        self.ensure_drop_rules(session).await?;

        if !self.entries(session, &address).await?.is_empty() {
            return Ok(true);
        }

        let comment = block_comment(reason);
        session
            .write(
                &format!("{}/add", ADDRESS_LIST),
                &params([
                    ("list", self.list.as_str()),
                    ("address", address.as_str()),
                    ("comment", comment.as_str()),
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
        // Earlier races may have left more than one entry
        let ids = row_ids(&self.entries(session, &address).await?);
        for id in &ids {
            session
                .write(
                    &format!("{}/remove", ADDRESS_LIST),
                    &params([(ID_KEY, id.as_str())]),
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
        let address = identity.require_ip(self.method())?.to_string();
        Ok(!self.entries(session, &address).await?.is_empty())
    }
}
