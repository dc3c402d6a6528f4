//! Bandwidth throttle: a simple queue pinning the address to a minimal rate

use std::net::IpAddr;

use async_trait::async_trait;
use netbill_shared::EnforcementMethod;

use super::{block_comment, host_prefix, NetworkIdentity, SuspensionStrategy};
use crate::device::{params, row_ids, DeviceSession, Row, ID_KEY};
use crate::error::BillingResult;

const QUEUES: &str = "/queue/simple";

pub struct BandwidthThrottle {
    max_limit: String,
}

impl BandwidthThrottle {
    pub fn new(max_limit: impl Into<String>) -> Self {
        Self {
            max_limit: max_limit.into(),
        }
    }

    /// Queue name derived from the address, so lookups are by name
    pub fn queue_name(ip: IpAddr) -> String {
        format!("netbill-throttle-{}", ip)
    }

    async fn queues(&self, session: &mut dyn DeviceSession, name: &str) -> BillingResult<Vec<Row>> {
        session
            .write(&format!("{}/print", QUEUES), &params([("?name", name)]))
            .await
    }
}

#[async_trait]
impl SuspensionStrategy for BandwidthThrottle {
    fn method(&self) -> EnforcementMethod {
        EnforcementMethod::Bandwidth
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
        let ip = identity.require_ip(self.method())?;
        let name = Self::queue_name(ip);
        if !self.queues(session, &name).await?.is_empty() {
            return Ok(true);
        }

        let target = host_prefix(ip);
        let comment = block_comment(reason);
        session
            .write(
                &format!("{}/add", QUEUES),
                &params([
                    ("name", name.as_str()),
                    ("target", target.as_str()),
                    ("max-limit", self.max_limit.as_str()),
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
        let ip = identity.require_ip(self.method())?;
        let ids = row_ids(&self.queues(session, &Self::queue_name(ip)).await?);
        for id in &ids {
            session
                .write(&format!("{}/remove", QUEUES), &params([(ID_KEY, id.as_str())]))
                .await?;
        }
        Ok(!ids.is_empty())
    }

    async fn is_active(
        &self,
        session: &mut dyn DeviceSession,
        identity: &NetworkIdentity,
    ) -> BillingResult<bool> {
        let ip = identity.require_ip(self.method())?;
        Ok(!self.queues(session, &Self::queue_name(ip)).await?.is_empty())
    }
}
