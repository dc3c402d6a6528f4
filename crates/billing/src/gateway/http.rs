//! HTTP gateway client for Tripay-style transaction detail lookups

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;

use super::{GatewayClient, GatewayStatus, GatewayTransactionStatus};
use crate::config::GatewayConfig;
use crate::error::{BillingError, BillingResult};

#[derive(Debug, Deserialize)]
struct DetailResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<DetailData>,
}

#[derive(Debug, Deserialize)]
struct DetailData {
    reference: String,
    status: String,
    amount: i64,
    #[serde(default)]
    payment_method: Option<String>,
    /// Unix seconds
    #[serde(default)]
    paid_at: Option<i64>,
}

pub struct HttpGatewayClient {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: String,
}

impl HttpGatewayClient {
    pub fn new(config: &GatewayConfig) -> BillingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_transaction_status(
        &self,
        reference: &str,
    ) -> BillingResult<GatewayTransactionStatus> {
        let url = format!("{}/transaction/detail", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("reference", reference)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::GatewayHttp(format!(
                "{} returned {} for {}: {}",
                self.name,
                status,
                reference,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: DetailResponse = response.json().await?;
        if !body.success {
            return Err(BillingError::GatewayResponse(format!(
                "{} rejected lookup of {}: {}",
                self.name,
                reference,
                body.message.unwrap_or_default()
            )));
        }

        let data = body.data.ok_or_else(|| {
            BillingError::GatewayResponse(format!("{} sent no data for {}", self.name, reference))
        })?;

        let gateway_status = data
            .status
            .parse::<GatewayStatus>()
            .map_err(BillingError::GatewayResponse)?;

        let paid_at = match data.paid_at {
            Some(ts) if ts > 0 => Some(OffsetDateTime::from_unix_timestamp(ts).map_err(|e| {
                BillingError::GatewayResponse(format!("invalid paid_at {}: {}", ts, e))
            })?),
            _ => None,
        };

        Ok(GatewayTransactionStatus {
            reference: data.reference,
            status: gateway_status,
            amount: data.amount,
            payment_method: data.payment_method.filter(|m| !m.is_empty()),
            paid_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    fn client(base_url: String) -> HttpGatewayClient {
        HttpGatewayClient::new(&GatewayConfig {
            name: "tripay".to_string(),
            base_url,
            api_key: "DEV-key".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_paid_transaction_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/transaction/detail")
            .match_query(Matcher::UrlEncoded("reference".into(), "TX123".into()))
            .match_header("authorization", "Bearer DEV-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success":true,"message":"","data":{"reference":"TX123","merchant_ref":"INV-1","payment_method":"QRIS","amount":50000,"status":"PAID","paid_at":1735689600}}"#,
            )
            .create_async()
            .await;

        let status = client(server.url())
            .get_transaction_status("TX123")
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(status.status, GatewayStatus::Paid);
        assert_eq!(status.amount, 50_000);
        assert_eq!(status.payment_method.as_deref(), Some("QRIS"));
        assert_eq!(status.paid_at.unwrap().unix_timestamp(), 1_735_689_600);
    }

    #[tokio::test]
    async fn test_unpaid_without_paid_at() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/transaction/detail")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"success":true,"data":{"reference":"TX9","amount":75000,"status":"UNPAID","paid_at":null}}"#,
            )
            .create_async()
            .await;

        let status = client(server.url())
            .get_transaction_status("TX9")
            .await
            .unwrap();
        assert_eq!(status.status, GatewayStatus::Unpaid);
        assert!(status.paid_at.is_none());
        assert!(status.payment_method.is_none());
    }

    #[tokio::test]
    async fn test_error_responses() {
        let mut server = mockito::Server::new_async().await;
        let _unavailable = server
            .mock("GET", "/transaction/detail")
            .match_query(Matcher::UrlEncoded("reference".into(), "TX-502".into()))
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;
        let _rejected = server
            .mock("GET", "/transaction/detail")
            .match_query(Matcher::UrlEncoded("reference".into(), "TX-404".into()))
            .with_status(200)
            .with_body(r#"{"success":false,"message":"Transaction not found","data":null}"#)
            .create_async()
            .await;
        let _unknown = server
            .mock("GET", "/transaction/detail")
            .match_query(Matcher::UrlEncoded("reference".into(), "TX-ODD".into()))
            .with_status(200)
            .with_body(
                r#"{"success":true,"data":{"reference":"TX-ODD","amount":1,"status":"SETTLED"}}"#,
            )
            .create_async()
            .await;

        let gateway = client(server.url());

        let err = gateway.get_transaction_status("TX-502").await.unwrap_err();
        assert!(matches!(err, BillingError::GatewayHttp(_)));
        assert!(err.is_connectivity());

        let err = gateway.get_transaction_status("TX-404").await.unwrap_err();
        assert!(matches!(err, BillingError::GatewayResponse(ref m) if m.contains("not found")));

        let err = gateway.get_transaction_status("TX-ODD").await.unwrap_err();
        assert!(matches!(err, BillingError::GatewayResponse(_)));
    }
}
