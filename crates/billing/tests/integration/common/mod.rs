//! Shared harness: the full engine over in-memory store, devices and gateway

#![allow(dead_code)]

use std::sync::Arc;

use netbill_billing::device::ID_KEY;
use netbill_billing::{
    DeviceConnector, EnforcementConfig, EnforcementEngine, InMemoryConnector, InMemoryDevice,
    InMemoryGateway, InMemoryStateStore, NetworkIdentity, RecordingNotifier, ShutdownTrigger,
    StrategySet, SuspensionStrategy,
};
use netbill_shared::{
    ConnectionType, Customer, CustomerStatus, GatewayTransaction, Invoice, InvoiceStatus,
    NetworkDevice, TransactionStatus,
};
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

pub const ROUTER_HOST: &str = "192.168.88.1";
pub const ADDRESS_LIST: &str = "/ip/firewall/address-list";

pub struct Harness {
    pub store: Arc<InMemoryStateStore>,
    pub connector: Arc<InMemoryConnector>,
    pub gateway: Arc<InMemoryGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<EnforcementEngine>,
    pub trigger: ShutdownTrigger,
    pub config: EnforcementConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EnforcementConfig::default())
    }

    pub fn with_config(config: EnforcementConfig) -> Self {
        let store = Arc::new(InMemoryStateStore::new());
        let connector = Arc::new(InMemoryConnector::new());
        let gateway = Arc::new(InMemoryGateway::new(config.gateway.name.clone()));
        let notifier = Arc::new(RecordingNotifier::new());
        let (trigger, shutdown) = netbill_billing::shutdown::channel();

        let engine = Arc::new(EnforcementEngine::new(
            config.clone(),
            store.clone(),
            connector.clone(),
            gateway.clone(),
            notifier.clone(),
            shutdown,
        ));

        Self {
            store,
            connector,
            gateway,
            notifier,
            engine,
            trigger,
            config,
        }
    }

    pub fn today(&self) -> Date {
        self.engine.today()
    }

    pub async fn router(&self, host: &str) -> Uuid {
        let device = NetworkDevice {
            id: Uuid::new_v4(),
            name: format!("edge-{}", host),
            host: host.to_string(),
            api_port: 8728,
            username: "netbill".to_string(),
            password: "s3cret".to_string(),
        };
        let id = device.id;
        self.store.insert_device(device).await;
        id
    }

    pub async fn device(&self, host: &str) -> Arc<InMemoryDevice> {
        self.connector.device(host).await
    }

    /// Active static-IP customer on `device_id`
    pub async fn customer(&self, device_id: Uuid, ip: &str) -> Uuid {
        let customer = Customer {
            id: Uuid::new_v4(),
            name: format!("Customer {}", ip),
            status: CustomerStatus::Active,
            auto_suspension_enabled: true,
            connection_type: ConnectionType::Static,
            pppoe_username: None,
            ip_address: Some(ip.to_string()),
            mac_address: None,
            device_id: Some(device_id),
            phone: Some("+62811000222".to_string()),
            created_at: OffsetDateTime::now_utc(),
        };
        let id = customer.id;
        self.store.insert_customer(customer).await;
        id
    }

    /// Unpaid invoice that fell due `days_overdue` days ago
    pub async fn overdue_invoice(&self, customer_id: Uuid, days_overdue: i64, amount: i64) -> Uuid {
        let invoice = Invoice {
            id: Uuid::new_v4(),
            customer_id,
            invoice_number: format!("INV-{}", &customer_id.simple().to_string()[..8]),
            amount,
            due_date: self.today() - Duration::days(days_overdue),
            status: InvoiceStatus::Unpaid,
            paid_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let id = invoice.id;
        self.store.insert_invoice(invoice).await;
        id
    }

    /// Pending gateway transaction for `invoice_id`, created a few minutes ago
    pub async fn pending_transaction(&self, invoice_id: Uuid, reference: &str, amount: i64) -> Uuid {
        let created = OffsetDateTime::now_utc() - Duration::minutes(5);
        let tx = GatewayTransaction {
            id: Uuid::new_v4(),
            invoice_id,
            gateway: self.config.gateway.name.clone(),
            order_id: format!("ORD-{}", reference),
            reference: reference.to_string(),
            status: TransactionStatus::Pending,
            amount,
            created_at: created,
            updated_at: created,
        };
        let id = tx.id;
        self.store.insert_transaction(tx).await;
        id
    }

    pub async fn status(&self, customer_id: Uuid) -> CustomerStatus {
        self.store.customer(customer_id).await.map(|c| c.status).unwrap()
    }

    /// Address-list entries for `ip` on the router
    pub async fn blocked_entries(&self, host: &str, ip: &str) -> usize {
        self.device(host)
            .await
            .rows(ADDRESS_LIST)
            .await
            .iter()
            .filter(|r| r.get("address").map(String::as_str) == Some(ip))
            .filter(|r| r.contains_key(ID_KEY))
            .count()
    }

    /// Whether any strategy still reports the identity as blocked
    pub async fn any_block_active(&self, host: &str, identity: &NetworkIdentity) -> bool {
        let router = NetworkDevice {
            id: Uuid::new_v4(),
            name: "probe".to_string(),
            host: host.to_string(),
            api_port: 8728,
            username: "netbill".to_string(),
            password: "s3cret".to_string(),
        };
        let mut session = self.connector.connect(&router).await.unwrap();
        for strategy in StrategySet::from_config(&self.config).applicable(identity) {
            if strategy.is_active(session.as_mut(), identity).await.unwrap() {
                return true;
            }
        }
        false
    }
}
