use bookstore_core::PaymentMethod;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
}

/// Which part of the choreography this process runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    Order,
    Payment,
    Catalog,
    #[default]
    All,
}

impl ServiceRole {
    pub fn runs_orders(self) -> bool {
        matches!(self, ServiceRole::Order | ServiceRole::All)
    }

    pub fn runs_payments(self) -> bool {
        matches!(self, ServiceRole::Payment | ServiceRole::All)
    }

    pub fn runs_catalog(self) -> bool {
        matches!(self, ServiceRole::Catalog | ServiceRole::All)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default)]
    pub role: ServiceRole,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            role: ServiceRole::default(),
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Postgres connection string, or `memory` for in-process stores.
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_DATABASE
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    MEMORY_DATABASE.into()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Memory,
    Kafka,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default)]
    pub kind: BrokerKind,
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            brokers: default_brokers(),
            group_id: default_group_id(),
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".into()
}

fn default_group_id() -> String {
    "bookstore".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedBook {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub price: Decimal,
    pub stock: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Base URL of the catalog service, used when it runs in another process.
    #[serde(default = "default_catalog_url")]
    pub url: String,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_ms: u64,
    /// Books loaded into the in-memory catalog at startup.
    #[serde(default)]
    pub seed: Vec<SeedBook>,
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            timeout_ms: default_catalog_timeout(),
            seed: Vec::new(),
        }
    }
}

fn default_catalog_url() -> String {
    "http://localhost:8081".into()
}

fn default_catalog_timeout() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsumerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    500
}

fn default_reconnect_initial() -> u64 {
    200
}

fn default_reconnect_max() -> u64 {
    10_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutboxConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval(),
            lease_seconds: default_lease_seconds(),
        }
    }
}

fn default_batch_size() -> i64 {
    50
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_lease_seconds() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaymentConfig {
    #[serde(default)]
    pub method: PaymentMethod,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `BOOKSTORE__SERVICE__ROLE=payment`
            .add_source(config::Environment::with_prefix("BOOKSTORE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_yields_single_process_defaults() {
        let config: Config = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.service.role, ServiceRole::All);
        assert!(config.database.is_memory());
        assert_eq!(config.broker.kind, BrokerKind::Memory);
        assert_eq!(config.consumer.max_attempts, 5);
        assert_eq!(config.payment.method, PaymentMethod::PayPal);
        assert_eq!(config.catalog.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_sections_override_defaults() {
        let toml = r#"
            [service]
            role = "payment"
            port = 9000

            [broker]
            kind = "kafka"
            brokers = "kafka:9092"

            [payment]
            method = "Stripe"

            [[catalog.seed]]
            id = 7
            title = "Dune"
            author = "Frank Herbert"
            price = 10.0
            stock = 3
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.service.role, ServiceRole::Payment);
        assert!(config.service.role.runs_payments());
        assert!(!config.service.role.runs_orders());
        assert_eq!(config.service.port, 9000);
        assert_eq!(config.broker.kind, BrokerKind::Kafka);
        assert_eq!(config.payment.method, PaymentMethod::Stripe);
        assert_eq!(config.catalog.seed[0].price, Decimal::new(10, 0));
        assert_eq!(config.outbox.lease_seconds, 30);
    }
}
