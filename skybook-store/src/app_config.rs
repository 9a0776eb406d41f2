use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_payment_window")]
    pub payment_window_minutes: u64,
    /// How long past its deadline a pending booking may sit before the
    /// reconciler expires it.
    #[serde(default = "default_expiry_grace")]
    pub expiry_grace_seconds: u64,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,
}

fn default_payment_window() -> u64 { 15 }
fn default_expiry_grace() -> u64 { 120 }
fn default_reconcile_interval() -> u64 { 60 }

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    pub sweep_interval_ms: u64,
    pub sweep_batch_size: usize,
    pub claim_lease_seconds: u64,
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 1000,
            sweep_batch_size: 100,
            claim_lease_seconds: 30,
            retry_backoff_ms: 200,
            max_retry_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_delay_key")]
    pub delay_queue_key: String,
}

fn default_delay_key() -> String { "skybook:delayed".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub dead_letter_topic: String,
    #[serde(default = "default_message_timeout")]
    pub message_timeout_ms: u64,
}

fn default_message_timeout() -> u64 { 5000 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local, uncommitted overrides
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `SKYBOOK_DATABASE__URL=postgres://...` sets `database.url`
            .add_source(config::Environment::with_prefix("SKYBOOK").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn payment_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.business_rules.payment_window_minutes as i64)
    }
}
