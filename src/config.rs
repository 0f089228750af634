use crate::retry::RetryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_WORKER: &str = "worker0";

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_workers")]
    pub workers: Vec<String>,
    #[serde(default)]
    pub feed: FeedSettings,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            delivery: DeliveryConfig::default(),
            store: StoreConfig::default(),
            workers: default_workers(),
            feed: FeedSettings::default(),
        }
    }
}

impl FeedConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder(File::with_name("config/local").required(false))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::builder(File::from(path.as_ref()).required(true))
    }

    fn builder<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("AMQP_FEED")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("workers"),
            )
            .build()?
            .try_deserialize()
    }
}

/// Location of the trigger-invocation API.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_router_host")]
    pub host: String,
    #[serde(default = "default_router_scheme")]
    pub scheme: String,
    #[serde(default = "default_router_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: default_router_host(),
            scheme: default_router_scheme(),
            port: default_router_port(),
            accept_invalid_certs: true,
        }
    }
}

impl RouterConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay", deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_delivery_attempts(),
            retry_delay: default_retry_delay(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_delay)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Couchdb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_store_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay", deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            database: default_database(),
            max_attempts: default_store_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_delay)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_credit")]
    pub default_credit: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            default_credit: default_credit(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(text: &str) -> Result<Duration, humantime::DurationError> {
    let trimmed = text.trim();
    match trimmed.parse::<u64>() {
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(_) => humantime::parse_duration(trimmed),
    }
}

fn default_workers() -> Vec<String> {
    vec![DEFAULT_WORKER.to_string()]
}

fn default_router_host() -> String {
    "localhost".to_string()
}

fn default_router_scheme() -> String {
    "https".to_string()
}

fn default_router_port() -> u16 {
    443
}

fn default_true() -> bool {
    true
}

fn default_delivery_attempts() -> u32 {
    10
}

fn default_store_attempts() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_database() -> String {
    "amqp_triggers".to_string()
}

fn default_credit() -> u32 {
    10
}
