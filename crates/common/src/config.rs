//! Application configuration.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use url::Url;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Federation engine configuration.
    #[serde(default)]
    pub federation: FederationConfig,
    /// Outbound HTTP delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Access policy for the bundled server.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Public URL of this instance. Every IRI minted locally lives under it.
    pub url: Url,
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Usernames of the local actors to create at startup.
    #[serde(default)]
    pub actors: Vec<String>,
}

/// Access policy for the bundled server.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Bearer token required for outbox posts and inbox reads. Unset closes both.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Hosts whose actors are refused.
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    /// Collection levels searched when deciding whether to forward.
    #[serde(default = "default_max_inbox_forwarding_depth")]
    pub max_inbox_forwarding_depth: usize,
    /// Collection levels expanded when delivering.
    #[serde(default = "default_max_delivery_depth")]
    pub max_delivery_depth: usize,
}

/// What to do when a Follow for a local actor arrives in an inbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFollow {
    /// Record the pending follow and leave the decision to the application.
    #[default]
    DoNothing,
    /// Accept immediately and send an Accept back to the follower.
    AutoAccept,
    /// Reject immediately and send a Reject back to the follower.
    AutoReject,
}

/// Federation engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Follow handling policy.
    #[serde(default)]
    pub on_follow: OnFollow,
    /// Deliver to a server's shared inbox when the actor advertises one.
    #[serde(default)]
    pub prefer_shared_inbox: bool,
    /// Maximum number of pages read from a single collection.
    #[serde(default = "default_max_collection_pages")]
    pub max_collection_pages: usize,
    /// Page size for inbox/outbox reads when the caller gives none.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Upper bound on a requested page size.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// Maximum concurrent delivery attempts per fan-out.
    #[serde(default = "default_delivery_concurrency")]
    pub delivery_concurrency: usize,
}

/// Outbound HTTP delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Total request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// User agent override.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    /// Upper bound on the retry delay, in milliseconds.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

const fn default_max_inbox_forwarding_depth() -> usize {
    4
}

const fn default_max_delivery_depth() -> usize {
    2
}

const fn default_max_collection_pages() -> usize {
    64
}

const fn default_page_size() -> usize {
    20
}

const fn default_max_page_size() -> usize {
    100
}

const fn default_delivery_concurrency() -> usize {
    16
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_retry_delay_ms() -> u64 {
    500
}

const fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_log_filter() -> String {
    "info,apub_federation=debug".to_string()
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            on_follow: OnFollow::default(),
            prefer_shared_inbox: false,
            max_collection_pages: default_max_collection_pages(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            delivery_concurrency: default_delivery_concurrency(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: None,
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            blocked_domains: Vec::new(),
            max_inbox_forwarding_depth: default_max_inbox_forwarding_depth(),
            max_delivery_depth: default_max_delivery_depth(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `APUB_ENV`)
    /// 4. Environment variables with `APUB__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("APUB_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("APUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("APUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
