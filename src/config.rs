//! Environment Configuration
//!
//! Reads endpoints, credentials and pacing policy once at startup. Values are passed
//! down explicitly; nothing re-reads the environment during a run.

use std::time::Duration;

use thiserror::Error;

use crate::etherscan::DEFAULT_API_URL;
use crate::scraper::{BlockFailurePolicy, ScrapePolicy};

pub const ENV_API_KEY: &str = "ETHERSCAN_API_KEY";
pub const ENV_API_URL: &str = "ETHERSCAN_API_URL";
pub const ENV_NODE_URL: &str = "WEB3_PROVIDER_URL";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_REQUEST_DELAY_MS: &str = "SCRAPE_REQUEST_DELAY_MS";
pub const ENV_BLOCK_DELAY_MS: &str = "SCRAPE_BLOCK_DELAY_MS";
pub const ENV_ON_BLOCK_FAILURE: &str = "SCRAPE_ON_BLOCK_FAILURE";

/// Default Postgres port when composing a URL from parts
pub const DEFAULT_POSTGRES_PORT: &str = "5432";

/// Errors that can occur while reading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything the scraper needs from its environment
#[derive(Clone, PartialEq, Eq)]
pub struct ScraperConfig {
    pub api_key: String,
    pub api_url: String,
    pub node_url: String,
    pub database_url: String,
    pub policy: ScrapePolicy,
}

impl std::fmt::Debug for ScraperConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperConfig")
            .field("api_url", &self.api_url)
            .field("node_url", &self.node_url)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_millis(name: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match non_empty(raw) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::Invalid {
                name,
                reason: format!("'{}': {}", raw, e),
            }),
    }
}

/// Compose a Postgres URL from `POSTGRES_*` parts
fn compose_database_url<F>(lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let part = |name: &'static str| non_empty(lookup(name)).ok_or(ConfigError::Missing(name));

    let user = part("POSTGRES_USER")?;
    let password = part("POSTGRES_PASSWORD")?;
    let host = part("POSTGRES_HOST")?;
    let db = part("POSTGRES_DB")?;
    let port = non_empty(lookup("POSTGRES_PORT")).unwrap_or_else(|| DEFAULT_POSTGRES_PORT.to_string());

    Ok(format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, db))
}

impl ScraperConfig {
    /// Read configuration from the process environment, after loading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = non_empty(lookup(ENV_API_KEY)).ok_or(ConfigError::Missing(ENV_API_KEY))?;
        let api_url = non_empty(lookup(ENV_API_URL)).unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let node_url = non_empty(lookup(ENV_NODE_URL)).ok_or(ConfigError::Missing(ENV_NODE_URL))?;
        let database_url = match non_empty(lookup(ENV_DATABASE_URL)) {
            Some(url) => url,
            None => compose_database_url(&lookup)?,
        };

        let defaults = ScrapePolicy::default();
        let policy = ScrapePolicy {
            request_delay: parse_millis(ENV_REQUEST_DELAY_MS, lookup(ENV_REQUEST_DELAY_MS), defaults.request_delay)?,
            block_delay: parse_millis(ENV_BLOCK_DELAY_MS, lookup(ENV_BLOCK_DELAY_MS), defaults.block_delay)?,
            on_block_failure: match non_empty(lookup(ENV_ON_BLOCK_FAILURE)) {
                None => defaults.on_block_failure,
                Some(raw) => raw.trim().parse::<BlockFailurePolicy>().map_err(|reason| ConfigError::Invalid {
                    name: ENV_ON_BLOCK_FAILURE,
                    reason,
                })?,
            },
        };

        Ok(Self {
            api_key,
            api_url,
            node_url,
            database_url,
            policy,
        })
    }
}
