//! Etherscan Proxy API Client
//!
//! Fetches raw transactions and receipts by hash through the `proxy` module of an
//! Etherscan-compatible indexing API. Every call is one bounded GET request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default Etherscan API endpoint
pub const DEFAULT_API_URL: &str = "https://api.etherscan.io/api";

/// Per-request time budget
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Proxy action for transaction bodies
pub const ACTION_TRANSACTION: &str = "eth_getTransactionByHash";

/// Proxy action for transaction receipts
pub const ACTION_RECEIPT: &str = "eth_getTransactionReceipt";

/// Proxy action used to check reachability
pub const ACTION_BLOCK_NUMBER: &str = "eth_blockNumber";

/// Errors that can occur while calling the index API
#[derive(Error, Debug)]
pub enum IndexApiError {
    #[error("Index API unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed index API payload: {0}")]
    Malformed(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Outcome of a lookup that reached the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    /// Provider had no usable result for the hash
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// Transaction object as returned by `eth_getTransactionByHash`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: Option<String>,
    pub block_number: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    pub gas_price: Option<String>,
    pub input: Option<String>,
}

/// Receipt object as returned by `eth_getTransactionReceipt`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub status: Option<String>,
    pub gas_used: Option<String>,
    pub cumulative_gas_used: Option<String>,
}

/// Response envelope shared by all Etherscan modules
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl ProxyEnvelope {
    /// Interpret the envelope for a lookup.
    ///
    /// A provider error status (`"0"`), a missing or null `result`, or a string `result`
    /// (how Etherscan reports errors such as rate limiting) all mean the hash is not
    /// available. An object that does not fit `T` is malformed.
    pub fn into_lookup<T: DeserializeOwned>(self) -> Result<Lookup<T>, IndexApiError> {
        if self.status.as_deref() == Some("0") {
            debug!(message = ?self.message, "Provider reported error status");
            return Ok(Lookup::NotFound);
        }

        match self.result {
            Some(value @ serde_json::Value::Object(_)) => serde_json::from_value(value)
                .map(Lookup::Found)
                .map_err(|e| IndexApiError::Malformed(e.to_string())),
            Some(serde_json::Value::String(text)) => {
                debug!(result = %text, "Provider returned text instead of an object");
                Ok(Lookup::NotFound)
            }
            _ => Ok(Lookup::NotFound),
        }
    }
}

/// Lookup capabilities the scraper needs from the index API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexApi: Send + Sync {
    /// Round trip that fails only when the API cannot be reached at all
    async fn check_connectivity(&self) -> Result<(), IndexApiError>;

    async fn transaction_by_hash(&self, hash: &str) -> Result<Lookup<RawTransaction>, IndexApiError>;

    async fn transaction_receipt(&self, hash: &str) -> Result<Lookup<RawReceipt>, IndexApiError>;
}

/// HTTP client for the Etherscan proxy module
#[derive(Clone)]
pub struct EtherscanClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for EtherscanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtherscanClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl EtherscanClient {
    /// Create a client with the standard request timeout
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, IndexApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| IndexApiError::Client(e.to_string()))?;

        Ok(Self::with_http_client(http, base_url, api_key))
    }

    /// Create a client around an existing `reqwest::Client`
    pub fn with_http_client(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, query: &[(&str, &str)]) -> Result<reqwest::Response, IndexApiError> {
        self.http
            .get(&self.base_url)
            .query(query)
            .send()
            .await
            .map_err(|e| IndexApiError::Unavailable(e.without_url().to_string()))
    }

    async fn proxy_call<T: DeserializeOwned>(&self, action: &str, hash: &str) -> Result<Lookup<T>, IndexApiError> {
        let response = self
            .send(&[
                ("module", "proxy"),
                ("action", action),
                ("txhash", hash),
                ("apikey", self.api_key.as_str()),
            ])
            .await?;

        if !response.status().is_success() {
            debug!(hash, action, status = %response.status(), "Non-success HTTP status");
            return Ok(Lookup::NotFound);
        }

        let envelope: ProxyEnvelope = response.json().await.map_err(|e| {
            if e.is_decode() {
                IndexApiError::Malformed(e.to_string())
            } else {
                IndexApiError::Unavailable(e.without_url().to_string())
            }
        })?;

        envelope.into_lookup()
    }
}

#[async_trait]
impl IndexApi for EtherscanClient {
    async fn check_connectivity(&self) -> Result<(), IndexApiError> {
        let response = self
            .send(&[
                ("module", "proxy"),
                ("action", ACTION_BLOCK_NUMBER),
                ("apikey", self.api_key.as_str()),
            ])
            .await?;

        debug!(status = %response.status(), "Index API reachable");
        Ok(())
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Lookup<RawTransaction>, IndexApiError> {
        self.proxy_call(ACTION_TRANSACTION, hash).await
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Lookup<RawReceipt>, IndexApiError> {
        self.proxy_call(ACTION_RECEIPT, hash).await
    }
}
