//! Node RPC Client
//!
//! Enumerates transaction hashes and block timestamps from an Ethereum node over HTTP.
//! Connectivity is checked when the client is built so an unreachable endpoint surfaces
//! as a configuration problem instead of a failure deep inside a run.

use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Block, BlockNumberOrTag, BlockTransactionsKind};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

/// Alloy provider type used for the node endpoint
pub type HttpProvider = RootProvider<Http<Client>>;

/// Errors that can occur while talking to the node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Invalid node URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Node unreachable: {0}")]
    Connectivity(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),
}

/// Read-side capabilities the scraper needs from a node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Cheap round trip used to detect a dead endpoint before a run starts
    async fn check_connectivity(&self) -> Result<u64, NodeError>;

    /// Transaction hashes of a block, in block order, as `0x`-prefixed lowercase hex
    async fn transaction_hashes(&self, block_number: u64) -> Result<Vec<String>, NodeError>;

    /// Unix timestamp of a block
    async fn block_timestamp(&self, block_number: u64) -> Result<u64, NodeError>;
}

/// Validate that a string looks like an HTTP(S) node endpoint
pub fn validate_node_url(url: &str) -> Result<reqwest::Url, NodeError> {
    let invalid = |reason: String| NodeError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    if url.trim().is_empty() {
        return Err(invalid("URL cannot be empty".to_string()));
    }

    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{}', expected http or https", other))),
    }
}

/// Node client backed by an alloy HTTP provider
pub struct RpcNodeClient {
    provider: HttpProvider,
    url: String,
}

impl RpcNodeClient {
    /// Build a client for `url` and verify the node answers.
    pub async fn connect(url: &str) -> Result<Self, NodeError> {
        let parsed = validate_node_url(url)?;

        info!("Connecting to node at {}", parsed.as_str());
        let client = Self {
            provider: ProviderBuilder::new().on_http(parsed),
            url: url.to_string(),
        };

        let head = client.check_connectivity().await?;
        info!(head, "Node connection established");

        Ok(client)
    }

    /// Get the endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn block_header_only(&self, block_number: u64) -> Result<Block, NodeError> {
        self.provider
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .map_err(|e| NodeError::Connectivity(e.to_string()))?
            .ok_or(NodeError::BlockNotFound(block_number))
    }
}

#[async_trait]
impl NodeClient for RpcNodeClient {
    async fn check_connectivity(&self) -> Result<u64, NodeError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| NodeError::Connectivity(e.to_string()))
    }

    async fn transaction_hashes(&self, block_number: u64) -> Result<Vec<String>, NodeError> {
        let block = self.block_header_only(block_number).await?;

        let hashes: Vec<String> = block
            .transactions
            .as_hashes()
            .map(|hashes| hashes.iter().map(|h| format!("{:#x}", h)).collect())
            .unwrap_or_default();

        debug!(block = block_number, count = hashes.len(), "Listed block transactions");
        Ok(hashes)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, NodeError> {
        let block = self.block_header_only(block_number).await?;
        Ok(block.header.timestamp)
    }
}
