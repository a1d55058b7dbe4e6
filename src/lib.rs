//! Ethscrape Library
//!
//! This crate provides components for scraping confirmed Ethereum transactions from a
//! bounded block range, normalizing them into flat records, and storing them in Postgres.

pub mod assembler;
pub mod config;
pub mod etherscan;
pub mod filter;
pub mod node;
pub mod scraper;
pub mod store;
pub mod units;

// Re-export commonly used types
pub use assembler::{assemble, AssemblyError, TransactionRecord, TxAction, TxStatus};
pub use config::{ConfigError, ScraperConfig};
pub use etherscan::{EtherscanClient, IndexApi, IndexApiError, Lookup, RawReceipt, RawTransaction};
pub use filter::{AmountMode, FilterError, TransactionFilter};
pub use node::{NodeClient, NodeError, RpcNodeClient};
pub use scraper::{BlockFailurePolicy, RunState, ScrapeError, ScrapePolicy, ScrapeSummary, Scraper};
pub use store::{PgTransactionStore, SaveOutcome, StoreError, TransactionQuery, TransactionStore};
