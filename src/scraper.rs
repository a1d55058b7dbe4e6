//! Ingestion Orchestrator
//!
//! Walks a bounded block range in ascending order, pulls every transaction through
//! fetch → assemble → filter → save, and keeps the scraped/saved counters. A failure
//! scoped to one hash or one block is logged and skipped; only a node or index API that
//! cannot be reached before the first block aborts the run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::assembler::assemble;
use crate::etherscan::{IndexApi, IndexApiError, Lookup};
use crate::filter::{FilterError, TransactionFilter};
use crate::node::{NodeClient, NodeError};
use crate::store::{SaveOutcome, TransactionStore};

/// Largest number of blocks a single run may cover
pub const MAX_BLOCK_RANGE: u64 = 100;

/// Default pause between upstream calls for one hash
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 250;

/// Default pause between blocks
pub const DEFAULT_BLOCK_DELAY_MS: u64 = 500;

/// Errors that end a run
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Block range must be between 1 and {max} blocks, got {start}-{end}")]
    InvalidRange { start: u64, end: u64, max: u64 },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Node unreachable before the run started: {0}")]
    NodeUnreachable(#[source] NodeError),

    #[error("Index API unreachable before the run started: {0}")]
    IndexApiUnreachable(#[source] IndexApiError),

    #[error("Run aborted at block {block}: {source}")]
    BlockFailed {
        block: u64,
        #[source]
        source: NodeError,
    },
}

impl ScrapeError {
    /// Whether the error came from caller input rather than from upstream
    pub fn is_input_error(&self) -> bool {
        matches!(self, ScrapeError::InvalidRange { .. } | ScrapeError::Filter(_))
    }
}

/// What to do when a block's hashes cannot be listed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockFailurePolicy {
    /// Log and continue with the next block
    #[default]
    Skip,
    /// Stop the run
    Abort,
}

impl FromStr for BlockFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(BlockFailurePolicy::Skip),
            "abort" => Ok(BlockFailurePolicy::Abort),
            other => Err(format!("'{}', expected 'skip' or 'abort'", other)),
        }
    }
}

/// Pacing and failure policy for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapePolicy {
    /// Pause after each upstream call made for a hash
    pub request_delay: Duration,
    /// Pause between blocks
    pub block_delay: Duration,
    pub on_block_failure: BlockFailurePolicy,
}

impl Default for ScrapePolicy {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            block_delay: Duration::from_millis(DEFAULT_BLOCK_DELAY_MS),
            on_block_failure: BlockFailurePolicy::Skip,
        }
    }
}

impl ScrapePolicy {
    /// No pacing, skip failed blocks
    pub fn unpaced() -> Self {
        Self {
            request_delay: Duration::ZERO,
            block_delay: Duration::ZERO,
            on_block_failure: BlockFailurePolicy::Skip,
        }
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running { block: u64 },
    Completed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Running { block } => write!(f, "running (block {})", block),
            RunState::Completed => f.write_str("completed"),
            RunState::Aborted => f.write_str("aborted"),
        }
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    /// Hashes fetched and assembled successfully
    pub scraped: u64,
    /// Records newly written
    pub saved: u64,
    /// Records whose hash was already stored
    pub duplicates: u64,
    /// Assembled records rejected by the filter
    pub filtered_out: u64,
    /// Hashes skipped because of not-found, upstream, assembly or storage failures
    pub failed_hashes: u64,
    /// Blocks whose hashes could not be listed
    pub failed_blocks: u64,
}

/// Check that `[start, end]` covers between 1 and [`MAX_BLOCK_RANGE`] blocks
pub fn validate_range(start: u64, end: u64) -> Result<(), ScrapeError> {
    let invalid = || ScrapeError::InvalidRange {
        start,
        end,
        max: MAX_BLOCK_RANGE,
    };

    let span = end.checked_sub(start).ok_or_else(invalid)?;
    if span >= MAX_BLOCK_RANGE {
        return Err(invalid());
    }
    Ok(())
}

enum HashOutcome {
    Skipped,
    FilteredOut,
    Stored(SaveOutcome),
    StoreFailed,
}

/// Drives a block range through the pipeline with injected collaborators
pub struct Scraper<N, A, S> {
    node: N,
    api: A,
    store: S,
    policy: ScrapePolicy,
    state: RunState,
}

impl<N, A, S> Scraper<N, A, S>
where
    N: NodeClient,
    A: IndexApi,
    S: TransactionStore,
{
    pub fn new(node: N, api: A, store: S, policy: ScrapePolicy) -> Self {
        Self {
            node,
            api,
            store,
            policy,
            state: RunState::Idle,
        }
    }

    /// Get the current state
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn policy(&self) -> &ScrapePolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Release the collaborators
    pub fn into_parts(self) -> (N, A, S) {
        (self.node, self.api, self.store)
    }

    /// Scrape `[start_block, end_block]` with raw filter literals.
    ///
    /// The range and the amount literal are validated before any upstream call.
    pub async fn run<T: AsRef<str>>(
        &mut self,
        start_block: u64,
        end_block: u64,
        method_terms: &[T],
        amount_mode: Option<&str>,
    ) -> Result<ScrapeSummary, ScrapeError> {
        validate_range(start_block, end_block)?;
        let filter = TransactionFilter::parse(method_terms, amount_mode)?;
        self.run_filtered(start_block, end_block, &filter).await
    }

    /// Scrape `[start_block, end_block]` with an already built filter
    pub async fn run_filtered(
        &mut self,
        start_block: u64,
        end_block: u64,
        filter: &TransactionFilter,
    ) -> Result<ScrapeSummary, ScrapeError> {
        validate_range(start_block, end_block)?;

        if let Err(e) = self.node.check_connectivity().await {
            error!("Node unreachable, aborting before block {}: {}", start_block, e);
            self.state = RunState::Aborted;
            return Err(ScrapeError::NodeUnreachable(e));
        }

        if let Err(e) = self.api.check_connectivity().await {
            error!("Index API unreachable, aborting before block {}: {}", start_block, e);
            self.state = RunState::Aborted;
            return Err(ScrapeError::IndexApiUnreachable(e));
        }

        info!(start_block, end_block, ?filter, "Starting scrape");
        let mut summary = ScrapeSummary::default();

        for block in start_block..=end_block {
            self.state = RunState::Running { block };

            if let Err(e) = self.process_block(block, filter, &mut summary).await {
                self.state = RunState::Aborted;
                return Err(e);
            }

            if block < end_block {
                self.pause(self.policy.block_delay).await;
            }
        }

        self.state = RunState::Completed;
        info!(
            scraped = summary.scraped,
            saved = summary.saved,
            duplicates = summary.duplicates,
            filtered_out = summary.filtered_out,
            failed_hashes = summary.failed_hashes,
            failed_blocks = summary.failed_blocks,
            "Scrape complete"
        );
        Ok(summary)
    }

    async fn process_block(
        &self,
        block: u64,
        filter: &TransactionFilter,
        summary: &mut ScrapeSummary,
    ) -> Result<(), ScrapeError> {
        info!(block, "Processing block");

        let hashes = match self.node.transaction_hashes(block).await {
            Ok(hashes) => hashes,
            Err(e) => match self.policy.on_block_failure {
                BlockFailurePolicy::Skip => {
                    warn!(block, "Skipping block, hashes unavailable: {}", e);
                    summary.failed_blocks += 1;
                    return Ok(());
                }
                BlockFailurePolicy::Abort => {
                    summary.failed_blocks += 1;
                    return Err(ScrapeError::BlockFailed { block, source: e });
                }
            },
        };

        if hashes.is_empty() {
            debug!(block, "Block has no transactions");
            return Ok(());
        }

        let timestamp = match self.node.block_timestamp(block).await {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(block, "Block timestamp unavailable, records keep no timestamp: {}", e);
                None
            }
        };

        info!(block, count = hashes.len(), "Found transactions");

        for hash in &hashes {
            match self.process_hash(block, hash, timestamp, filter).await {
                HashOutcome::Skipped => summary.failed_hashes += 1,
                HashOutcome::FilteredOut => {
                    summary.scraped += 1;
                    summary.filtered_out += 1;
                }
                HashOutcome::Stored(SaveOutcome::Saved) => {
                    summary.scraped += 1;
                    summary.saved += 1;
                }
                HashOutcome::Stored(SaveOutcome::DuplicateSkipped) => {
                    summary.scraped += 1;
                    summary.duplicates += 1;
                }
                HashOutcome::StoreFailed => {
                    summary.scraped += 1;
                    summary.failed_hashes += 1;
                }
            }
        }

        Ok(())
    }

    async fn process_hash(
        &self,
        block: u64,
        hash: &str,
        timestamp: Option<u64>,
        filter: &TransactionFilter,
    ) -> HashOutcome {
        // pacing follows every upstream call, whatever it returned
        let tx = self.api.transaction_by_hash(hash).await;
        self.pause(self.policy.request_delay).await;

        let tx = match tx {
            Ok(Lookup::Found(tx)) => tx,
            Ok(Lookup::NotFound) => {
                debug!(block, hash, "Transaction not found, skipping");
                return HashOutcome::Skipped;
            }
            Err(e) => {
                warn!(block, hash, "Transaction lookup failed: {}", e);
                return HashOutcome::Skipped;
            }
        };

        let receipt = self.api.transaction_receipt(hash).await;
        self.pause(self.policy.request_delay).await;

        let receipt = match receipt {
            Ok(Lookup::Found(receipt)) => receipt,
            Ok(Lookup::NotFound) => {
                debug!(block, hash, "Receipt not found, skipping");
                return HashOutcome::Skipped;
            }
            Err(e) => {
                warn!(block, hash, "Receipt lookup failed: {}", e);
                return HashOutcome::Skipped;
            }
        };

        let record = match assemble(hash, &tx, &receipt, timestamp) {
            Ok(record) => record,
            Err(e) => {
                warn!(block, hash, "Cannot assemble transaction: {}", e);
                return HashOutcome::Skipped;
            }
        };

        if !filter.matches(&record) {
            debug!(block, hash, action = %record.action, "Skipped by filter");
            return HashOutcome::FilteredOut;
        }

        match self.store.save(&record).await {
            Ok(SaveOutcome::Saved) => {
                info!(block, hash, "Saved transaction");
                HashOutcome::Stored(SaveOutcome::Saved)
            }
            Ok(SaveOutcome::DuplicateSkipped) => {
                debug!(block, hash, "Already stored");
                HashOutcome::Stored(SaveOutcome::DuplicateSkipped)
            }
            Err(e) => {
                error!(block, hash, "Failed to save transaction: {}", e);
                HashOutcome::StoreFailed
            }
        }
    }

    async fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}
