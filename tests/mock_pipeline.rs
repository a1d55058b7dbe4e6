//! Mock Pipeline Integration Tests
//!
//! Drives the real scraper with in-memory node, index API and store (no external
//! dependencies). Verifies fetch → assemble → filter → save and the run counters.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;

use ethscrape::etherscan::{IndexApi, IndexApiError, Lookup, RawReceipt, RawTransaction};
use ethscrape::filter::{AmountMode, TransactionFilter};
use ethscrape::node::{NodeClient, NodeError};
use ethscrape::scraper::{BlockFailurePolicy, RunState, ScrapeError, ScrapePolicy, Scraper};
use ethscrape::store::{SaveOutcome, StoreError, TransactionQuery, TransactionStore};
use ethscrape::TransactionRecord;

const ERC20_TRANSFER_CALL: &str = "0xa9059cbb000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb92266";

fn tx_hash(block: u64, index: u64) -> String {
    format!("0x{:060x}{:04x}", block, index)
}

/// Mock node serving hash lists per block
#[derive(Clone, Default)]
struct MockNode {
    blocks: HashMap<u64, Vec<String>>,
    failing_blocks: HashSet<u64>,
    unreachable: bool,
    calls: Arc<AtomicUsize>,
}

impl MockNode {
    fn with_block(mut self, block: u64, hashes: Vec<String>) -> Self {
        self.blocks.insert(block, hashes);
        self
    }

    fn failing(mut self, block: u64) -> Self {
        self.failing_blocks.insert(block);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn check_connectivity(&self) -> Result<u64, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(NodeError::Connectivity("connection refused".to_string()));
        }
        Ok(self.blocks.keys().copied().max().unwrap_or(0))
    }

    async fn transaction_hashes(&self, block: u64) -> Result<Vec<String>, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_blocks.contains(&block) {
            return Err(NodeError::Connectivity("timed out".to_string()));
        }
        Ok(self.blocks.get(&block).cloned().unwrap_or_default())
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(1_600_000_000 + block * 12)
    }
}

/// Mock index API serving canned payloads
#[derive(Clone, Default)]
struct MockIndexApi {
    transactions: HashMap<String, RawTransaction>,
    receipts: HashMap<String, RawReceipt>,
    unavailable: HashSet<String>,
    unreachable: bool,
    calls: Arc<AtomicUsize>,
}

impl MockIndexApi {
    fn serve(mut self, block: u64, hash: &str, input: &str, value_wei: u128, gas_price_wei: u128, gas_used: u64) -> Self {
        self.transactions.insert(
            hash.to_string(),
            RawTransaction {
                hash: Some(hash.to_string()),
                block_number: Some(format!("0x{:x}", block)),
                from: Some("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string()),
                to: Some("0x70997970c51812dc3a010c7d01b50e0d17dc79c8".to_string()),
                value: Some(format!("0x{:x}", value_wei)),
                gas_price: Some(format!("0x{:x}", gas_price_wei)),
                input: Some(input.to_string()),
            },
        );
        self.receipts.insert(
            hash.to_string(),
            RawReceipt {
                status: Some("0x1".to_string()),
                gas_used: Some(format!("0x{:x}", gas_used)),
                cumulative_gas_used: Some(format!("0x{:x}", gas_used * 2)),
            },
        );
        self
    }

    fn transfer(self, block: u64, hash: &str) -> Self {
        self.serve(block, hash, "0x", 1_000_000_000_000_000_000, 20_000_000_000, 21_000)
    }

    fn without_transaction(mut self, hash: &str) -> Self {
        self.transactions.remove(hash);
        self
    }

    fn unavailable_for(mut self, hash: &str) -> Self {
        self.unavailable.insert(hash.to_string());
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexApi for MockIndexApi {
    async fn check_connectivity(&self) -> Result<(), IndexApiError> {
        if self.unreachable {
            return Err(IndexApiError::Unavailable("dns error".to_string()));
        }
        Ok(())
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Lookup<RawTransaction>, IndexApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.contains(hash) {
            return Err(IndexApiError::Unavailable("503 Service Unavailable".to_string()));
        }
        Ok(match self.transactions.get(hash) {
            Some(tx) => Lookup::Found(tx.clone()),
            None => Lookup::NotFound,
        })
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Lookup<RawReceipt>, IndexApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.receipts.get(hash) {
            Some(receipt) => Lookup::Found(receipt.clone()),
            None => Lookup::NotFound,
        })
    }
}

/// In-memory store keyed by hash, recording the order of writes
#[derive(Clone, Default)]
struct MemoryStore {
    rows: Arc<Mutex<BTreeMap<String, TransactionRecord>>>,
    write_order: Arc<Mutex<Vec<String>>>,
}

impl MemoryStore {
    fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn get(&self, hash: &str) -> Option<TransactionRecord> {
        self.rows.lock().unwrap().get(hash).cloned()
    }

    fn records(&self) -> Vec<TransactionRecord> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    fn write_order(&self) -> Vec<String> {
        self.write_order.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn save(&self, record: &TransactionRecord) -> Result<SaveOutcome, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.hash) {
            return Ok(SaveOutcome::DuplicateSkipped);
        }
        rows.insert(record.hash.clone(), record.clone());
        self.write_order.lock().unwrap().push(record.hash.clone());
        Ok(SaveOutcome::Saved)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.len() as u64)
    }

    async fn find(&self, query: &TransactionQuery) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut found: Vec<_> = self.records().into_iter().filter(|r| query.matches(r)).collect();
        found.sort_by(|a, b| (a.block, &a.hash).cmp(&(b.block, &b.hash)));
        found.truncate(query.limit as usize);
        Ok(found)
    }
}

fn scraper(node: MockNode, api: MockIndexApi, store: MemoryStore) -> Scraper<MockNode, MockIndexApi, MemoryStore> {
    Scraper::new(node, api, store, ScrapePolicy::unpaced())
}

fn two_transfer_block() -> (MockNode, MockIndexApi, String, String) {
    let h1 = tx_hash(100, 1);
    let h2 = tx_hash(100, 2);
    let node = MockNode::default().with_block(100, vec![h1.clone(), h2.clone()]);
    let api = MockIndexApi::default().transfer(100, &h1).transfer(100, &h2);
    (node, api, h1, h2)
}

// ==================== Core Scenario Tests ====================

#[tokio::test]
async fn test_block_with_two_transactions_saves_both() {
    let (node, api, h1, h2) = two_transfer_block();
    let store = MemoryStore::default();

    let summary = scraper(node, api, store.clone()).run::<&str>(100, 100, &[], None).await.unwrap();

    assert_eq!(summary.scraped, 2);
    assert_eq!(summary.saved, 2);
    assert!(store.get(&h1).is_some());
    assert!(store.get(&h2).is_some());
}

#[tokio::test]
async fn test_previously_stored_hash_is_not_saved_again() {
    let (node, api, h1, _) = two_transfer_block();
    let store = MemoryStore::default();

    // Seed h1 as if from a prior run
    let seed = MemoryStore::default();
    scraper(node.clone(), api.clone(), seed.clone()).run::<&str>(100, 100, &[], None).await.unwrap();
    store.save(&seed.get(&h1).unwrap()).await.unwrap();

    let summary = scraper(node, api, store.clone()).run::<&str>(100, 100, &[], None).await.unwrap();

    assert_eq!(summary.scraped, 2);
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_method_filter_with_no_match_saves_nothing() {
    let (node, api, _, _) = two_transfer_block();
    let store = MemoryStore::default();

    let summary = scraper(node, api, store.clone()).run(100, 100, &["Swap"], None).await.unwrap();

    assert_eq!(summary.scraped, 2);
    assert_eq!(summary.saved, 0);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_not_found_transaction_is_not_counted() {
    let (node, api, h1, h2) = two_transfer_block();
    let api = api.without_transaction(&h2);
    let store = MemoryStore::default();

    let summary = scraper(node, api, store.clone()).run::<&str>(100, 100, &[], None).await.unwrap();

    assert_eq!(summary.scraped, 1);
    assert_eq!(summary.saved, 1);
    assert!(store.get(&h1).is_some());
    assert!(store.get(&h2).is_none());
}

#[tokio::test]
async fn test_bogus_amount_mode_fails_before_network() {
    let (node, api, _, _) = two_transfer_block();
    let node_calls = node.clone();
    let api_calls = api.clone();
    let store = MemoryStore::default();

    let mut scraper = scraper(node, api, store.clone());
    let result = scraper.run::<&str>(100, 100, &[], Some("bogus")).await;

    assert!(matches!(result, Err(ScrapeError::Filter(_))));
    assert_eq!(node_calls.call_count(), 0);
    assert_eq!(api_calls.call_count(), 0);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_oversized_range_fails_before_network() {
    let (node, api, _, _) = two_transfer_block();
    let node_calls = node.clone();

    let result = scraper(node, api, MemoryStore::default()).run::<&str>(100, 250, &[], None).await;

    assert!(matches!(result, Err(ScrapeError::InvalidRange { .. })));
    assert_eq!(node_calls.call_count(), 0);
}

// ==================== Idempotence Tests ====================

#[tokio::test]
async fn test_second_run_saves_nothing() {
    let (node, api, _, _) = two_transfer_block();
    let store = MemoryStore::default();

    let first = scraper(node.clone(), api.clone(), store.clone()).run::<&str>(100, 100, &[], None).await.unwrap();
    let snapshot = store.records();
    let second = scraper(node, api, store.clone()).run::<&str>(100, 100, &[], None).await.unwrap();

    assert_eq!(first.saved, 2);
    assert_eq!(second.scraped, 2);
    assert_eq!(second.saved, 0);
    assert_eq!(store.records(), snapshot);
}

/// Overlapping runs share one store; the summaries only count a hash as saved
/// when the store reports a new insert
#[tokio::test]
async fn test_overlapping_runs_count_each_hash_saved_once() {
    let (node, api, _, _) = two_transfer_block();
    let store = MemoryStore::default();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let mut scraper = scraper(node.clone(), api.clone(), store.clone());
            tokio::spawn(async move { scraper.run::<&str>(100, 100, &[], None).await.unwrap() })
        })
        .collect();

    let mut saved = 0;
    let mut duplicates = 0;
    for handle in handles {
        let summary = handle.await.unwrap();
        assert_eq!(summary.scraped, 2);
        saved += summary.saved;
        duplicates += summary.duplicates;
    }

    assert_eq!(saved, 2);
    assert_eq!(duplicates, 6);
    assert_eq!(store.len(), 2);
}

// ==================== Record Content Tests ====================

#[tokio::test]
async fn test_fee_equals_gas_price_times_gas_used() {
    let h1 = tx_hash(200, 1);
    let h2 = tx_hash(200, 2);
    let node = MockNode::default().with_block(200, vec![h1.clone(), h2.clone()]);
    let api = MockIndexApi::default()
        .serve(200, &h1, "0x", 0, 1, 1)
        .serve(200, &h2, ERC20_TRANSFER_CALL, 0, 123_456_789_012, 987_654);
    let store = MemoryStore::default();

    scraper(node, api, store.clone()).run::<&str>(200, 200, &[], None).await.unwrap();

    for record in store.records() {
        assert_eq!(record.fee, record.gas_price * Decimal::from(record.gas_used));
    }
    assert_eq!(store.get(&h1).unwrap().fee, Decimal::new(1, 18));
}

#[tokio::test]
async fn test_action_classification_and_timestamp() {
    let h1 = tx_hash(300, 1);
    let h2 = tx_hash(300, 2);
    let node = MockNode::default().with_block(300, vec![h1.clone(), h2.clone()]);
    let api = MockIndexApi::default()
        .transfer(300, &h1)
        .serve(300, &h2, ERC20_TRANSFER_CALL, 0, 1, 50_000);
    let store = MemoryStore::default();

    scraper(node, api, store.clone()).run::<&str>(300, 300, &[], None).await.unwrap();

    let transfer = store.get(&h1).unwrap();
    let call = store.get(&h2).unwrap();
    assert_eq!(transfer.action, "Transfer");
    assert_eq!(transfer.input_data, "0x");
    assert_eq!(transfer.value, Decimal::ONE);
    assert_eq!(call.action, "Contract Call");
    assert_eq!(call.value, Decimal::ZERO);
    assert_eq!(transfer.timestamp, Some(1_600_000_000 + 300 * 12));
}

// ==================== Filter Tests ====================

#[tokio::test]
async fn test_only_matching_records_are_stored() {
    let hashes: Vec<String> = (0..8).map(|i| tx_hash(400, i)).collect();
    let node = MockNode::default().with_block(400, hashes.clone());
    let mut api = MockIndexApi::default();
    for (i, hash) in hashes.iter().enumerate() {
        let input = if i % 2 == 0 { "0x" } else { ERC20_TRANSFER_CALL };
        let value = if i % 3 == 0 { 0 } else { 5_000 };
        api = api.serve(400, hash, input, value, 1_000, 21_000);
    }
    let store = MemoryStore::default();
    let filter = TransactionFilter::new(&["contract"], Some(AmountMode::NonZero));

    let summary = scraper(node, api, store.clone()).run_filtered(400, 400, &filter).await.unwrap();

    assert_eq!(summary.scraped, 8);
    assert_eq!(summary.saved + summary.filtered_out, 8);
    for record in store.records() {
        assert!(filter.matches(&record));
        assert_eq!(record.action, "Contract Call");
        assert!(!record.value.is_zero());
    }
    // odd indexes not divisible by 3: 1, 5, 7
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn test_zero_amount_filter() {
    let h1 = tx_hash(500, 1);
    let h2 = tx_hash(500, 2);
    let node = MockNode::default().with_block(500, vec![h1.clone(), h2.clone()]);
    let api = MockIndexApi::default()
        .serve(500, &h1, "0x", 0, 1, 21_000)
        .serve(500, &h2, "0x", 1, 1, 21_000);
    let store = MemoryStore::default();

    scraper(node, api, store.clone()).run::<&str>(500, 500, &[], Some("0")).await.unwrap();

    assert!(store.get(&h1).is_some());
    assert!(store.get(&h2).is_none());
}

// ==================== Ordering Tests ====================

#[tokio::test]
async fn test_records_are_written_in_block_then_listing_order() {
    let mut node = MockNode::default();
    let mut api = MockIndexApi::default();
    let mut expected = Vec::new();
    for block in 600..605u64 {
        // listing order deliberately not sorted by hash
        let hashes: Vec<String> = [3, 1, 2].iter().map(|i| tx_hash(block, *i)).collect();
        for hash in &hashes {
            api = api.transfer(block, hash);
        }
        expected.extend(hashes.clone());
        node = node.with_block(block, hashes);
    }
    let store = MemoryStore::default();

    scraper(node, api, store.clone()).run::<&str>(600, 604, &[], None).await.unwrap();

    assert_eq!(store.write_order(), expected);
}

#[tokio::test]
async fn test_find_orders_by_block_then_hash() {
    let mut node = MockNode::default();
    let mut api = MockIndexApi::default();
    for block in [702u64, 700, 701] {
        let hashes = vec![tx_hash(block, 2), tx_hash(block, 1)];
        for hash in &hashes {
            api = api.transfer(block, hash);
        }
        node = node.with_block(block, hashes);
    }
    let store = MemoryStore::default();
    scraper(node, api, store.clone()).run::<&str>(700, 702, &[], None).await.unwrap();

    let found = store.find(&TransactionQuery::default()).await.unwrap();
    let blocks: Vec<u64> = found.iter().map(|r| r.block).collect();
    assert_eq!(blocks, vec![700, 700, 701, 701, 702, 702]);
    assert_eq!(found[0].hash, tx_hash(700, 1));
}

// ==================== Failure Isolation Tests ====================

#[tokio::test]
async fn test_unavailable_hash_does_not_stop_the_block() {
    let hashes: Vec<String> = (0..3).map(|i| tx_hash(800, i)).collect();
    let node = MockNode::default().with_block(800, hashes.clone());
    let mut api = MockIndexApi::default();
    for hash in &hashes {
        api = api.transfer(800, hash);
    }
    let api = api.unavailable_for(&hashes[1]);
    let store = MemoryStore::default();

    let summary = scraper(node, api, store.clone()).run::<&str>(800, 800, &[], None).await.unwrap();

    assert_eq!(summary.scraped, 2);
    assert_eq!(summary.failed_hashes, 1);
    assert!(store.get(&hashes[2]).is_some());
}

#[tokio::test]
async fn test_failing_block_is_skipped() {
    let h = tx_hash(901, 1);
    let node = MockNode::default().with_block(901, vec![h.clone()]).failing(900);
    let api = MockIndexApi::default().transfer(901, &h);
    let store = MemoryStore::default();

    let mut scraper = scraper(node, api, store.clone());
    let summary = scraper.run::<&str>(900, 901, &[], None).await.unwrap();

    assert_eq!(summary.failed_blocks, 1);
    assert_eq!(summary.saved, 1);
    assert_eq!(scraper.state(), RunState::Completed);
}

#[tokio::test]
async fn test_failing_block_aborts_when_configured() {
    let h = tx_hash(901, 1);
    let node = MockNode::default().with_block(901, vec![h.clone()]).failing(900);
    let api = MockIndexApi::default().transfer(901, &h);
    let store = MemoryStore::default();
    let policy = ScrapePolicy {
        on_block_failure: BlockFailurePolicy::Abort,
        ..ScrapePolicy::unpaced()
    };

    let mut scraper = Scraper::new(node, api, store.clone(), policy);
    let result = scraper.run::<&str>(900, 901, &[], None).await;

    assert!(matches!(result, Err(ScrapeError::BlockFailed { block: 900, .. })));
    assert_eq!(scraper.state(), RunState::Aborted);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_unreachable_node_aborts() {
    let node = MockNode {
        unreachable: true,
        ..MockNode::default()
    };
    let mut scraper = scraper(node, MockIndexApi::default(), MemoryStore::default());

    let result = scraper.run::<&str>(1, 1, &[], None).await;

    assert!(matches!(result, Err(ScrapeError::NodeUnreachable(_))));
    assert_eq!(scraper.state(), RunState::Aborted);
}

#[tokio::test]
async fn test_unreachable_index_api_aborts() {
    let (node, api, _, _) = two_transfer_block();
    let node_calls = node.clone();
    let api = MockIndexApi {
        unreachable: true,
        ..api
    };
    let api_calls = api.clone();
    let store = MemoryStore::default();

    let mut scraper = scraper(node, api, store.clone());
    let result = scraper.run::<&str>(100, 102, &[], None).await;

    assert!(matches!(result, Err(ScrapeError::IndexApiUnreachable(_))));
    assert_eq!(scraper.state(), RunState::Aborted);
    // only the node connectivity check ran
    assert_eq!(node_calls.call_count(), 1);
    assert_eq!(api_calls.call_count(), 0);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_unavailable_lookups_are_still_paced() {
    let hashes: Vec<String> = (0..4).map(|i| tx_hash(850, i)).collect();
    let node = MockNode::default().with_block(850, hashes.clone());
    let mut api = MockIndexApi::default();
    for hash in &hashes {
        api = api.unavailable_for(hash);
    }
    let policy = ScrapePolicy {
        request_delay: Duration::from_millis(25),
        ..ScrapePolicy::unpaced()
    };

    let started = Instant::now();
    let summary = Scraper::new(node, api, MemoryStore::default(), policy)
        .run::<&str>(850, 850, &[], None)
        .await
        .unwrap();

    assert_eq!(summary.failed_hashes, 4);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_empty_range_of_blocks_completes_with_zero_counts() {
    let node = MockNode::default();
    let api = MockIndexApi::default();
    let api_calls = api.clone();

    let summary = scraper(node, api, MemoryStore::default()).run::<&str>(10, 19, &[], None).await.unwrap();

    assert_eq!(summary.scraped, 0);
    assert_eq!(summary.saved, 0);
    assert_eq!(api_calls.call_count(), 0);
}
