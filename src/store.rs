//! Transaction Store
//!
//! Idempotent persistence of assembled records, keyed by transaction hash, plus the
//! read-side queries used by the command surface. Every save runs in its own database
//! transaction so a failed write never affects records committed before it.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{debug, info};

use crate::assembler::{TransactionRecord, TxStatus};
use crate::filter::{AmountMode, TransactionFilter};

/// Default number of rows returned by a query
pub const DEFAULT_QUERY_LIMIT: u32 = 20;

/// Schema applied by [`PgTransactionStore::ensure_schema`]
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

/// Maximum pooled connections
pub const MAX_CONNECTIONS: u32 = 5;

/// Time allowed to obtain a pooled connection
pub const ACQUIRE_TIMEOUT_SECS: u64 = 10;

const COLUMNS: &str = r#"hash, status, block, "timestamp", action, "from", "to", value, fee, gas_price, gas_used, cumulative_gas_used, input_data"#;

/// Errors that can occur in the store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cannot encode field '{field}': {reason}")]
    Encode { field: &'static str, reason: String },
}

/// Result of an insert attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Row was newly written
    Saved,
    /// A row with the same hash already existed
    DuplicateSkipped,
}

/// Read-side query over stored transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionQuery {
    pub block: Option<u64>,
    pub hash: Option<String>,
    pub filter: TransactionFilter,
    pub limit: u32,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            block: None,
            hash: None,
            filter: TransactionFilter::default(),
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl TransactionQuery {
    /// In-memory equivalent of the SQL predicate
    pub fn matches(&self, record: &TransactionRecord) -> bool {
        self.block.map_or(true, |b| record.block == b)
            && self
                .hash
                .as_deref()
                .map_or(true, |h| record.hash.eq_ignore_ascii_case(h))
            && self.filter.matches(record)
    }
}

/// Durable storage for transaction records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a record unless its hash is already stored
    async fn save(&self, record: &TransactionRecord) -> Result<SaveOutcome, StoreError>;

    /// Number of stored records
    async fn count(&self) -> Result<u64, StoreError>;

    /// Records matching a query, ordered by block then hash
    async fn find(&self, query: &TransactionQuery) -> Result<Vec<TransactionRecord>, StoreError>;
}

/// Escape `LIKE` wildcards so a method term matches literally
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn to_i64(value: u64, field: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|e| StoreError::Encode {
        field,
        reason: e.to_string(),
    })
}

fn to_u64(value: i64, field: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|e| StoreError::Encode {
        field,
        reason: e.to_string(),
    })
}

/// Row shape of the `transactions` table
#[derive(Debug, Clone, FromRow)]
struct TransactionRow {
    hash: String,
    status: bool,
    block: i64,
    timestamp: Option<i64>,
    action: String,
    from: Option<String>,
    to: Option<String>,
    value: Decimal,
    fee: Decimal,
    gas_price: Decimal,
    gas_used: i64,
    cumulative_gas_used: i64,
    input_data: String,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            hash: row.hash,
            status: if row.status { TxStatus::Success } else { TxStatus::Fail },
            block: to_u64(row.block, "block")?,
            timestamp: row.timestamp.map(|t| to_u64(t, "timestamp")).transpose()?,
            action: row.action,
            from: row.from,
            to: row.to,
            value: row.value,
            fee: row.fee,
            gas_price: row.gas_price,
            gas_used: to_u64(row.gas_used, "gas_used")?,
            cumulative_gas_used: to_u64(row.cumulative_gas_used, "cumulative_gas_used")?,
            input_data: row.input_data,
        })
    }
}

/// Build the `SELECT` for a query
pub fn build_find_query(query: &TransactionQuery) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM transactions WHERE TRUE", COLUMNS));

    if let Some(block) = query.block {
        builder.push(" AND block = ").push_bind(to_i64(block, "block")?);
    }

    if let Some(hash) = &query.hash {
        // stored hashes are lowercase, so the primary key index applies
        builder.push(" AND hash = ").push_bind(hash.to_ascii_lowercase());
    }

    if !query.filter.method_terms().is_empty() {
        builder.push(" AND (");
        let mut terms = builder.separated(" OR ");
        for term in query.filter.method_terms() {
            terms.push("action ILIKE ");
            terms.push_bind_unseparated(format!("%{}%", escape_like(term)));
        }
        builder.push(")");
    }

    match query.filter.amount() {
        Some(AmountMode::Zero) => {
            builder.push(" AND value = 0");
        }
        Some(AmountMode::NonZero) => {
            builder.push(" AND value <> 0");
        }
        None => {}
    }

    builder
        .push(" ORDER BY block, hash LIMIT ")
        .push_bind(i64::from(query.limit));

    Ok(builder)
}

/// Postgres-backed store
#[derive(Clone, Debug)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    /// Open a connection pool for `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(database_url)
            .await?;

        info!("Connected to database");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `transactions` table and its block index if missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn save(&self, record: &TransactionRecord) -> Result<SaveOutcome, StoreError> {
        let block = to_i64(record.block, "block")?;
        let timestamp = record.timestamp.map(|t| to_i64(t, "timestamp")).transpose()?;
        let gas_used = to_i64(record.gas_used, "gas_used")?;
        let cumulative_gas_used = to_i64(record.cumulative_gas_used, "cumulative_gas_used")?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (hash) DO NOTHING",
            COLUMNS
        ))
        .bind(&record.hash)
        .bind(record.status.is_success())
        .bind(block)
        .bind(timestamp)
        .bind(&record.action)
        .bind(&record.from)
        .bind(&record.to)
        .bind(record.value)
        .bind(record.fee)
        .bind(record.gas_price)
        .bind(gas_used)
        .bind(cumulative_gas_used)
        .bind(&record.input_data)
        .execute(&mut *tx)
        .await;

        let outcome = match inserted {
            Ok(result) if result.rows_affected() == 0 => SaveOutcome::DuplicateSkipped,
            Ok(_) => SaveOutcome::Saved,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => SaveOutcome::DuplicateSkipped,
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        debug!(hash = %record.hash, ?outcome, "Save finished");
        Ok(outcome)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        to_u64(count, "count")
    }

    async fn find(&self, query: &TransactionQuery) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut builder = build_find_query(query)?;
        let rows = builder.build_query_as::<TransactionRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(TransactionRecord::try_from).collect()
    }
}
