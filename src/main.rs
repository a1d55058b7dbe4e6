use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use ethscrape::scraper::validate_range;
use ethscrape::store::DEFAULT_QUERY_LIMIT;
use ethscrape::{
    EtherscanClient, PgTransactionStore, RpcNodeClient, ScraperConfig, Scraper, TransactionFilter,
    TransactionQuery, TransactionRecord, TransactionStore,
};

/// Ethereum transaction scraper
#[derive(Parser)]
#[command(name = "ethscrape", version, about = "Scrape Ethereum transactions into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    /// Keep transactions whose action contains this term (repeatable, case-insensitive)
    #[arg(long = "method")]
    methods: Vec<String>,
    /// Value filter: '0' for zero-value, 'not-0' for non-zero
    #[arg(long)]
    amount: Option<String>,
}

impl FilterArgs {
    fn build(&self) -> anyhow::Result<TransactionFilter> {
        Ok(TransactionFilter::parse(&self.methods, self.amount.as_deref())?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape an inclusive block range
    Scrape {
        #[arg(long)]
        start_block: u64,
        #[arg(long)]
        end_block: u64,
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Print the number of stored transactions
    CountTransactions,

    /// Print stored transactions
    ShowTransactions {
        #[arg(long)]
        block: Option<u64>,
        #[arg(long)]
        hash: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = DEFAULT_QUERY_LIMIT)]
        limit: u32,
    },
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_timestamp(timestamp: Option<u64>) -> String {
    timestamp
        .and_then(|ts| i64::try_from(ts).ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_record(record: &TransactionRecord) {
    println!("Hash:        {}", record.hash);
    println!("Status:      {}", record.status.label());
    println!("Block:       {}", record.block);
    println!("Timestamp:   {}", format_timestamp(record.timestamp));
    println!("Action:      {}", record.action);
    println!("From:        {}", record.from.as_deref().unwrap_or("-"));
    println!("To:          {}", record.to.as_deref().unwrap_or("-"));
    println!("Value:       {} ETH", record.value.normalize());
    println!("Fee:         {} ETH", record.fee.normalize());
    println!("Gas Price:   {} ETH", record.gas_price.normalize());
    println!("Gas Used:    {}", record.gas_used);
    println!();
}

async fn open_store(config: &ScraperConfig) -> anyhow::Result<PgTransactionStore> {
    let store = PgTransactionStore::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    store.ensure_schema().await.context("failed to create schema")?;
    Ok(store)
}

async fn scrape(config: &ScraperConfig, start_block: u64, end_block: u64, filter: TransactionFilter) -> anyhow::Result<()> {
    let node = RpcNodeClient::connect(&config.node_url)
        .await
        .context("failed to reach node")?;
    let api = EtherscanClient::new(config.api_url.clone(), config.api_key.clone())?;
    let store = open_store(config).await?;

    let mut scraper = Scraper::new(node, api, store, config.policy.clone());
    let summary = scraper.run_filtered(start_block, end_block, &filter).await?;

    println!(
        "Scraped {} transactions, saved {} ({} already stored, {} filtered out, {} failed, {} blocks skipped)",
        summary.scraped,
        summary.saved,
        summary.duplicates,
        summary.filtered_out,
        summary.failed_hashes,
        summary.failed_blocks
    );

    let (_, _, store) = scraper.into_parts();
    store.close().await;
    Ok(())
}

/// A command whose input has been validated
enum Job {
    Scrape {
        start_block: u64,
        end_block: u64,
        filter: TransactionFilter,
    },
    Count,
    Show(TransactionQuery),
}

impl Commands {
    fn into_job(self) -> anyhow::Result<Job> {
        Ok(match self {
            Commands::Scrape { start_block, end_block, filter } => {
                validate_range(start_block, end_block)?;
                Job::Scrape {
                    start_block,
                    end_block,
                    filter: filter.build()?,
                }
            }
            Commands::CountTransactions => Job::Count,
            Commands::ShowTransactions { block, hash, filter, limit } => Job::Show(TransactionQuery {
                block,
                hash,
                filter: filter.build()?,
                limit,
            }),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let job = cli.command.into_job()?;

    let config = ScraperConfig::from_env().context("invalid configuration")?;
    info!(?config, "Configuration loaded");

    match job {
        Job::Scrape { start_block, end_block, filter } => scrape(&config, start_block, end_block, filter).await?,
        Job::Count => {
            let store = open_store(&config).await?;
            println!("Total transactions: {}", store.count().await?);
            store.close().await;
        }
        Job::Show(query) => {
            let store = open_store(&config).await?;
            let records = store.find(&query).await?;
            if records.is_empty() {
                println!("No transactions found");
            }
            for record in &records {
                print_record(record);
            }
            store.close().await;
        }
    }

    Ok(())
}
