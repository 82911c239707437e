use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bilibili_client::{BilibiliClient, ClientOptions};
use cosdrama_common::{DurationBucket, IngestConfig, SearchOrder};
use cosdrama_ingest::discovery::with_drama_suffix;
use cosdrama_ingest::extractor::LlmMentionExtractor;
use cosdrama_ingest::{BatchRequest, BatchRun, ItemReport, Pipeline, PipelineDeps, Timeouts};
use cosdrama_store::PgEntityStore;

#[derive(Parser)]
#[command(
    name = "cosdrama-ingest",
    about = "Search Bilibili for stage-drama videos and upsert them into the cosplay database"
)]
struct Cli {
    /// Search keyword
    keyword: String,

    /// Result page to fetch
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Maximum number of videos to process
    #[arg(long, default_value_t = 5)]
    limit: usize,

    /// Inclusive duration bucket range: 0 all, 1 <10min, 2 10-30min, 3 30-60min, 4 >60min
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    duration: Option<Vec<i64>>,

    /// Result order: totalrank, click, pubdate, dm, stow, scores, attention
    #[arg(long, default_value = "pubdate")]
    order: SearchOrder,

    /// First publish date to include (YYYY-MM-DD, Beijing time)
    #[arg(long, conflicts_with = "last_week")]
    begin_date: Option<NaiveDate>,

    /// Last publish date to include (YYYY-MM-DD, Beijing time)
    #[arg(long, conflicts_with = "last_week")]
    end_date: Option<NaiveDate>,

    /// Only videos published in the last seven days
    #[arg(long)]
    last_week: bool,

    /// Videos processed at once
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Resolve and compose without writing; unmatched groups are reported, not created
    #[arg(long)]
    dry_run: bool,

    /// Do not append " 舞台剧" to the keyword
    #[arg(long)]
    no_suffix: bool,

    /// Apply the bundled schema migrations before running
    #[arg(long)]
    migrate: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("cosdrama=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("cosdrama ingest starting...");

    // Load config
    let config = IngestConfig::from_env()?;

    // Connect to Postgres
    let store = PgEntityStore::connect(
        &config.database_url,
        config.db_max_connections,
        config.db_timeout,
    )
    .await?;
    if cli.migrate {
        store.migrate().await?;
    }
    store.ensure_extensions().await?;

    let bilibili = BilibiliClient::new(ClientOptions {
        cookies: config.bilibili_cookies.clone(),
        timeout: Some(config.search_timeout.max(config.detail_timeout)),
    })?;
    let extractor = LlmMentionExtractor::from_config(&config)?;

    let deps = PipelineDeps::builder()
        .source(Arc::new(bilibili))
        .extractor(Arc::new(extractor))
        .store(Arc::new(store))
        .threshold(config.fk_similarity_threshold)
        .timeouts(Timeouts::from_config(&config))
        .build();
    let pipeline = Pipeline::new(deps)?;

    let keyword = if cli.no_suffix {
        cli.keyword.trim().to_string()
    } else {
        with_drama_suffix(&cli.keyword)
    };
    let durations = cli
        .duration
        .as_deref()
        .map(|range| DurationBucket::range(range[0], range[1]));

    let request = BatchRequest::builder()
        .keyword(keyword)
        .page(cli.page)
        .limit(cli.limit)
        .durations(durations)
        .order(cli.order)
        .begin_date(cli.begin_date)
        .end_date(cli.end_date)
        .last_week(cli.last_week)
        .concurrency(cli.concurrency)
        .dry_run(cli.dry_run)
        .build();

    let run = pipeline.run_batch(&request).await?;
    print_run(&run);

    Ok(())
}

fn print_run(run: &BatchRun) {
    println!("run {} | keyword '{}' | page {} | window {}", run.run_id, run.keyword, run.page, run.window);
    for warning in &run.discovery_warnings {
        println!("  warning: {warning}");
    }
    if run.items.is_empty() {
        println!("  no videos found");
    }
    for (i, item) in run.items.iter().enumerate() {
        print_item(i + 1, item);
    }
    println!(
        "done: {} processed, {} persisted, {} failed",
        run.items.len(),
        run.persisted_count(),
        run.failed_count()
    );
}

fn print_item(n: usize, item: &ItemReport) {
    println!();
    println!("[{n}] {} {}", item.external_id, item.title);
    match item.fatal_error() {
        Some(e) => println!("  result: {} ({e})", item.terminal),
        None => println!("  result: {}", item.terminal),
    }
    if let Some(outcome) = &item.outcome {
        println!("  outcome: {outcome}");
    }
    if let Some(sql) = &item.operation {
        println!("  operation: {sql}");
    }
    if let Some(record) = &item.record {
        println!("  record:");
        for (field, value) in record.fields() {
            println!("    {field}: {value}");
        }
    }
    let mut soft = item.soft_errors().peekable();
    if soft.peek().is_some() {
        println!("  warnings:");
        for e in soft {
            println!("    - {e}");
        }
    }
    println!("  log:");
    for line in &item.logs {
        println!("    {line}");
    }
}
