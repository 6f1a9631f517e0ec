use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};

use api::HttpTweetApi;
use config::CrawlerConfig;
use crawler::Crawler;
use error::{CrawlerError, ImportError};
use fetcher::HttpCredentialFetcher;
use proxy::{HttpClients, StaticProxy};
use store::PgStore;

mod api;
mod config;
mod crawler;
mod credentials;
mod error;
mod fetcher;
mod import;
mod parser;
mod proxy;
mod retry;
mod store;
#[cfg(test)]
mod testing;
mod worker;

// Define the command-line arguments structure
#[derive(Parser, Debug)]
#[clap(
    name = "tweet-crawler",
    about = "Crawls pending post URLs from Postgres and stores their metadata."
)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Command>,

    /// Static bearer credential of the web client, required for crawling
    #[clap(long, env = "TWITTER_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Postgres connection string
    #[clap(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[clap(long, env = "CRAWLER_SCHEMA", default_value = "Twitter")]
    schema: String,

    /// Table holding the URLs and their status
    #[clap(long, env = "CRAWLER_INPUT_TABLE", default_value = "input_tb")]
    input_table: String,

    #[clap(long, env = "CRAWLER_URL_COLUMN", default_value = "tweetUrl")]
    url_column: String,

    /// Output table prefix; the run date is appended
    #[clap(long, env = "CRAWLER_OUTPUT_BASE", default_value = "tweets")]
    output_base: String,

    #[clap(long, env = "CRAWLER_CONCURRENCY", default_value_t = config::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    #[clap(long, env = "CRAWLER_BATCH_SIZE", default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Attempts per URL
    #[clap(long, env = "CRAWLER_MAX_RETRIES", default_value_t = config::DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    #[clap(long, env = "CRAWLER_MIN_REFRESH_INTERVAL_SECS", default_value_t = 10)]
    min_refresh_interval_secs: u64,

    #[clap(long, env = "CRAWLER_REQUEST_TIMEOUT_SECS", default_value_t = 25)]
    request_timeout_secs: u64,

    /// Ceiling for a single backoff between attempts
    #[clap(long, env = "CRAWLER_MAX_BACKOFF_SECS", default_value_t = 60)]
    max_backoff_secs: u64,

    /// Proxy for every outgoing request
    #[clap(long, env = "CRAWLER_PROXY")]
    proxy: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a CSV export of post URLs into the input table
    Import {
        /// CSV file with a header row containing the URL column
        csv: PathBuf,
    },
}

impl Cli {
    fn into_config(self) -> (CrawlerConfig, String) {
        let config = CrawlerConfig {
            bearer_token: self.bearer_token.unwrap_or_default(),
            schema: self.schema,
            input_table: self.input_table,
            url_column: self.url_column,
            output_base: self.output_base,
            concurrency: self.concurrency,
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            min_refresh_interval: Duration::from_secs(self.min_refresh_interval_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            proxy: self.proxy,
            ..CrawlerConfig::default()
        };
        (config, self.database_url)
    }
}

async fn run(config: CrawlerConfig, database_url: &str) -> Result<(), CrawlerError> {
    config.validate()?;

    let clients = Arc::new(HttpClients::new(
        config.request_timeout,
        Arc::new(StaticProxy::new(config.proxy.clone())),
    )?);
    let source = Arc::new(HttpCredentialFetcher::new(
        clients.clone(),
        config.bearer_token.clone(),
        config.scrape_jitter,
    ));
    let api = Arc::new(HttpTweetApi::new(clients));

    let max_connections = u32::try_from(config.concurrency).unwrap_or(u32::MAX);
    let store = Arc::new(
        PgStore::connect(database_url, &config.schema, &config.url_column, max_connections)
            .await?,
    );

    let crawler = Crawler::new(config, store.clone(), api, source);
    let result = crawler.run().await;
    store.close().await;
    result.map(|_| ())
}

async fn run_import(
    config: CrawlerConfig,
    database_url: &str,
    csv: &Path,
) -> Result<(), CrawlerError> {
    let file = File::open(csv).map_err(ImportError::from)?;
    let store = PgStore::connect(database_url, &config.schema, &config.url_column, 1).await?;
    let result =
        import::import_csv(&store, &config.input_table, &config.url_column, file).await;
    store.close().await;
    let rows = result?;
    info!("Imported {} rows from {}", rows, csv.display());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse the command-line arguments
    let mut cli = Cli::parse();
    let command = cli.command.take();
    let (config, database_url) = cli.into_config();

    let result = match command {
        Some(Command::Import { csv }) => run_import(config, &database_url, &csv).await,
        None => run(config, &database_url).await,
    };
    match result {
        Ok(()) => {
            info!("Finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
