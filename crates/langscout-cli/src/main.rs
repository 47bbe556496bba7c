use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use langscout_client::{HtmlLanguageDetector, ReqwestFetcher, ReqwestNotifier};
use langscout_core::models::{BatchLookup, NewProxy, ProxyCredentials, ProxyScheme};
use langscout_core::traits::{BatchStore, DomainStore, NullNotifier, ProxyRegistry};
use langscout_core::work_queue::WorkQueue;
use langscout_core::{
    CrawlConfig, CrawlEvent, CrawlReporter, MemoryStore, ProxyPool, ResultTracker, Scheduler,
    TracingCrawlReporter, Worker, submit_batch,
};
use langscout_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(
    name = "langscout",
    version,
    about = "Crawl domains through a proxy pool and classify their language"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the crawl scheduler against PostgreSQL until Ctrl-C
    Crawl {
        /// Concurrent leases per proxy and for the direct lane
        #[arg(long, env = "LANGSCOUT_THREADS_PER_PROXY")]
        threads_per_proxy: Option<usize>,

        /// Global concurrency budget
        #[arg(long, env = "LANGSCOUT_MAX_THREADS")]
        max_threads: Option<usize>,
    },

    /// Submit a batch of hosts for priority crawling
    Submit {
        /// Comma-separated hosts, e.g. "a.example,b.example"
        #[arg(long, required = true, value_delimiter = ',')]
        hosts: Vec<String>,

        /// URL notified when every domain has been visited
        #[arg(long)]
        callback: Option<String>,
    },

    /// Show the persisted status of a batch
    Status {
        /// Batch code returned by `submit`
        #[arg(long)]
        code: String,
    },

    /// Manage the proxy registry
    Proxies {
        #[command(subcommand)]
        action: ProxyCommand,
    },

    /// Visit hosts once without a database and print the results as JSON
    Probe {
        /// Hosts to visit
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Response timeout in seconds
        #[arg(long, default_value_t = 15)]
        timeout_secs: u64,
    },
}

#[derive(Subcommand)]
enum ProxyCommand {
    /// Import proxies from a CSV file with columns endpoint,scheme,username,password
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List registered proxies
    List {
        /// Maximum number of proxies to show (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,

        #[arg(short, long, default_value_t = 0)]
        offset: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("langscout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            threads_per_proxy,
            max_threads,
        } => {
            let mut config = CrawlConfig::from_env()?;
            if let Some(n) = threads_per_proxy {
                config.threads_per_proxy = n;
            }
            if let Some(n) = max_threads {
                config.max_threads = n;
            }
            config.validate()?;
            cmd_crawl(&connect_db().await?, config).await?;
        }
        Commands::Submit { hosts, callback } => {
            let config = CrawlConfig::from_env()?;
            cmd_submit(&connect_db().await?, &config, &hosts, callback.as_deref()).await?;
        }
        Commands::Status { code } => {
            cmd_status(&connect_db().await?, &code).await?;
        }
        Commands::Proxies { action } => {
            let db = connect_db().await?;
            match action {
                ProxyCommand::Import { file } => cmd_proxies_import(&db, &file).await?,
                ProxyCommand::List { limit, offset } => {
                    cmd_proxies_list(&db, limit, offset).await?
                }
            }
        }
        Commands::Probe {
            hosts,
            timeout_secs,
        } => {
            let mut config = CrawlConfig::from_env()?;
            config.response_timeout = Duration::from_secs(timeout_secs);
            config.poll_interval = Duration::from_millis(100);
            cmd_probe(&hosts, config).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and run migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_crawl(db: &Database, config: CrawlConfig) -> Result<()> {
    let pool = ProxyPool::new(config.threads_per_proxy);
    let loaded = pool
        .refresh_from(&db.proxy_repo())
        .await
        .context("Failed to load proxy registry")?;
    tracing::info!(proxies = loaded, "Proxy pool loaded");

    let tracker = ResultTracker::new(config.batch_lifetime);
    let worker = Worker::new(
        ReqwestFetcher::with_timeout(config.response_timeout),
        HtmlLanguageDetector::new(),
        db.domain_repo(),
        ReqwestNotifier::new()?,
        tracker.clone(),
        config.refresh.clone(),
    );
    let scheduler = Scheduler::new(worker, db.domain_repo(), pool.clone(), config.clone());

    let cancel = CancellationToken::new();
    let refresher = tokio::spawn({
        let registry = db.proxy_repo();
        let cancel = cancel.clone();
        let interval = config.dead_proxy_refresh;
        async move { pool.run_refresh(registry, interval, cancel).await }
    });
    let sweeper = tokio::spawn({
        let cancel = cancel.clone();
        let interval = config.sweep_interval;
        async move { tracker.run_sweeper(interval, cancel).await }
    });
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, finishing in-flight visits");
            }
            cancel.cancel();
        }
    });

    let result = scheduler.run(cancel.clone(), TracingCrawlReporter).await;
    cancel.cancel();
    let _ = tokio::join!(refresher, sweeper);

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "dispatched": summary.dispatched,
        "lease_exhausted": summary.lease_exhausted,
        "claim_failures": summary.claim_failures,
    }))?);

    Ok(())
}

async fn cmd_submit(
    db: &Database,
    config: &CrawlConfig,
    hosts: &[String],
    callback: Option<&str>,
) -> Result<()> {
    let tracker = ResultTracker::new(config.batch_lifetime);
    let receipt = submit_batch(
        &db.domain_repo(),
        &db.batch_repo(),
        &tracker,
        &ReqwestNotifier::new()?,
        hosts,
        callback,
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn cmd_status(db: &Database, code: &str) -> Result<()> {
    let output = match db.batch_repo().lookup_batch(code).await? {
        BatchLookup::Ready(domains) => serde_json::json!({
            "code": code,
            "status": "ready",
            "domains": domains,
        }),
        BatchLookup::NotReady => serde_json::json!({ "code": code, "status": "pending" }),
        BatchLookup::NotFound => serde_json::json!({ "code": code, "status": "not_found" }),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// One CSV row of a proxy import.
#[derive(Debug, Deserialize)]
struct ProxyRecord {
    endpoint: String,
    scheme: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Parse proxy CSV with a header row. Empty credential cells mean no auth.
fn parse_proxy_csv<R: Read>(reader: R) -> Result<Vec<NewProxy>> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut proxies = Vec::new();
    for (line, record) in csv.deserialize::<ProxyRecord>().enumerate() {
        let record = record.with_context(|| format!("Invalid proxy record on row {}", line + 1))?;
        let scheme: ProxyScheme = record
            .scheme
            .parse()
            .map_err(|e: String| anyhow::anyhow!("Row {}: {e}", line + 1))?;
        let credentials = record
            .username
            .filter(|u| !u.is_empty())
            .map(|username| ProxyCredentials {
                username,
                password: record.password.unwrap_or_default(),
            });
        proxies.push(NewProxy {
            endpoint: record.endpoint,
            scheme,
            credentials,
        });
    }
    Ok(proxies)
}

fn read_proxy_file(path: &Path) -> Result<Vec<NewProxy>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open proxy file: {}", path.display()))?;
    parse_proxy_csv(file)
}

async fn cmd_proxies_import(db: &Database, path: &Path) -> Result<()> {
    let proxies = read_proxy_file(path)?;
    if proxies.is_empty() {
        println!("No proxies found in {}", path.display());
        return Ok(());
    }

    let inserted = db.proxy_repo().add_proxies(&proxies).await?;
    println!("Imported {inserted} proxies from {}", path.display());
    Ok(())
}

async fn cmd_proxies_list(db: &Database, limit: usize, offset: usize) -> Result<()> {
    let proxies = db.proxy_repo().list_proxies(limit, offset).await?;
    if proxies.is_empty() {
        println!("No proxies registered");
        return Ok(());
    }

    for proxy in &proxies {
        let auth = if proxy.credentials.is_some() {
            " (auth)"
        } else {
            ""
        };
        println!(
            "  [{}] {}://{}{}",
            proxy.id, proxy.scheme, proxy.endpoint, auth
        );
    }
    println!("\nTotal: {} proxies", proxies.len());
    Ok(())
}

/// Stops the probe scheduler once every domain has been visited.
#[derive(Clone)]
struct ProbeReporter {
    remaining: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl CrawlReporter for ProbeReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        let finished = matches!(event, CrawlEvent::VisitFinished { .. });
        TracingCrawlReporter.report(event);
        if finished && self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cancel.cancel();
        }
    }
}

async fn cmd_probe(hosts: &[String], config: CrawlConfig) -> Result<()> {
    let store = MemoryStore::new();
    let domains = store.upsert_domains(hosts).await?;
    let now = Utc::now();
    for domain in &domains {
        store.requeue(domain.id, now).await?;
    }

    let worker = Worker::new(
        ReqwestFetcher::with_timeout(config.response_timeout),
        HtmlLanguageDetector::new(),
        store.clone(),
        NullNotifier,
        ResultTracker::new(config.batch_lifetime),
        config.refresh.clone(),
    );
    let pool = ProxyPool::new(config.threads_per_proxy);
    let scheduler = Scheduler::new(worker, store.clone(), pool, config);

    let cancel = CancellationToken::new();
    let reporter = ProbeReporter {
        remaining: Arc::new(AtomicUsize::new(domains.len())),
        cancel: cancel.clone(),
    };
    scheduler.run(cancel, reporter).await?;

    let ids: Vec<i64> = domains.iter().map(|d| d.id).collect();
    let visited = store.get_domains(&ids).await?;
    println!("{}", serde_json::to_string_pretty(&visited)?);
    Ok(())
}
