use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use invsync_core::Kind;
use invsync_inventory::{HttpInventoryClient, HttpInventoryConfig, InventoryClient};
use invsync_kubehub::{ClusterIdentity, ClusterView};
use invsync_store::{DeadLetters, MirrorStores};
use invsync_sync::{bootstrap::populate, Engine, RetryQueue, SyncConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "invsyncd", version, about = "Mirror cluster topology into the inventory service")]
struct Cli {
    /// ExternalId of this cluster's inventory entry (UUID)
    #[arg(long, env = "INVSYNC_CLUSTER_ID")]
    cluster_id: String,

    /// Display name of this cluster
    #[arg(long, env = "INVSYNC_CLUSTER_NAME", default_value = "kubernetes")]
    cluster_name: String,

    #[arg(long, env = "INVSYNC_BATCH_SIZE", default_value_t = 100)]
    batch_size: usize,

    #[arg(long, env = "INVSYNC_BATCH_PERIOD_SECS", default_value_t = 60)]
    batch_period_secs: u64,

    #[arg(long, env = "INVSYNC_GC_INTERVAL_SECS", default_value_t = 600)]
    gc_interval_secs: u64,

    /// Extra random GC delay as a fraction of the interval
    #[arg(long, env = "INVSYNC_GC_JITTER", default_value_t = 0.1)]
    gc_jitter: f64,

    #[arg(long, env = "INVSYNC_RETRY_MIN_MS", default_value_t = 1000)]
    retry_min_ms: u64,

    #[arg(long, env = "INVSYNC_RETRY_MAX_SECS", default_value_t = 300)]
    retry_max_secs: u64,

    /// Base URL of the inventory API
    #[arg(long, env = "INVSYNC_INVENTORY_URL")]
    inventory_url: String,

    /// Bearer token for the inventory API (prefer the env var)
    #[arg(long, env = "INVSYNC_INVENTORY_TOKEN", hide_env_values = true)]
    inventory_token: Option<String>,

    #[arg(long, env = "INVSYNC_INVENTORY_TIMEOUT_SECS", default_value_t = 30)]
    inventory_timeout_secs: u64,

    /// Page size for startup population
    #[arg(long, env = "INVSYNC_PAGE_SIZE", default_value_t = 500)]
    page_size: usize,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Run the sync engine until interrupted (default)
    Run,
    /// Populate a mirror from the inventory, print per-kind counts and exit
    Mirror {
        #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
        output: Output,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

fn init_tracing() {
    let env = std::env::var("INVSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("INVSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid INVSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

impl Cli {
    fn cluster(&self) -> Result<ClusterIdentity> {
        let id = uuid::Uuid::parse_str(&self.cluster_id).context("--cluster-id must be a UUID")?;
        Ok(ClusterIdentity { id: id.to_string(), name: self.cluster_name.clone() })
    }

    fn sync_config(&self) -> Result<SyncConfig> {
        Ok(SyncConfig {
            cluster: self.cluster()?,
            batch_size: self.batch_size,
            batch_period: Duration::from_secs(self.batch_period_secs),
            gc_interval: Duration::from_secs(self.gc_interval_secs),
            gc_jitter: self.gc_jitter,
            retry_min_backoff: Duration::from_millis(self.retry_min_ms),
            retry_max_backoff: Duration::from_secs(self.retry_max_secs),
        })
    }

    fn inventory(&self) -> Result<HttpInventoryClient> {
        HttpInventoryClient::new(HttpInventoryConfig {
            base_url: self.inventory_url.clone(),
            token: self.inventory_token.clone(),
            timeout: Duration::from_secs(self.inventory_timeout_secs),
            page_size: self.page_size,
        })
    }
}

async fn run(cfg: SyncConfig, inventory: Arc<dyn InventoryClient>) -> Result<()> {
    let (queue, rx) = RetryQueue::new(cfg.retry_min_backoff, cfg.retry_max_backoff);
    let client = invsync_kubehub::connect().await?;
    let watchers = invsync_kubehub::spawn_watchers(client, cfg.cluster.clone(), queue.sender());
    watchers.wait_until_ready().await?;
    info!("cluster caches ready");

    let view: Arc<dyn ClusterView> = Arc::new(watchers.view.clone());
    let engine = Engine::new(cfg, view, inventory, queue);
    engine.bootstrap().await?;

    let shutdown = CancellationToken::new();
    let handles = engine.spawn(rx, shutdown.clone());
    info!(cluster = %engine.config().cluster.id, "sync engine running");

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    shutdown.cancel();
    for h in handles {
        if let Err(e) = h.await {
            warn!(error = %e, "task ended abnormally");
        }
    }
    watchers.abort();
    Ok(())
}

async fn mirror(cluster: ClusterIdentity, inventory: &dyn InventoryClient, output: Output) -> Result<()> {
    let mut stores = MirrorStores::new();
    let mut dead = DeadLetters::new();
    populate(inventory, &cluster.id, &mut stores, &mut dead).await?;
    let counts: Vec<(Kind, usize)> = Kind::ALL.iter().map(|k| (*k, stores.get(*k).len())).collect();
    match output {
        Output::Human => {
            for (kind, n) in &counts {
                println!("{:<22} {}", kind.as_str(), n);
            }
            println!("{:<22} {}", "dead_letters", dead.len());
        }
        Output::Json => {
            let mut m = serde_json::Map::new();
            for (kind, n) in &counts {
                m.insert(kind.as_str().to_string(), (*n).into());
            }
            m.insert("dead_letters".into(), dead.len().into());
            println!("{}", serde_json::to_string_pretty(&m)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let inventory = Arc::new(cli.inventory()?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.sync_config()?, inventory).await,
        Commands::Mirror { output } => mirror(cli.cluster()?, inventory.as_ref(), output).await,
    }
}
