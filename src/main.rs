//! # Cadence — feed refresh-rate tier scheduler
//!
//! Usage:
//!   cadence run                        # Tier engine + feedback consumer + gateway
//!   cadence tick --rate 600            # Run one tick of a tier and exit
//!   cadence tick --rate 600 --dry-run  # Show what the tick would publish
//!   cadence plan --rate 60             # List the feeds a tier owns right now
//!   cadence import feeds.json          # Load a JSON snapshot into the SQLite store
//!   cadence init-config                # Write a default config file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_core::CadenceConfig;
use cadence_core::config::expand_path;
use cadence_core::traits::{BenefitResolver, EventPublisher, FeedStore, ScheduleStore};
use cadence_core::types::RoutingKey;
use cadence_scheduler::{
    DispatchOrchestrator, HealthFeedbackConsumer, HttpBenefits, HttpPublisher, MemoryBroker,
    ScheduleRegistry, Snapshot, SqliteStore, StaticBenefits, TierEngine, TierSelector,
};

#[derive(Parser)]
#[command(
    name = "cadence",
    version,
    about = "⏱️ Cadence — refresh-rate tier scheduler for feed subscriptions"
)]
struct Cli {
    /// Config file (default: ~/.cadence/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start every tier loop, the feedback consumer and the gateway
    Run,
    /// Run a single tick of one tier
    Tick {
        /// Tier rate in seconds
        #[arg(long)]
        rate: u64,
        /// Select only; publish nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// List the URLs and feeds a tier currently selects
    Plan {
        #[arg(long)]
        rate: u64,
    },
    /// Import a JSON snapshot ({"feeds": [...], "schedules": [...]}) into the SQLite store
    Import { snapshot: String },
    /// Write the default configuration
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Everything a command needs, wired from config.
struct Runtime {
    config: CadenceConfig,
    feeds: Arc<dyn FeedStore>,
    orchestrator: Arc<DispatchOrchestrator>,
    /// Present when the broker runs in-process.
    memory_broker: Option<MemoryBroker>,
}

impl Runtime {
    fn build(config: CadenceConfig) -> Result<Self> {
        let (feeds, schedules) = open_stores(&config)?;
        let benefits = benefit_resolver(&config)?;
        let (publisher, memory_broker) = match config.broker.mode.as_str() {
            "http" => {
                let publisher = HttpPublisher::new(&config.broker.endpoint, config.broker.timeout_secs)?;
                (Arc::new(publisher) as Arc<dyn EventPublisher>, None)
            }
            _ => {
                let broker = MemoryBroker::new();
                (Arc::new(broker.clone()) as Arc<dyn EventPublisher>, Some(broker))
            }
        };

        let selector = TierSelector::new(
            config.default_refresh_rate_seconds(),
            ScheduleRegistry::new(schedules),
        );
        let orchestrator = DispatchOrchestrator::new(feeds.clone(), selector, benefits, publisher)
            .with_max_daily_default(config.max_daily_articles_default)
            .with_publish_concurrency(config.broker.publish_concurrency);

        Ok(Self {
            config,
            feeds,
            orchestrator: Arc::new(orchestrator),
            memory_broker,
        })
    }
}

/// A `.json` store path is loaded as an in-memory snapshot; anything else is SQLite.
fn open_stores(config: &CadenceConfig) -> Result<(Arc<dyn FeedStore>, Arc<dyn ScheduleStore>)> {
    let path = expand_path(&config.store.path);
    if path.extension().is_some_and(|ext| ext == "json") {
        let snapshot = Snapshot::load(&path)
            .with_context(|| format!("loading snapshot {}", path.display()))?;
        let (feeds, schedules) = snapshot.into_stores(config.store.page_size);
        tracing::info!("📂 Using in-memory store from {} ({} feeds)", path.display(), feeds.len());
        return Ok((Arc::new(feeds), Arc::new(schedules)));
    }

    let store = SqliteStore::open(&path, config.store.page_size)
        .with_context(|| format!("opening {}", path.display()))?;
    tracing::info!("🗄️ Using SQLite store at {}", path.display());
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

fn benefit_resolver(config: &CadenceConfig) -> Result<Arc<dyn BenefitResolver>> {
    Ok(match config.benefits.source.as_str() {
        "http" => Arc::new(HttpBenefits::new(&config.benefits.url, config.benefits.timeout_secs)?),
        _ => Arc::new(StaticBenefits::new(config.benefits.users.clone())),
    })
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(CadenceConfig::default_path)
}

fn load_config(path: &Path) -> Result<CadenceConfig> {
    if path.exists() {
        Ok(CadenceConfig::load_from(path)?)
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(CadenceConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "cadence=debug,cadence_scheduler=debug,cadence_gateway=debug,tower_http=debug"
    } else {
        "cadence=info,cadence_scheduler=info,cadence_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let path = config_path(&cli);

    match cli.command {
        Command::InitConfig { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            CadenceConfig::default().save_to(&path)?;
            println!("✅ Wrote default config to {}", path.display());
        }
        Command::Import { snapshot } => {
            let config = load_config(&path)?;
            let db = expand_path(&config.store.path);
            let store = SqliteStore::open(&db, config.store.page_size)?;
            store.import(&Snapshot::load(&expand_path(&snapshot))?)?;
            println!("✅ Imported {} into {}", snapshot, db.display());
        }
        Command::Plan { rate } => {
            let runtime = Runtime::build(load_config(&path)?)?;
            let plan = runtime.orchestrator.plan(rate).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Tick { rate, dry_run } => {
            let runtime = Runtime::build(load_config(&path)?)?;
            if dry_run {
                let plan = runtime.orchestrator.plan(rate).await?;
                println!(
                    "🔍 Tier {}s would publish {} fetch request(s) and up to {} delivery request(s)",
                    rate,
                    plan.urls.len(),
                    plan.feed_ids.len()
                );
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                let report = runtime.orchestrator.run_tick(rate).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Command::Run => run(Runtime::build(load_config(&path)?)?).await?,
    }

    Ok(())
}

async fn run(runtime: Runtime) -> Result<()> {
    let scheduler = &runtime.config.scheduler;
    let engine = TierEngine::resolve(
        runtime.orchestrator.clone(),
        &scheduler.extra_rates_seconds,
        scheduler.run_on_start,
    )
    .await?;
    let mut handles = vec![engine.start()];

    let feedback = HealthFeedbackConsumer::new(runtime.feeds.clone());
    if let Some(broker) = &runtime.memory_broker {
        for key in [RoutingKey::UrlFetchFailed, RoutingKey::ConnectionRejected] {
            handles.push(tokio::spawn(feedback.clone().run(broker.subscribe(key))));
        }
    }

    let state = cadence_gateway::AppState::new(engine, feedback);
    let gateway_config = runtime.config.gateway.clone();
    let gateway = tokio::spawn(async move {
        if let Err(e) = cadence_gateway::start_server(&gateway_config, state).await {
            tracing::error!("❌ Gateway stopped: {e}");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 Shutting down");
    gateway.abort();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
