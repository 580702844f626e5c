use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use augur_core::app::{DispatcherBuilder, LoadHarness, ScoreHandler, WorkerGroup, synthetic_batch};
use augur_core::config::AugurConfig;
use augur_core::domain::{DefaultDecider, InstrumentKey, SentimentCounts, Task, TaskKind};
use augur_core::impls::{InMemoryScoreStore, InMemoryTransport, TransportCounts};
use augur_core::lock::StrategyKind;
use augur_core::typed::{PriceUpdate, Recalibrate};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "augur")]
#[command(about = "Per-instrument prediction scoring under a key lock coordinator")]
#[command(version)]
struct Args {
    /// TOML config file (defaults apply when omitted)
    #[arg(short, long, env = "AUGUR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured lock strategy
    #[arg(short, long, value_enum, env = "AUGUR_STRATEGY")]
    strategy: Option<StrategyArg>,

    /// Override the configured retry threshold
    #[arg(long)]
    max_retry: Option<u32>,

    /// Override the configured lock acquisition timeout
    #[arg(long)]
    acquire_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push a demo batch through the transport and worker group
    Run {
        #[arg(long, default_value_t = 4)]
        workers: usize,

        #[arg(long, default_value_t = 5)]
        keys: usize,

        /// Price updates per key
        #[arg(long, default_value_t = 8)]
        updates: usize,

        /// Store writes that fail before the store recovers
        #[arg(long, default_value_t = 2)]
        fail_writes: u32,

        /// Redelivery base delay for this run
        #[arg(long, default_value_t = 100)]
        base_delay_ms: u64,
    },
    /// Compare both strategies on a synthetic batch and print a JSON report
    Bench {
        #[arg(long, default_value_t = 8)]
        keys: usize,

        #[arg(long, default_value_t = 200)]
        tasks: usize,

        /// One wildcard task every N tasks (0 disables)
        #[arg(long, default_value_t = 20)]
        wildcard_every: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Blocking,
    Cooperative,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Blocking => StrategyKind::Blocking,
            StrategyArg::Cooperative => StrategyKind::Cooperative,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("augur=info,augur_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Command::Run {
            workers,
            keys,
            updates,
            fail_writes,
            base_delay_ms,
        } => {
            let mut config = config;
            config.redelivery_base_delay_ms = base_delay_ms;
            run_demo(&config, workers, keys, updates, fail_writes).await
        }
        Command::Bench {
            keys,
            tasks,
            wildcard_every,
        } => bench(&config, keys, tasks, wildcard_every).await,
    }
}

fn load_config(args: &Args) -> Result<AugurConfig> {
    let mut config = match &args.config {
        Some(path) => AugurConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AugurConfig::default(),
    };

    if let Some(strategy) = args.strategy {
        config.strategy = strategy.into();
    }
    if let Some(max_retry) = args.max_retry {
        config.max_retry = max_retry;
    }
    if let Some(ms) = args.acquire_timeout_ms {
        config.acquire_timeout_ms = Some(ms);
    }
    Ok(config)
}

async fn run_demo(
    config: &AugurConfig,
    workers: usize,
    key_count: usize,
    updates: usize,
    fail_writes: u32,
) -> Result<()> {
    let store = Arc::new(InMemoryScoreStore::new(config.history_window));
    let keys: Vec<InstrumentKey> = (0..key_count.max(1)).map(|_| InstrumentKey::generate()).collect();
    for key in &keys {
        store.seed(*key, [50]);
    }
    store.fail_next_writes(fail_writes);

    let retry = config.retry_policy();
    let handler = ScoreHandler::new(store.clone(), store.clone());
    let dispatcher = DispatcherBuilder::new()
        .register::<PriceUpdate, _>(handler.clone())?
        .register::<Recalibrate, _>(handler)?
        .expect_kinds(&[TaskKind::PriceUpdate, TaskKind::Recalibrate])
        .lock_settings(config.lock_settings())
        .retry_policy(retry)
        .build()
        .context("building dispatcher")?;
    info!(strategy = %dispatcher.strategy(), workers, keys = keys.len(), "starting demo run");

    let transport = InMemoryTransport::new();
    let group = WorkerGroup::spawn(
        workers.max(1),
        transport.clone(),
        Arc::new(dispatcher),
        Arc::new(DefaultDecider::new(retry)),
    );

    for round in 0..updates {
        for (i, key) in keys.iter().enumerate() {
            let counts = demo_counts(round, i);
            let payload = serde_json::to_value(PriceUpdate { counts })
                .context("encoding demo payload")?;
            transport
                .enqueue(Task::from_json(*key, TaskKind::PriceUpdate, payload))
                .await;
        }
    }
    transport
        .enqueue(Task::from_json(
            InstrumentKey::WILDCARD,
            TaskKind::Recalibrate,
            json!({"reason": "end of demo batch"}),
        ))
        .await;

    let counts = tokio::select! {
        counts = wait_settled(&transport) => counts,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; shutting down before the batch settled");
            transport.counts().await
        }
    };
    transport.close().await;
    group.shutdown_and_join().await;

    let scores: serde_json::Map<String, serde_json::Value> = store
        .snapshot()
        .into_iter()
        .map(|(key, score)| (key.to_string(), json!(score)))
        .collect();
    let report = json!({
        "strategy": config.strategy,
        "scores": scores,
        "deliveries": counts,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("encoding run report")?
    );
    Ok(())
}

async fn bench(config: &AugurConfig, keys: usize, tasks: usize, wildcard_every: usize) -> Result<()> {
    let harness = LoadHarness::new(config.latency_profile(), &config.lock_settings())
        .context("building load harness")?;
    let batch = synthetic_batch(keys, tasks, wildcard_every);
    info!(tasks = batch.len(), keys, wildcard_every, "starting synthetic comparison");

    let report = harness.compare(&batch).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("encoding comparison report")?
    );
    Ok(())
}

async fn wait_settled(transport: &InMemoryTransport) -> TransportCounts {
    loop {
        let counts = transport.counts().await;
        if counts.is_settled() {
            return counts;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Deterministic mix of bullish, bearish and quiet rounds.
fn demo_counts(round: usize, key_index: usize) -> SentimentCounts {
    let n = (round + key_index) as u64;
    match n % 3 {
        0 => SentimentCounts::new(3 + n % 4, 1, n % 2),
        1 => SentimentCounts::new(n % 2, 2, 2 + n % 3),
        _ => SentimentCounts::new(1, 4, 1),
    }
}
