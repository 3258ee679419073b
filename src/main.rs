use clap::{Parser, ValueEnum};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;

use profitbot::config::{load_fee_schedule, StrategyConfig};
use profitbot::execution::TradingEngine;
use profitbot::models::FeeSchedule;
use profitbot::sim::{SimRouter, SyntheticFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Trade against the built-in fill simulator
    Simulation,
    /// Trade against a real venue (requires a wired exchange client)
    Live,
}

#[derive(Parser, Debug)]
#[command(name = "profitbot", about = "Fee-aware limit-order trading engine")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Simulation)]
    mode: Mode,

    /// Override the configured instrument
    #[arg(long)]
    symbol: Option<String>,

    /// Starting quote balance for simulation runs
    #[arg(long, default_value_t = 10_000.0)]
    starting_quote: f64,

    /// Feed seed; same seed replays the same market
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Starting mid price for the synthetic feed
    #[arg(long, default_value_t = 100.0)]
    start_price: f64,

    /// Seconds between snapshots
    #[arg(long, default_value_t = 1)]
    cadence_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut config = StrategyConfig::from_env();
    if let Some(symbol) = &cli.symbol {
        config.symbol = symbol.clone();
    }
    let fees = load_fee_schedule();
    config.validate(&fees)?;

    match cli.mode {
        Mode::Live => {
            // Refuse to start rather than silently fall back to simulation
            anyhow::bail!("live mode requires an exchange client and none is configured")
        }
        Mode::Simulation => run_simulation(cli, config, fees).await,
    }
}

async fn run_simulation(
    cli: Cli,
    config: StrategyConfig,
    fees: FeeSchedule,
) -> anyhow::Result<()> {
    tracing::info!(
        "simulation starting: {} seed={} quote={:.2}",
        config.symbol,
        cli.seed,
        cli.starting_quote
    );

    let router = SimRouter::new(fees.clone(), cli.starting_quote);
    let feed = SyntheticFeed::new(&config.symbol, cli.start_price, cli.seed);
    let engine = TradingEngine::new(config, fees, router);

    // Capacity 1: the engine always consumes the freshest snapshot and the
    // feed blocks rather than queueing a backlog of stale books
    let (snapshot_tx, snapshot_rx) = mpsc::channel(1);
    let (stop_tx, stop_rx) = watch::channel(false);

    let feed_task = tokio::spawn(feed.run(snapshot_tx, Duration::from_secs(cli.cadence_secs)));
    let mut engine_task = tokio::spawn(engine.run(snapshot_rx, stop_rx));

    tokio::select! {
        result = &mut engine_task => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received: draining open positions");
            let _ = stop_tx.send(true);
            // Keep cycling until every position has closed at or above its floor
            engine_task.await??;
        }
    }

    feed_task.abort();
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "profitbot=info".into()),
        )
        .init();
}
