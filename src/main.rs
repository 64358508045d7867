use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autotp::config::AppConfig;
use autotp::db::{MemoryStore, OrderStore, PostgresStore};
use autotp::exchange::{BinanceSpot, ExchangeGateway, SimulatedExchange};
use autotp::execution::{Reconciler, TickRunner};
use autotp::logging::setup_logging;
use autotp::strategy::build_strategy;
use clap::Parser;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Commission charged by the paper venue, as a fraction of notional
const PAPER_COMMISSION_RATE: f64 = 0.001;

#[derive(Parser, Debug)]
#[command(name = "autotp")]
#[command(author, version, about = "Automated grid and trend trading bot", long_about = None)]
struct Cli {
    /// Config file path (YAML or TOML)
    #[arg(short, long, default_value = "config/example.yaml")]
    config: PathBuf,

    /// Trade against a simulated venue fed by live market data
    #[arg(long)]
    paper: bool,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

// ============================================================================
// Startup
// ============================================================================

async fn connect_store(config: &AppConfig, paper: bool) -> anyhow::Result<Arc<dyn OrderStore>> {
    match &config.database.url {
        // Paper orders only exist inside the simulated venue
        Some(_) if paper => {
            tracing::warn!("Ignoring database.url in paper mode, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        Some(url) => {
            let store = PostgresStore::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("No database.url configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_gateway(config: &AppConfig, paper: bool) -> anyhow::Result<Arc<dyn ExchangeGateway>> {
    let binance = Arc::new(
        BinanceSpot::new(config.exchange.clone()).context("Failed to build Binance client")?,
    );
    if paper {
        return Ok(Arc::new(SimulatedExchange::paper(binance, PAPER_COMMISSION_RATE)));
    }
    Ok(binance)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;
    setup_logging(&config.logging.filter, config.logging.json);

    let params = config.bot.clone();
    tracing::info!("🚀 autotp starting");
    tracing::info!(
        bot_id = params.bot_id,
        symbol = %params.symbol,
        strategy = ?params.strategy,
        view = ?params.view,
        paper = cli.paper,
        "📊 Configuration loaded"
    );

    let store = connect_store(&config, cli.paper).await?;
    let gateway = build_gateway(&config, cli.paper)?;
    let strategy = build_strategy(&params, store.clone(), gateway.clone());
    let reconciler = Reconciler::new(params.clone(), store, gateway.clone());
    let runner = TickRunner::new(&params.symbol, gateway, strategy, reconciler);

    if cli.once {
        let report = runner.tick().await.context("Tick failed")?;
        tracing::info!(?report, "✅ Single tick complete");
        return Ok(());
    }

    let mut ticks = interval(Duration::from_secs(params.interval_secs.max(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(
        strategy = runner.strategy_name(),
        interval_secs = params.interval_secs,
        "🔄 Tick loop running, press Ctrl+C to stop"
    );

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if let Err(e) = runner.tick().await {
                    tracing::warn!(error = %e, "Tick skipped");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    tracing::info!("👋 autotp stopped");
    Ok(())
}
