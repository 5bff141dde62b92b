use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use upbot::api::{RateLimits, UpbitClient};
use upbot::config::AppConfig;
use upbot::execution::{
    spawn_poller, spawn_wallet, CandleBook, HistoryStore, HistorySummary, Orchestrator,
    PollerSettings, Wallet, WalletHandle,
};
use upbot::shutdown::Shutdown;
use upbot::strategy::{Strategy, StrategyEvaluator};

const DEFAULT_LOG_FILTER: &str = "upbot=info";

/// Paper-trading engine for Upbit spot markets
#[derive(Debug, Parser)]
#[command(name = "upbot", version)]
struct Cli {
    /// TOML configuration file (defaults to ./upbot.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// tracing filter directive, overrides RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.log_filter.as_deref());

    tracing::info!("🚀 upbot starting");

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    log_config(&config);

    let limits = Arc::new(
        RateLimits::new(config.rate_limit.per_second, config.rate_limit.per_minute)
            .context("building rate limiters")?,
    );
    let client = Arc::new(
        UpbitClient::new(
            config.exchange.base_url.clone(),
            Duration::from_secs(config.exchange.request_timeout_secs),
        )
        .context("building HTTP client")?,
    );

    let (trigger, shutdown) = Shutdown::new();

    // Wallet actor outlives the orchestrator so the final summary can be read
    let (wallet_trigger, wallet_shutdown) = Shutdown::new();
    let (wallet, wallet_task) = spawn_wallet(
        Wallet::new(config.wallet.starting_balance, config.wallet.fee_rate),
        config.wallet.inbox_capacity,
        wallet_shutdown,
    );

    let (events, poller_task) = spawn_poller(
        client,
        limits,
        PollerSettings::from(&config.poller),
        config.poller.channel_capacity,
        shutdown.clone(),
    );

    let strategies = Strategy::from_config(&config);
    let (orchestrator, history_rx) = Orchestrator::new(
        HistoryStore::new(config.history.capacity),
        CandleBook::new(config.history.candle_capacity),
        StrategyEvaluator::new(strategies),
        wallet.clone(),
        config.wallet.buy_unit,
    );
    let orchestrator_task = tokio::spawn(orchestrator.run(events, shutdown.clone()));

    let report_task = {
        let wallet = wallet.clone();
        let history_rx = history_rx.clone();
        let every = Duration::from_secs(config.report.summary_interval_secs);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if !every.is_zero() {
                report_loop(wallet, history_rx, every, shutdown).await;
            }
        })
    };

    tracing::info!("✅ All tasks spawned, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");
    trigger.cancel();

    if let Err(e) = poller_task.await {
        tracing::error!(error = %e, "Poller task failed");
    }
    let orchestrator = orchestrator_task.await.context("orchestrator task failed")?;
    if let Err(e) = report_task.await {
        tracing::error!(error = %e, "Report task failed");
    }

    let last_prices = orchestrator.history().last_prices();
    match wallet.summary(&last_prices).await {
        Ok(summary) => tracing::info!("Final state\n{}", summary),
        Err(e) => tracing::warn!(error = %e, "Could not read final wallet state"),
    }

    drop(wallet);
    wallet_trigger.cancel();
    let final_wallet = wallet_task.await.context("wallet task failed")?;
    tracing::info!(
        balance = %final_wallet.balance(),
        positions = final_wallet.positions().len(),
        "👋 upbot stopped"
    );
    Ok(())
}

fn setup_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directive) => tracing_subscriber::EnvFilter::new(directive),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_config(config: &AppConfig) {
    tracing::info!("📋 Configuration:");
    tracing::info!("  Exchange: {}", config.exchange.base_url);
    tracing::info!(
        "  Snapshots every {}ms, candles every {}s",
        config.poller.snapshot_interval_ms,
        config.poller.candle_interval_secs
    );
    tracing::info!(
        "  Rate limits: {}/s, {}/min per endpoint",
        config.rate_limit.per_second,
        config.rate_limit.per_minute
    );
    tracing::info!("  History window: {} ticks", config.history.capacity);
    tracing::info!(
        "  Wallet: {} starting, fee {}, {} per buy",
        config.wallet.starting_balance,
        config.wallet.fee_rate,
        config.wallet.buy_unit
    );
    tracing::info!("  Strategies: {:?}", config.strategy.enabled);
}

/// Periodically logs the wallet valued at the latest published prices
async fn report_loop(
    wallet: WalletHandle,
    history_rx: watch::Receiver<HistorySummary>,
    every: Duration,
    shutdown: Shutdown,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let history = history_rx.borrow().clone();
        match wallet.summary(&history.last_prices()).await {
            Ok(summary) => {
                tracing::info!("📊 {}", history);
                tracing::info!("💼 {}", summary);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Wallet unavailable, stopping reports");
                break;
            }
        }
    }
}
