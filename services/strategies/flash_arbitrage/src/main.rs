use anyhow::{bail, Context, Result};
use clap::Parser;
use ethers::signers::{LocalWallet, Signer};
use flash_arbitrage::lenders::FEE_TTL;
use flash_arbitrage::logging::{init_tracing, LogEmoji};
use flash_arbitrage::market::to_units;
use flash_arbitrage::{
    AavePremiumSource, BundlePlanner, CachedOracle, ChainEventSource, Controller, DivergenceMonitor, DivergencePoll,
    FeeDataGasEstimator, FlashArbitrageConfig, GasEstimator, HealthChecker, LenderCatalog, MarketView,
    MedianQuoteAggregator, ModeController, OnChainMarket, OpportunitySizer, PathUniverse, PipelineJournal,
    PriceOracle, RouterPriceOracle, StrategyMetrics, StrategyPipeline, TriggerSource,
};
use mev::{BundleExecutor, FlashbotsRelay, MevProtection, PrivateRelay};
use network::{ChainClient, RpcPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "flash_arbitrage", about = "Cyclic flash-loan arbitrage daemon")]
struct Args {
    /// TOML or JSON configuration file; defaults plus CYCLONE_* env when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scan every path once, print the best opportunity and exit without submitting
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FlashArbitrageConfig::from_file(path)?,
        None => FlashArbitrageConfig::from_env(),
    };
    init_tracing(&config.logging.log_level, args.json_logs || config.logging.json)?;
    config.validate().context("Invalid configuration")?;
    if !args.once {
        config.validate_submission().context("Configuration cannot submit")?;
    }

    info!("🚀 Starting Flash Arbitrage Service...");

    let journal = Arc::new(match config.journal_path()? {
        Some(path) => {
            info!("📂 Pipeline journal at {}", path.display());
            PipelineJournal::open(&path)?
        }
        None => PipelineJournal::disabled(),
    });
    let metrics = Arc::new(StrategyMetrics::default());

    let chain: Arc<dyn ChainClient> = Arc::new(RpcPool::connect(&config.network)?);
    let chain_id = chain.chain_id().await.context("Chain endpoint unreachable")?;
    if chain_id != config.wallet.chain_id {
        bail!(
            "Endpoint serves chain {} but wallet is configured for {}",
            chain_id,
            config.wallet.chain_id
        );
    }
    info!("{} Connected to chain {} via {}", LogEmoji::SUCCESS, chain_id, config.network.read_url);

    let usd = config
        .find_asset(&config.exchange.usd_symbol)
        .cloned()
        .context("USD asset missing")?;
    let native = config
        .find_asset(&config.exchange.native_symbol)
        .cloned()
        .context("Native asset missing")?;

    let mut sources: Vec<Arc<dyn PriceOracle>> = vec![Arc::new(RouterPriceOracle::new(
        "router",
        chain.clone(),
        config.exchange.router,
    )?)];
    for (i, router) in config.oracle.extra_routers.iter().enumerate() {
        sources.push(Arc::new(RouterPriceOracle::new(
            format!("router-{}", i + 1),
            chain.clone(),
            *router,
        )?));
    }
    let oracle: Arc<dyn PriceOracle> = Arc::new(CachedOracle::new(
        MedianQuoteAggregator::new(sources, &config.oracle),
        config.oracle.quote_ttl(),
    ));
    let market: Arc<dyn MarketView> = Arc::new(OnChainMarket::new(
        chain.clone(),
        config.exchange.router,
        config.exchange.factory,
        usd,
        oracle,
        config.oracle.quote_ttl(),
    )?);

    let providers = config.providers();
    let live: Vec<String> = config
        .lenders
        .iter()
        .filter(|l| l.live_fee)
        .map(|l| l.name.clone())
        .collect();
    let lenders = Arc::new(if live.is_empty() {
        LenderCatalog::fixed(providers.clone())
    } else {
        LenderCatalog::with_live_fees(
            providers.clone(),
            live,
            Arc::new(AavePremiumSource::new(chain.clone())?),
            FEE_TTL,
        )
    });
    let gas: Arc<dyn GasEstimator> = Arc::new(FeeDataGasEstimator::new(
        chain.clone(),
        market.clone(),
        native,
        config.gas.clone(),
        config.executor.max_gas_price_gwei,
    ));
    let sizer = OpportunitySizer::new(
        market.clone(),
        lenders.clone(),
        gas,
        MevProtection::new(config.protection.clone()),
        config.sizing.clone(),
    );

    let universe = PathUniverse::new(&config.assets, &providers, config.sizing.max_hops);
    if universe.is_empty() {
        bail!("No lendable cycles over the configured assets");
    }
    info!(
        "{} {} cyclic paths over {} assets",
        LogEmoji::SEARCH,
        universe.len(),
        config.assets.len()
    );

    if args.once {
        let mode = ModeController::new(config.controller.extreme.clone(), config.modes.clone(), Instant::now());
        let report = sizer.scan(universe.paths(), mode.params()).await;
        match report.best {
            Some(best) => println!(
                "{} via {} ({} mode): notional ${} gross ${:.2} gas ${:.2} fee ${:.2} net ${:.2}",
                best.path,
                best.provider,
                best.mode,
                best.notional_usd,
                best.gross_profit_usd,
                best.gas_cost_usd,
                best.lender_fee_usd,
                best.net_profit_usd
            ),
            None => println!("No opportunity across {} paths: {:?}", report.evaluated, report.rejections),
        }
        return Ok(());
    }

    let key = std::env::var(&config.wallet.private_key_env)
        .with_context(|| format!("{} is not set", config.wallet.private_key_env))?;
    let wallet = key
        .trim()
        .parse::<LocalWallet>()
        .context("Invalid wallet private key")?
        .with_chain_id(config.wallet.chain_id);
    info!("🔑 Executing wallet {:?}", wallet.address());

    let relay: Option<Arc<dyn PrivateRelay>> = match &config.relay.url {
        Some(url) => {
            let auth = match std::env::var(&config.relay.auth_key_env) {
                Ok(auth) => auth.trim().parse::<LocalWallet>().context("Invalid relay auth key")?,
                Err(_) => {
                    warn!(
                        "{} {} not set, signing relay requests with the executing wallet",
                        LogEmoji::WARNING,
                        config.relay.auth_key_env
                    );
                    wallet.clone()
                }
            };
            Some(Arc::new(FlashbotsRelay::new(
                config.relay.name.clone(),
                url.clone(),
                auth,
                Duration::from_millis(config.relay.request_timeout_ms),
            )?))
        }
        None => {
            warn!("{} No private relay; bundles go out publicly", LogEmoji::WARNING);
            None
        }
    };

    let executor = BundleExecutor::new(chain.clone(), relay, wallet.clone(), config.executor.clone());
    let planner = BundlePlanner::new(config.exchange.arbitrage_contract, config.planner.clone())?;
    let pipeline = Arc::new(StrategyPipeline::new(
        sizer,
        planner,
        executor,
        lenders,
        universe,
        journal.clone(),
    ));

    let (sink, triggers) = mpsc::channel(config.events.channel_capacity);
    let min_balance = to_units(config.wallet.min_balance_native, 18).unwrap_or_default();
    let health = Arc::new(HealthChecker::new(chain.clone(), wallet.address(), min_balance));

    let mut controller = Controller::new(
        pipeline.clone(),
        config.controller.clone(),
        config.modes.clone(),
        triggers,
        journal,
        metrics,
    )?
    .with_health(health);

    let monitor = DivergenceMonitor::tracking_paths(
        market.clone(),
        pipeline.universe().paths(),
        config.events.divergence_threshold,
    );
    info!("📡 Watching {} pools for divergence", monitor.tracked());
    let poll = DivergencePoll::new(Arc::new(monitor), config.events.divergence_interval());
    let source: Arc<dyn TriggerSource> = match &config.network.ws_url {
        Some(ws_url) => Arc::new(ChainEventSource::new(ws_url.clone(), config.events.clone(), Some(poll))),
        None => {
            warn!(
                "{} No websocket endpoint; scanning on divergence and idle timeout only",
                LogEmoji::WARNING
            );
            Arc::new(poll)
        }
    };
    controller = controller.with_source(source, sink.clone());

    info!("✅ Flash Arbitrage Service initialized successfully");
    let report = controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    drop(sink);

    info!(
        "Stopped in {} mode with {} attempts used: {:?}",
        report.mode, report.attempts_used, report.metrics
    );
    Ok(())
}
