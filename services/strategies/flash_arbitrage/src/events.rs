//! # Trigger Sources - Chain Events Into The Controller
//!
//! ## Purpose
//!
//! Turns push subscriptions and periodic checks into typed [`Trigger`] messages on
//! the controller's channel. Sources never block: a full channel drops the trigger,
//! which the controller would have coalesced anyway.
//!
//! ## Architecture Role
//!
//! ```text
//! newHeads (ws) ───────────────→ Trigger::NewBlock ─────┐
//! pending txs (ws, value > X) ─→ Trigger::LargePendingTx ┼──→ mpsc ──→ Controller
//! reserves vs baseline (poll) ─→ Trigger::PoolDivergence ┘
//! ```
//!
//! Without a websocket endpoint the divergence poll runs on its own as a
//! [`DivergencePoll`]. The idle-timeout trigger is generated inside the controller
//! itself.

use crate::market::{to_units, MarketView};
use async_trait::async_trait;
use ethers::providers::{Middleware, Provider, Ws};
use futures::StreamExt;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{AssetPair, AssetPath, PoolReserves, H256, U256};

/// Why the controller should look for an opportunity now
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    NewBlock(u64),
    LargePendingTx { hash: H256, value_wei: U256 },
    PoolDivergence { pool: String, divergence: Decimal },
    IdleTimeout,
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::NewBlock(_) => "new_block",
            Trigger::LargePendingTx { .. } => "large_pending_tx",
            Trigger::PoolDivergence { .. } => "pool_divergence",
            Trigger::IdleTimeout => "idle_timeout",
        }
    }

    /// Block carried by the trigger, if any
    pub fn block(&self) -> Option<u64> {
        match self {
            Trigger::NewBlock(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::NewBlock(n) => write!(f, "block {n}"),
            Trigger::LargePendingTx { hash, .. } => write!(f, "pending tx {hash:?}"),
            Trigger::PoolDivergence { pool, divergence } => write!(f, "{pool} moved {divergence}"),
            Trigger::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSourceConfig {
    pub channel_capacity: usize,
    pub subscribe_pending: bool,
    /// Pending transactions moving more native value than this trigger a scan
    pub large_tx_threshold_native: Decimal,
    pub divergence_interval_secs: u64,
    /// Fractional reserve move that triggers a scan
    pub divergence_threshold: Decimal,
}

impl EventSourceConfig {
    pub fn divergence_interval(&self) -> Duration {
        Duration::from_secs(self.divergence_interval_secs.max(1))
    }
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            subscribe_pending: true,
            large_tx_threshold_native: dec!(50),
            divergence_interval_secs: 15,
            divergence_threshold: dec!(0.005),
        }
    }
}

/// Something that feeds the controller's trigger channel
#[async_trait]
pub trait TriggerSource: Send + Sync {
    /// Subscribe and spawn the feeding tasks. Called again after a failed health
    /// check, once the previous handles were aborted.
    async fn start(&self, sink: mpsc::Sender<Trigger>) -> anyhow::Result<Vec<JoinHandle<()>>>;

    /// Whether the source delivers `NewBlock` triggers; the controller only
    /// watches such sources for a stalled block feed
    fn emits_blocks(&self) -> bool {
        false
    }
}

/// Hand `trigger` to the controller without waiting; false when it was dropped
fn forward(sink: &mpsc::Sender<Trigger>, trigger: Trigger) -> bool {
    match sink.try_send(trigger) {
        Ok(()) => true,
        Err(TrySendError::Full(trigger)) => {
            debug!("Trigger channel full, {} dropped", trigger);
            false
        }
        Err(TrySendError::Closed(trigger)) => {
            debug!("Trigger channel closed, {} dropped", trigger);
            false
        }
    }
}

/// Reserves of tracked pools against a cached baseline
pub struct DivergenceMonitor {
    market: Arc<dyn MarketView>,
    pairs: Vec<AssetPair>,
    threshold: Decimal,
    baselines: Mutex<HashMap<String, PoolReserves>>,
}

impl DivergenceMonitor {
    pub fn new(market: Arc<dyn MarketView>, pairs: Vec<AssetPair>, threshold: Decimal) -> Self {
        Self {
            market,
            pairs,
            threshold,
            baselines: Mutex::new(HashMap::new()),
        }
    }

    /// One pool per unordered pair across all paths
    pub fn tracking_paths(market: Arc<dyn MarketView>, paths: &[AssetPath], threshold: Decimal) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut pairs = Vec::new();
        for path in paths {
            for (a, b) in path.hops() {
                let key = if a.address < b.address {
                    (a.address, b.address)
                } else {
                    (b.address, a.address)
                };
                if seen.insert(key) {
                    pairs.push(AssetPair::new(a.clone(), b.clone()));
                }
            }
        }
        Self::new(market, pairs, threshold)
    }

    pub fn tracked(&self) -> usize {
        self.pairs.len()
    }

    /// Pools that moved beyond the threshold since their baseline. A diverged pool
    /// gets the new snapshot as its baseline.
    pub async fn check(&self) -> anyhow::Result<Vec<(String, Decimal)>> {
        if self.pairs.is_empty() {
            return Ok(Vec::new());
        }
        let snapshots = self.market.pool_reserves(&self.pairs).await?;

        let mut moved = Vec::new();
        let mut baselines = self.baselines.lock();
        for snapshot in snapshots {
            let key = snapshot.pair.to_string();
            match baselines.get(&key) {
                Some(baseline) => {
                    let divergence = snapshot.divergence_from(baseline);
                    if divergence > self.threshold {
                        moved.push((key.clone(), divergence));
                        baselines.insert(key, snapshot);
                    }
                }
                None => {
                    baselines.insert(key, snapshot);
                }
            }
        }
        Ok(moved)
    }
}

/// Runs [`DivergenceMonitor::check`] every `period`
pub struct DivergencePoll {
    monitor: Arc<DivergenceMonitor>,
    period: Duration,
}

impl DivergencePoll {
    pub fn new(monitor: Arc<DivergenceMonitor>, period: Duration) -> Self {
        Self { monitor, period }
    }

    fn spawn(&self, sink: mpsc::Sender<Trigger>) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        let period = self.period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match monitor.check().await {
                    Ok(moved) => {
                        for (pool, divergence) in moved {
                            forward(&sink, Trigger::PoolDivergence { pool, divergence });
                        }
                    }
                    Err(e) => debug!("Divergence check failed: {}", e),
                }
                if sink.is_closed() {
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl TriggerSource for DivergencePoll {
    async fn start(&self, sink: mpsc::Sender<Trigger>) -> anyhow::Result<Vec<JoinHandle<()>>> {
        Ok(vec![self.spawn(sink)])
    }
}

/// Websocket subscriptions plus the divergence poll
pub struct ChainEventSource {
    ws_url: String,
    config: EventSourceConfig,
    large_tx_threshold_wei: U256,
    divergence: Option<DivergencePoll>,
}

impl ChainEventSource {
    pub fn new(ws_url: impl Into<String>, config: EventSourceConfig, divergence: Option<DivergencePoll>) -> Self {
        let large_tx_threshold_wei = to_units(config.large_tx_threshold_native, 18).unwrap_or(U256::MAX);
        Self {
            ws_url: ws_url.into(),
            config,
            large_tx_threshold_wei,
            divergence,
        }
    }
}

#[async_trait]
impl TriggerSource for ChainEventSource {
    async fn start(&self, sink: mpsc::Sender<Trigger>) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let provider = Arc::new(Provider::<Ws>::connect(self.ws_url.as_str()).await?);
        info!("📡 Connected to {}", self.ws_url);
        let mut handles = Vec::new();

        let blocks = provider.clone();
        let block_sink = sink.clone();
        handles.push(tokio::spawn(async move {
            let mut stream = match blocks.subscribe_blocks().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Block subscription failed: {}", e);
                    return;
                }
            };
            while let Some(block) = stream.next().await {
                if let Some(number) = block.number {
                    forward(&block_sink, Trigger::NewBlock(number.as_u64()));
                }
            }
            warn!("Block subscription ended");
        }));

        if self.config.subscribe_pending {
            let pending = provider.clone();
            let pending_sink = sink.clone();
            let threshold = self.large_tx_threshold_wei;
            handles.push(tokio::spawn(async move {
                let mut stream = match pending.subscribe_full_pending_txs().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Pending transaction subscription unavailable: {}", e);
                        return;
                    }
                };
                while let Some(tx) = stream.next().await {
                    if tx.value > threshold {
                        let trigger = Trigger::LargePendingTx {
                            hash: tx.hash,
                            value_wei: tx.value,
                        };
                        forward(&pending_sink, trigger);
                    }
                }
                warn!("Pending transaction subscription ended");
            }));
        }

        if let Some(poll) = &self.divergence {
            handles.push(poll.spawn(sink));
        }

        Ok(handles)
    }

    fn emits_blocks(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketError;
    use std::time::Instant;
    use types::{Address, Asset};

    struct ShiftingMarket {
        reserve_b: Mutex<Decimal>,
    }

    #[async_trait]
    impl MarketView for ShiftingMarket {
        async fn usd_price(&self, _asset: &Asset) -> Result<Decimal, MarketError> {
            Ok(Decimal::ONE)
        }

        async fn simulate_cycle(&self, _path: &AssetPath, amount_in: Decimal) -> Result<Decimal, MarketError> {
            Ok(amount_in)
        }

        async fn pool_reserves(&self, pairs: &[AssetPair]) -> Result<Vec<PoolReserves>, MarketError> {
            let b = *self.reserve_b.lock();
            Ok(pairs
                .iter()
                .map(|p| PoolReserves::new(p.clone(), dec!(1000), b, Instant::now()))
                .collect())
        }
    }

    fn pair() -> AssetPair {
        AssetPair::new(
            Asset::new("WBNB", Address::repeat_byte(1), 18),
            Asset::stablecoin("USDT", Address::repeat_byte(2), 18),
        )
    }

    #[tokio::test]
    async fn test_divergence_fires_once_per_move() {
        let market = Arc::new(ShiftingMarket {
            reserve_b: Mutex::new(dec!(600000)),
        });
        let monitor = DivergenceMonitor::new(market.clone(), vec![pair()], dec!(0.005));

        // First pass only records baselines
        assert!(monitor.check().await.unwrap().is_empty());

        *market.reserve_b.lock() = dec!(601000);
        assert!(monitor.check().await.unwrap().is_empty());

        *market.reserve_b.lock() = dec!(606000);
        let moved = monitor.check().await.unwrap();
        assert_eq!(moved, vec![("WBNB/USDT".to_string(), dec!(0.01))]);

        // Baseline moved with it
        assert!(monitor.check().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_divergence_poll_runs_without_websocket() {
        let market = Arc::new(ShiftingMarket {
            reserve_b: Mutex::new(dec!(600000)),
        });
        let monitor = Arc::new(DivergenceMonitor::new(market.clone(), vec![pair()], dec!(0.005)));
        let poll = DivergencePoll::new(monitor, Duration::from_secs(15));
        assert!(!poll.emits_blocks());

        let (sink, mut triggers) = mpsc::channel(4);
        let handles = poll.start(sink).await.unwrap();
        assert_eq!(handles.len(), 1);

        // First tick records the baseline
        tokio::time::sleep(Duration::from_secs(1)).await;
        *market.reserve_b.lock() = dec!(606000);
        tokio::time::sleep(Duration::from_secs(15)).await;

        let trigger = triggers.try_recv().unwrap();
        assert_eq!(trigger.kind(), "pool_divergence");
        assert!(triggers.try_recv().is_err());

        drop(triggers);
        tokio::time::sleep(Duration::from_secs(15)).await;
        for handle in handles {
            assert!(handle.is_finished());
        }
    }

    #[tokio::test]
    async fn test_full_channel_drops_trigger() {
        let (sink, mut triggers) = mpsc::channel(1);
        assert!(forward(&sink, Trigger::NewBlock(1)));
        assert!(!forward(&sink, Trigger::NewBlock(2)));
        assert_eq!(triggers.recv().await, Some(Trigger::NewBlock(1)));

        drop(triggers);
        assert!(!forward(&sink, Trigger::NewBlock(3)));
    }

    #[test]
    fn test_trigger_blocks() {
        assert_eq!(Trigger::NewBlock(7).block(), Some(7));
        assert_eq!(Trigger::IdleTimeout.block(), None);
        assert_eq!(Trigger::IdleTimeout.kind(), "idle_timeout");
    }
}
