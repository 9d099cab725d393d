//! # Price Oracles - USD Quotes With Freshness And Agreement Checks
//!
//! ## Purpose
//!
//! Supplies `get_quote(pair)` to the market view. A quote carries its observation
//! instant, a `recommended` flag and a confidence; callers discard quotes past their
//! TTL and refuse quotes that are not recommended.
//!
//! - [`RouterPriceOracle`]: on-chain `getAmountsOut(1 unit, [base, quote])`;
//!   stable/stable pairs quote at the peg without a call
//! - [`MedianQuoteAggregator`]: median of several sources; a source more than the
//!   configured deviation away from the median marks the quote as manipulated
//! - [`CachedOracle`]: per-instance TTL cache in front of any oracle

use crate::market::{from_units, read_call, to_units, DexAbi, MarketError};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use network::{ChainClient, RpcError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use types::{Address, AssetPair, PriceQuote, DEFAULT_QUOTE_TTL};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{source_name} has no quote for {pair}: {reason}")]
    Unavailable {
        source_name: String,
        pair: String,
        reason: String,
    },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("no source returned a quote for {0}")]
    NoSources(String),
}

impl OracleError {
    fn unavailable(source_name: &str, pair: &AssetPair, reason: impl ToString) -> Self {
        OracleError::Unavailable {
            source_name: source_name.to_string(),
            pair: pair.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub quote_ttl_secs: u64,
    /// A source further than this fraction from the median marks manipulation
    pub max_source_deviation: Decimal,
    /// Aggregated quotes below this confidence are not recommended
    pub min_confidence: Decimal,
    /// Routers of other exchanges quoted alongside the trading router
    pub extra_routers: Vec<Address>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: DEFAULT_QUOTE_TTL.as_secs(),
            max_source_deviation: dec!(0.05),
            min_confidence: dec!(0.70),
            extra_routers: Vec::new(),
        }
    }
}

impl OracleConfig {
    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_ttl_secs)
    }
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    fn name(&self) -> &str;

    /// Price of `pair.base` in `pair.quote`
    async fn get_quote(&self, pair: &AssetPair) -> Result<PriceQuote, OracleError>;
}

/// Fresh quotes keyed by (base, quote) address
#[derive(Debug)]
pub struct QuoteCache {
    entries: DashMap<(Address, Address), PriceQuote>,
    ttl: Duration,
}

impl QuoteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, pair: &AssetPair, now: Instant) -> Option<PriceQuote> {
        let key = (pair.base.address, pair.quote.address);
        let quote = self.entries.get(&key)?.clone();
        if quote.is_fresh(self.ttl, now) {
            Some(quote)
        } else {
            self.entries.remove(&key);
            None
        }
    }

    pub fn insert(&self, quote: PriceQuote) {
        self.entries
            .insert((quote.pair.base.address, quote.pair.quote.address), quote);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct CachedOracle<O> {
    inner: O,
    cache: QuoteCache,
}

impl<O: PriceOracle> CachedOracle<O> {
    pub fn new(inner: O, ttl: Duration) -> Self {
        Self {
            inner,
            cache: QuoteCache::new(ttl),
        }
    }
}

#[async_trait]
impl<O: PriceOracle> PriceOracle for CachedOracle<O> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_quote(&self, pair: &AssetPair) -> Result<PriceQuote, OracleError> {
        if let Some(hit) = self.cache.get(pair, Instant::now()) {
            return Ok(hit);
        }
        let quote = self.inner.get_quote(pair).await?;
        self.cache.insert(quote.clone());
        Ok(quote)
    }
}

/// Median of several sources with a manipulation check
pub struct MedianQuoteAggregator {
    sources: Vec<Arc<dyn PriceOracle>>,
    max_deviation: Decimal,
    min_confidence: Decimal,
}

impl MedianQuoteAggregator {
    pub fn new(sources: Vec<Arc<dyn PriceOracle>>, config: &OracleConfig) -> Self {
        Self {
            sources,
            max_deviation: config.max_source_deviation,
            min_confidence: config.min_confidence,
        }
    }
}

fn median(sorted: &[Decimal]) -> Decimal {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / dec!(2)
    } else {
        sorted[mid]
    }
}

#[async_trait]
impl PriceOracle for MedianQuoteAggregator {
    fn name(&self) -> &str {
        "median"
    }

    async fn get_quote(&self, pair: &AssetPair) -> Result<PriceQuote, OracleError> {
        let results = join_all(self.sources.iter().map(|s| s.get_quote(pair))).await;

        let mut quotes = Vec::with_capacity(results.len());
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(q) if q.price > Decimal::ZERO => quotes.push(q),
                Ok(q) => debug!("{} returned non-positive price {} for {}", source.name(), q.price, pair),
                Err(e) => debug!("{} failed for {}: {}", source.name(), pair, e),
            }
        }
        if quotes.is_empty() {
            return Err(OracleError::NoSources(pair.to_string()));
        }

        let mut prices: Vec<Decimal> = quotes.iter().map(|q| q.price).collect();
        prices.sort();
        let mid = median(&prices);

        let max_dev = prices
            .iter()
            .map(|p| ((*p - mid) / mid).abs())
            .max()
            .unwrap_or(Decimal::ZERO);
        let manipulated = max_dev > self.max_deviation;
        let confidence = (Decimal::ONE - max_dev).max(Decimal::ZERO);
        if manipulated {
            warn!(
                "Sources disagree on {}: max deviation {:.4} from median {}",
                pair, max_dev, mid
            );
        }

        // Age of the aggregate is the age of its oldest input
        let observed_at = quotes
            .iter()
            .map(|q| q.observed_at)
            .min()
            .unwrap_or_else(Instant::now);

        let mut quote = PriceQuote::new(pair.clone(), mid, format!("median({})", quotes.len()), observed_at);
        quote.confidence = confidence;
        quote.recommended = !manipulated && confidence >= self.min_confidence;
        Ok(quote)
    }
}

/// Quotes from the exchange router's own pricing
pub struct RouterPriceOracle {
    name: String,
    chain: Arc<dyn ChainClient>,
    router: Address,
    abi: DexAbi,
}

impl RouterPriceOracle {
    pub fn new(name: impl Into<String>, chain: Arc<dyn ChainClient>, router: Address) -> Result<Self, MarketError> {
        Ok(Self {
            name: name.into(),
            chain,
            router,
            abi: DexAbi::new()?,
        })
    }
}

#[async_trait]
impl PriceOracle for RouterPriceOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_quote(&self, pair: &AssetPair) -> Result<PriceQuote, OracleError> {
        if pair.base.stable && pair.quote.stable {
            return Ok(PriceQuote::new(pair.clone(), Decimal::ONE, "peg", Instant::now()));
        }

        let one = to_units(Decimal::ONE, pair.base.decimals)
            .ok_or_else(|| OracleError::unavailable(&self.name, pair, "unsupported decimals"))?;
        let data = self
            .abi
            .encode_amounts_out(one, vec![pair.base.address, pair.quote.address])
            .map_err(|e| OracleError::unavailable(&self.name, pair, e))?;

        let raw = self.chain.call(&read_call(self.router, data), None).await?;
        let out = self
            .abi
            .decode_amount_out(&raw)
            .map_err(|e| OracleError::unavailable(&self.name, pair, e))?;
        let price = from_units(out, pair.quote.decimals)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| OracleError::unavailable(&self.name, pair, format!("bad amount {out}")))?;

        Ok(PriceQuote::new(pair.clone(), price, self.name.clone(), Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use types::Asset;

    struct FixedOracle {
        name: String,
        price: Decimal,
        calls: AtomicU32,
    }

    impl FixedOracle {
        fn new(name: &str, price: Decimal) -> Self {
            Self {
                name: name.into(),
                price,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PriceOracle for FixedOracle {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_quote(&self, pair: &AssetPair) -> Result<PriceQuote, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PriceQuote::new(pair.clone(), self.price, self.name.clone(), Instant::now()))
        }
    }

    fn pair() -> AssetPair {
        AssetPair::new(
            Asset::new("WBNB", Address::repeat_byte(1), 18),
            Asset::stablecoin("USDT", Address::repeat_byte(2), 18),
        )
    }

    fn aggregator(prices: &[Decimal]) -> MedianQuoteAggregator {
        let sources = prices
            .iter()
            .enumerate()
            .map(|(i, p)| Arc::new(FixedOracle::new(&format!("s{i}"), *p)) as Arc<dyn PriceOracle>)
            .collect();
        MedianQuoteAggregator::new(sources, &OracleConfig::default())
    }

    #[tokio::test]
    async fn test_agreeing_sources_are_recommended() {
        let quote = aggregator(&[dec!(600), dec!(601), dec!(599)])
            .get_quote(&pair())
            .await
            .unwrap();

        assert_eq!(quote.price, dec!(600));
        assert!(quote.recommended);
        assert!(quote.confidence > dec!(0.99));
    }

    #[tokio::test]
    async fn test_outlier_marks_manipulation() {
        let quote = aggregator(&[dec!(600), dec!(600), dec!(660)])
            .get_quote(&pair())
            .await
            .unwrap();

        assert_eq!(quote.price, dec!(600));
        assert!(!quote.recommended);
        assert_eq!(quote.confidence, dec!(0.9));
    }

    #[tokio::test]
    async fn test_even_source_count_averages_middle() {
        let quote = aggregator(&[dec!(100), dec!(102)]).get_quote(&pair()).await.unwrap();
        assert_eq!(quote.price, dec!(101));
    }

    #[tokio::test]
    async fn test_cache_serves_fresh_quotes() {
        let cached = CachedOracle::new(FixedOracle::new("fixed", dec!(600)), Duration::from_secs(30));

        cached.get_quote(&pair()).await.unwrap();
        cached.get_quote(&pair()).await.unwrap();

        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cache.len(), 1);
    }
}
