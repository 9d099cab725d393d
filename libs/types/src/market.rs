//! Price quotes and pool reserve snapshots with freshness bounds

use crate::asset::AssetPair;
use rust_decimal::Decimal;
use std::time::{Duration, Instant};

/// Quotes older than this are treated as absent
pub const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(30);

/// Price of `pair.base` expressed in `pair.quote`
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub pair: AssetPair,
    pub price: Decimal,
    pub source: String,
    pub observed_at: Instant,
    /// False when the source (or the aggregate of sources) looks manipulated
    pub recommended: bool,
    /// 0..=1, 1 when every source agrees
    pub confidence: Decimal,
}

impl PriceQuote {
    pub fn new(pair: AssetPair, price: Decimal, source: impl Into<String>, observed_at: Instant) -> Self {
        Self {
            pair,
            price,
            source: source.into(),
            observed_at,
            recommended: true,
            confidence: Decimal::ONE,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.observed_at)
    }

    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        self.age(now) <= ttl
    }

    /// `Some(self)` only while fresh
    pub fn fresh(self, ttl: Duration, now: Instant) -> Option<Self> {
        self.is_fresh(ttl, now).then_some(self)
    }
}

/// Approximate reserves of one pool, in human token units
///
/// Used to bound price impact, never as an exact execution price.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolReserves {
    pub pair: AssetPair,
    pub reserve_a: Decimal,
    pub reserve_b: Decimal,
    pub observed_at: Instant,
}

impl PoolReserves {
    pub fn new(pair: AssetPair, reserve_a: Decimal, reserve_b: Decimal, observed_at: Instant) -> Self {
        Self {
            pair,
            reserve_a,
            reserve_b,
            observed_at,
        }
    }

    /// Reserve valued in USD, taking the thinner side
    pub fn min_side_usd(&self, price_a_usd: Decimal, price_b_usd: Decimal) -> Decimal {
        (self.reserve_a * price_a_usd).min(self.reserve_b * price_b_usd)
    }

    /// Relative move of either reserve against a baseline snapshot
    pub fn divergence_from(&self, baseline: &PoolReserves) -> Decimal {
        let change = |now: Decimal, then: Decimal| {
            if then.is_zero() {
                Decimal::ZERO
            } else {
                ((now - then) / then).abs()
            }
        };
        change(self.reserve_a, baseline.reserve_a).max(change(self.reserve_b, baseline.reserve_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use ethers_core::types::Address;
    use rust_decimal_macros::dec;

    fn pair() -> AssetPair {
        AssetPair::new(
            Asset::new("WBNB", Address::repeat_byte(1), 18),
            Asset::stablecoin("USDT", Address::repeat_byte(2), 18),
        )
    }

    #[test]
    fn test_stale_quote_is_absent() {
        let observed = Instant::now();
        let quote = PriceQuote::new(pair(), dec!(600), "router", observed);

        let later = observed + Duration::from_secs(31);
        assert!(quote.clone().fresh(DEFAULT_QUOTE_TTL, observed).is_some());
        assert!(quote.fresh(DEFAULT_QUOTE_TTL, later).is_none());
    }

    #[test]
    fn test_divergence_takes_larger_side() {
        let now = Instant::now();
        let baseline = PoolReserves::new(pair(), dec!(100), dec!(60000), now);
        let moved = PoolReserves::new(pair(), dec!(101), dec!(57000), now);
        assert_eq!(moved.divergence_from(&baseline), dec!(0.05));
    }
}
