//! # Gas Cost Estimation - USD Cost Of One Arbitrage Attempt
//!
//! ## Purpose
//!
//! Prices an attempt before it is sized: gas units from a fixed model (lender
//! overhead plus a per-hop swap cost), gas price from the chain's fee data, and USD
//! via the native asset's quote. Candidates are refused outright while the network
//! price sits above the configured cap.
//!
//! ## Performance Profile
//!
//! - **Cache Duration**: fee data cached for `fee_cache_secs` (default 12s, a few blocks)
//! - **RPC Calls**: at most one `eth_gasPrice` per cache period; the native quote is
//!   served from the oracle cache

use crate::logging::LogEmoji;
use crate::market::MarketView;
use async_trait::async_trait;
use network::{ChainClient, RpcError};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use types::{Asset, AssetPath, FlashloanProvider, LenderKind, U256};

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Gas unit model for one cyclic arbitrage transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasModelConfig {
    /// Borrow + repay through a lending pool
    pub loan_overhead_units: u64,
    /// Borrow + repay through a pair flash swap
    pub swap_overhead_units: u64,
    pub per_hop_units: u64,
    pub fee_cache_secs: u64,
}

impl Default for GasModelConfig {
    fn default() -> Self {
        Self {
            loan_overhead_units: 180_000,
            swap_overhead_units: 90_000,
            per_hop_units: 110_000,
            fee_cache_secs: 12,
        }
    }
}

impl GasModelConfig {
    pub fn units_for(&self, path: &AssetPath, lender: &FlashloanProvider) -> u64 {
        let overhead = match lender.kind {
            LenderKind::Loan => self.loan_overhead_units,
            LenderKind::Swap => self.swap_overhead_units,
        };
        overhead + self.per_hop_units * path.hop_count() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GasEstimate {
    pub units: u64,
    pub gas_price_wei: U256,
    pub cost_usd: Decimal,
}

#[derive(Debug, Error)]
pub enum GasError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("gas price {price_gwei} gwei above cap {cap_gwei} gwei")]
    AboveCap { price_gwei: u64, cap_gwei: u64 },

    #[error("native asset price unavailable: {0}")]
    NativePrice(String),
}

#[async_trait]
pub trait GasEstimator: Send + Sync {
    async fn estimate(&self, path: &AssetPath, lender: &FlashloanProvider) -> Result<GasEstimate, GasError>;
}

/// Gas price from fee data, cached briefly
pub struct FeeDataGasEstimator {
    chain: Arc<dyn ChainClient>,
    market: Arc<dyn MarketView>,
    native: Asset,
    model: GasModelConfig,
    max_gas_price_gwei: u64,
    cache: RwLock<Option<(U256, Instant)>>,
}

impl FeeDataGasEstimator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        market: Arc<dyn MarketView>,
        native: Asset,
        model: GasModelConfig,
        max_gas_price_gwei: u64,
    ) -> Self {
        Self {
            chain,
            market,
            native,
            model,
            max_gas_price_gwei,
            cache: RwLock::new(None),
        }
    }

    async fn gas_price_wei(&self) -> Result<U256, GasError> {
        let ttl = Duration::from_secs(self.model.fee_cache_secs);
        let cached = *self.cache.read();
        if let Some((price, fetched_at)) = cached {
            if fetched_at.elapsed() < ttl {
                return Ok(price);
            }
        }

        let price = self.chain.fee_data().await?.effective_gas_price();
        debug!("{} Gas price refreshed: {} gwei", LogEmoji::GAS, price / U256::from(WEI_PER_GWEI));
        *self.cache.write() = Some((price, Instant::now()));
        Ok(price)
    }
}

/// `units × price` in native units, then USD
pub fn gas_cost_usd(units: u64, gas_price_wei: U256, native_usd: Decimal) -> Option<Decimal> {
    let gwei = gas_price_wei / U256::from(WEI_PER_GWEI);
    let remainder = gas_price_wei % U256::from(WEI_PER_GWEI);
    if gwei > U256::from(u64::MAX) {
        return None;
    }
    // Keep sub-gwei precision without leaving Decimal's range
    let price_gwei = Decimal::from(gwei.as_u64()) + Decimal::from(remainder.as_u64()) / Decimal::from(WEI_PER_GWEI);
    let native = Decimal::from(units) * price_gwei / Decimal::from(WEI_PER_GWEI);
    Some(native * native_usd)
}

#[async_trait]
impl GasEstimator for FeeDataGasEstimator {
    async fn estimate(&self, path: &AssetPath, lender: &FlashloanProvider) -> Result<GasEstimate, GasError> {
        let gas_price_wei = self.gas_price_wei().await?;
        let cap = U256::from(self.max_gas_price_gwei) * U256::from(WEI_PER_GWEI);
        if gas_price_wei > cap {
            return Err(GasError::AboveCap {
                price_gwei: (gas_price_wei / U256::from(WEI_PER_GWEI)).low_u64(),
                cap_gwei: self.max_gas_price_gwei,
            });
        }

        let native_usd = self
            .market
            .usd_price(&self.native)
            .await
            .map_err(|e| GasError::NativePrice(e.to_string()))?;
        let units = self.model.units_for(path, lender);
        let cost_usd = gas_cost_usd(units, gas_price_wei, native_usd)
            .ok_or_else(|| GasError::NativePrice(format!("gas price {gas_price_wei} out of range")))?;

        Ok(GasEstimate {
            units,
            gas_price_wei,
            cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::{Address, FeeRate};

    fn path() -> AssetPath {
        AssetPath::new(vec![
            Asset::new("A", Address::repeat_byte(1), 18),
            Asset::new("B", Address::repeat_byte(2), 18),
            Asset::new("C", Address::repeat_byte(3), 18),
        ])
        .unwrap()
    }

    fn lender(kind: LenderKind) -> FlashloanProvider {
        FlashloanProvider {
            name: "l".into(),
            kind,
            address: Address::repeat_byte(9),
            fee: FeeRate::ZERO,
            fallback_fee: FeeRate::ZERO,
            max_loan_usd: Default::default(),
        }
    }

    #[test]
    fn test_units_depend_on_lender_kind() {
        let model = GasModelConfig::default();
        assert_eq!(model.units_for(&path(), &lender(LenderKind::Loan)), 180_000 + 3 * 110_000);
        assert_eq!(model.units_for(&path(), &lender(LenderKind::Swap)), 90_000 + 3 * 110_000);
    }

    #[test]
    fn test_usd_cost() {
        // 500k gas at 1 gwei = 0.0005 native; at $600 = $0.30
        let cost = gas_cost_usd(500_000, U256::from(WEI_PER_GWEI), dec!(600)).unwrap();
        assert_eq!(cost, dec!(0.30));

        let fractional = gas_cost_usd(1_000_000, U256::from(1_500_000_000u64), dec!(100)).unwrap();
        assert_eq!(fractional, dec!(0.15));
    }
}
