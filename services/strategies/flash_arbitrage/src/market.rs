//! # Market View - Read-Only Exchange State
//!
//! ## Purpose
//!
//! Everything the sizing engine needs to know about the exchange: USD prices, the
//! output of a full cycle at a given size, and the reserves of every pool on a path.
//! [`OnChainMarket`] answers these from the router, factory and pair contracts of a
//! single constant-product exchange; tests substitute a fixed market.
//!
//! ## Architecture Role
//!
//! ```text
//! Router.getAmountsOut ──→ simulate_cycle ──┐
//! Factory.getPair (cached) ┐                ├──→ Sizing Engine
//! Pair.getReserves (batch) ┴→ pool_reserves ┤
//! Price Oracle ──────────────→ usd_price ───┘
//! ```

use crate::oracle::PriceOracle;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::abi::{parse_abi, AbiError};
use ethers::contract::BaseContract;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::TransactionRequest;
use network::{ChainClient, RpcError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use types::{Address, Asset, AssetPair, AssetPath, Bytes, PoolReserves, U256};

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("abi error: {0}")]
    Abi(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("no pool for {0}")]
    NoPool(String),

    #[error("price unavailable for {symbol}: {reason}")]
    Price { symbol: String, reason: String },

    #[error("amount {0} does not fit token units")]
    Units(String),
}

impl From<AbiError> for MarketError {
    fn from(e: AbiError) -> Self {
        MarketError::Abi(e.to_string())
    }
}

/// Read-only view of one exchange
#[async_trait]
pub trait MarketView: Send + Sync {
    /// USD value of one whole unit of `asset`
    async fn usd_price(&self, asset: &Asset) -> Result<Decimal, MarketError>;

    /// Base-asset amount returned after trading `amount_in` around the full cycle
    async fn simulate_cycle(&self, path: &AssetPath, amount_in: Decimal) -> Result<Decimal, MarketError>;

    /// Reserves of each pool, oriented base → quote
    async fn pool_reserves(&self, pairs: &[AssetPair]) -> Result<Vec<PoolReserves>, MarketError>;

    /// Reserves of every hop on `path`, closing hop included
    async fn path_reserves(&self, path: &AssetPath) -> Result<Vec<PoolReserves>, MarketError> {
        let pairs: Vec<AssetPair> = path
            .hops()
            .map(|(a, b)| AssetPair::new(a.clone(), b.clone()))
            .collect();
        self.pool_reserves(&pairs).await
    }
}

/// `amount × 10^decimals`, truncated
pub fn to_units(amount: Decimal, decimals: u8) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let scale = Decimal::try_from_i128_with_scale(10i128.checked_pow(decimals as u32)?, 0).ok()?;
    let raw = amount.checked_mul(scale)?.trunc().to_u128()?;
    Some(U256::from(raw))
}

/// `value / 10^decimals`, dropping low digits when the mantissa does not fit
pub fn from_units(value: U256, decimals: u8) -> Option<Decimal> {
    if value > U256::from(i128::MAX as u128) {
        return None;
    }
    let mut mantissa = value.as_u128() as i128;
    let mut scale = decimals as u32;
    loop {
        if let Ok(d) = Decimal::try_from_i128_with_scale(mantissa, scale) {
            return Some(d);
        }
        if scale == 0 {
            return None;
        }
        mantissa /= 10;
        scale -= 1;
    }
}

/// Router, factory and pair ABIs of a V2-style exchange
#[derive(Debug, Clone)]
pub(crate) struct DexAbi {
    router: BaseContract,
    factory: BaseContract,
    pair: BaseContract,
}

impl DexAbi {
    pub(crate) fn new() -> Result<Self, MarketError> {
        let parse = |sigs: &[&str]| {
            parse_abi(sigs)
                .map(BaseContract::from)
                .map_err(|e| MarketError::Abi(e.to_string()))
        };
        Ok(Self {
            router: parse(&[
                "function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts)",
            ])?,
            factory: parse(&[
                "function getPair(address tokenA, address tokenB) external view returns (address pair)",
            ])?,
            pair: parse(&[
                "function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast)",
            ])?,
        })
    }

    pub(crate) fn encode_amounts_out(&self, amount_in: U256, path: Vec<Address>) -> Result<Bytes, MarketError> {
        Ok(self.router.encode("getAmountsOut", (amount_in, path))?)
    }

    /// Final amount of a `getAmountsOut` response
    pub(crate) fn decode_amount_out(&self, data: &Bytes) -> Result<U256, MarketError> {
        let amounts: Vec<U256> = self.router.decode_output("getAmountsOut", data)?;
        amounts
            .last()
            .copied()
            .ok_or_else(|| MarketError::Abi("empty getAmountsOut result".into()))
    }

    fn encode_get_pair(&self, a: Address, b: Address) -> Result<Bytes, MarketError> {
        Ok(self.factory.encode("getPair", (a, b))?)
    }

    fn decode_get_pair(&self, data: &Bytes) -> Result<Address, MarketError> {
        Ok(self.factory.decode_output("getPair", data)?)
    }

    fn encode_get_reserves(&self) -> Result<Bytes, MarketError> {
        Ok(self.pair.encode("getReserves", ())?)
    }

    fn decode_reserves(&self, data: &Bytes) -> Result<(U256, U256), MarketError> {
        let (r0, r1, _ts): (U256, U256, U256) = self.pair.decode_output("getReserves", data)?;
        Ok((r0, r1))
    }
}

pub(crate) fn read_call(to: Address, data: Bytes) -> TypedTransaction {
    TransactionRequest::new().to(to).data(data).into()
}

/// Market view over a single V2-style exchange
pub struct OnChainMarket {
    chain: Arc<dyn ChainClient>,
    router: Address,
    factory: Address,
    usd: Asset,
    oracle: Arc<dyn PriceOracle>,
    quote_ttl: Duration,
    abi: DexAbi,
    pairs: DashMap<(Address, Address), Address>,
}

impl OnChainMarket {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        router: Address,
        factory: Address,
        usd: Asset,
        oracle: Arc<dyn PriceOracle>,
        quote_ttl: Duration,
    ) -> Result<Self, MarketError> {
        Ok(Self {
            chain,
            router,
            factory,
            usd,
            oracle,
            quote_ttl,
            abi: DexAbi::new()?,
            pairs: DashMap::new(),
        })
    }

    async fn pair_address(&self, a: &Asset, b: &Asset) -> Result<Address, MarketError> {
        let key = sorted(a.address, b.address);
        if let Some(pair) = self.pairs.get(&key) {
            return Ok(*pair);
        }

        let data = self.abi.encode_get_pair(key.0, key.1)?;
        let raw = self.chain.call(&read_call(self.factory, data), None).await?;
        let pair = self.abi.decode_get_pair(&raw)?;
        if pair.is_zero() {
            return Err(MarketError::NoPool(format!("{}/{}", a, b)));
        }
        debug!("Resolved pair {}/{} → {:?}", a, b, pair);
        self.pairs.insert(key, pair);
        Ok(pair)
    }
}

fn sorted(a: Address, b: Address) -> (Address, Address) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[async_trait]
impl MarketView for OnChainMarket {
    async fn usd_price(&self, asset: &Asset) -> Result<Decimal, MarketError> {
        if asset.stable || asset.address == self.usd.address {
            return Ok(Decimal::ONE);
        }

        let pair = AssetPair::new(asset.clone(), self.usd.clone());
        let quote = self
            .oracle
            .get_quote(&pair)
            .await
            .map_err(|e| MarketError::Price {
                symbol: asset.symbol.clone(),
                reason: e.to_string(),
            })?;

        let price_error = |reason: &str| MarketError::Price {
            symbol: asset.symbol.clone(),
            reason: reason.to_string(),
        };
        if !quote.recommended {
            return Err(price_error("quote not recommended"));
        }
        let quote = quote
            .fresh(self.quote_ttl, Instant::now())
            .ok_or_else(|| price_error("quote is stale"))?;
        Ok(quote.price)
    }

    async fn simulate_cycle(&self, path: &AssetPath, amount_in: Decimal) -> Result<Decimal, MarketError> {
        let base = path.base();
        let units = to_units(amount_in, base.decimals).ok_or_else(|| MarketError::Units(amount_in.to_string()))?;

        let data = self.abi.encode_amounts_out(units, path.route_addresses())?;
        let raw = self.chain.call(&read_call(self.router, data), None).await?;
        let out = self.abi.decode_amount_out(&raw)?;
        from_units(out, base.decimals).ok_or_else(|| MarketError::Units(out.to_string()))
    }

    async fn pool_reserves(&self, pairs: &[AssetPair]) -> Result<Vec<PoolReserves>, MarketError> {
        let mut addresses = Vec::with_capacity(pairs.len());
        for pair in pairs {
            addresses.push(self.pair_address(&pair.base, &pair.quote).await?);
        }

        let call = self.abi.encode_get_reserves()?;
        let requests = addresses.iter().map(|a| read_call(*a, call.clone())).collect();
        let responses = self.chain.batch_call(requests).await;

        let observed_at = Instant::now();
        let mut out = Vec::with_capacity(pairs.len());
        for (pair, response) in pairs.iter().zip(responses) {
            let (r0, r1) = self.abi.decode_reserves(&response?)?;
            // token0 is the lower address
            let (raw_base, raw_quote) = if pair.base.address < pair.quote.address {
                (r0, r1)
            } else {
                (r1, r0)
            };
            let reserve_a = from_units(raw_base, pair.base.decimals)
                .ok_or_else(|| MarketError::Units(raw_base.to_string()))?;
            let reserve_b = from_units(raw_quote, pair.quote.decimals)
                .ok_or_else(|| MarketError::Units(raw_quote.to_string()))?;
            out.push(PoolReserves::new(pair.clone(), reserve_a, reserve_b, observed_at));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(to_units(dec!(1.5), 18), Some(U256::from(1_500_000_000_000_000_000u128)));
        assert_eq!(to_units(dec!(2.0000009), 6), Some(U256::from(2_000_000u64)));
        assert_eq!(to_units(dec!(-1), 18), None);

        assert_eq!(from_units(U256::from(1_500_000u64), 6), Some(dec!(1.5)));
    }

    #[test]
    fn test_large_reserves_lose_low_digits() {
        // 10^12 tokens at 18 decimals
        let raw = U256::exp10(30);
        assert_eq!(from_units(raw, 18), Some(dec!(1000000000000)));
    }

    #[test]
    fn test_abi_round_trips_pair_lookup() {
        let abi = DexAbi::new().unwrap();
        let data = abi.encode_get_pair(Address::repeat_byte(1), Address::repeat_byte(2)).unwrap();
        assert_eq!(data.len(), 4 + 64);
    }
}
