//! Flash-loan lender catalog
//!
//! Static lender definitions from config, with fees refreshed from chain where a
//! lender exposes them. A refresh failure falls back to the lender's conservative
//! fallback fee, never to the last optimistic value.

use crate::market::read_call;
use async_trait::async_trait;
use ethers::abi::parse_abi;
use ethers::contract::BaseContract;
use network::{ChainClient, RpcError};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use types::{Asset, FeeRate, FlashloanProvider, U256};

/// Live fee cache lifetime
pub const FEE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum FeeSourceError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("abi error: {0}")]
    Abi(String),

    #[error("fee {0} out of range")]
    OutOfRange(U256),
}

/// Reads a lender's current fee from chain
#[async_trait]
pub trait FeeSource: Send + Sync {
    async fn fetch_fee(&self, provider: &FlashloanProvider) -> Result<FeeRate, FeeSourceError>;
}

/// Aave-style pools: `FLASHLOAN_PREMIUM_TOTAL()` in basis points
pub struct AavePremiumSource {
    chain: Arc<dyn ChainClient>,
    pool: BaseContract,
}

impl AavePremiumSource {
    pub fn new(chain: Arc<dyn ChainClient>) -> Result<Self, FeeSourceError> {
        let abi = parse_abi(&["function FLASHLOAN_PREMIUM_TOTAL() external view returns (uint128)"])
            .map_err(|e| FeeSourceError::Abi(e.to_string()))?;
        Ok(Self {
            chain,
            pool: BaseContract::from(abi),
        })
    }
}

#[async_trait]
impl FeeSource for AavePremiumSource {
    async fn fetch_fee(&self, provider: &FlashloanProvider) -> Result<FeeRate, FeeSourceError> {
        let data = self
            .pool
            .encode("FLASHLOAN_PREMIUM_TOTAL", ())
            .map_err(|e| FeeSourceError::Abi(e.to_string()))?;
        let raw = self.chain.call(&read_call(provider.address, data), None).await?;
        let premium: U256 = self
            .pool
            .decode_output("FLASHLOAN_PREMIUM_TOTAL", raw)
            .map_err(|e| FeeSourceError::Abi(e.to_string()))?;

        if premium > U256::from(10_000u64) {
            return Err(FeeSourceError::OutOfRange(premium));
        }
        Ok(FeeRate::from_bps(premium.as_u64()))
    }
}

/// Configured lenders plus their live-fee cache
pub struct LenderCatalog {
    providers: Vec<FlashloanProvider>,
    live: HashSet<String>,
    source: Option<Arc<dyn FeeSource>>,
    ttl: Duration,
    cache: RwLock<HashMap<String, (FeeRate, Instant)>>,
}

impl LenderCatalog {
    /// Catalog that always uses the configured fees
    pub fn fixed(providers: Vec<FlashloanProvider>) -> Self {
        Self {
            providers,
            live: HashSet::new(),
            source: None,
            ttl: FEE_TTL,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Catalog refreshing the named lenders through `source`
    pub fn with_live_fees(
        providers: Vec<FlashloanProvider>,
        live: impl IntoIterator<Item = String>,
        source: Arc<dyn FeeSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            providers,
            live: live.into_iter().collect(),
            source: Some(source),
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &[FlashloanProvider] {
        &self.providers
    }

    /// Lenders willing to lend `asset`, in config order
    pub fn lenders_for<'a>(&'a self, asset: &'a Asset) -> impl Iterator<Item = &'a FlashloanProvider> + 'a {
        self.providers.iter().filter(move |p| p.supports(asset))
    }

    /// Fee to charge `provider` right now
    pub async fn effective_fee(&self, provider: &FlashloanProvider) -> FeeRate {
        let source = match &self.source {
            Some(source) if self.live.contains(&provider.name) => source,
            _ => return provider.fee,
        };

        let cached = self.cache.read().get(&provider.name).copied();
        if let Some((fee, fetched_at)) = cached {
            if fetched_at.elapsed() < self.ttl {
                return fee;
            }
        }

        match source.fetch_fee(provider).await {
            Ok(fee) => {
                debug!("{} live fee {}", provider.name, fee);
                self.cache
                    .write()
                    .insert(provider.name.clone(), (fee, Instant::now()));
                fee
            }
            Err(e) => {
                warn!(
                    "Fee refresh for {} failed ({}); using fallback {}",
                    provider.name, e, provider.fallback_fee
                );
                provider.fallback_fee
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use types::{Address, LenderKind};

    struct ScriptedFees {
        fee: Option<FeeRate>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FeeSource for ScriptedFees {
        async fn fetch_fee(&self, _provider: &FlashloanProvider) -> Result<FeeRate, FeeSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fee
                .ok_or_else(|| FeeSourceError::Rpc(RpcError::Transport("down".into())))
        }
    }

    fn provider() -> FlashloanProvider {
        FlashloanProvider {
            name: "aave".into(),
            kind: LenderKind::Loan,
            address: Address::repeat_byte(0xaa),
            fee: FeeRate::from_bps(5),
            fallback_fee: FeeRate::from_bps(9),
            max_loan_usd: [("WBNB".to_string(), dec!(100000))].into_iter().collect(),
        }
    }

    fn catalog(fee: Option<FeeRate>) -> (LenderCatalog, Arc<ScriptedFees>) {
        let source = Arc::new(ScriptedFees {
            fee,
            calls: AtomicU32::new(0),
        });
        let catalog = LenderCatalog::with_live_fees(vec![provider()], ["aave".to_string()], source.clone(), FEE_TTL);
        (catalog, source)
    }

    #[tokio::test]
    async fn test_live_fee_is_cached() {
        let (catalog, source) = catalog(Some(FeeRate::from_bps(4)));
        let p = provider();

        assert_eq!(catalog.effective_fee(&p).await, FeeRate::from_bps(4));
        assert_eq!(catalog.effective_fee(&p).await, FeeRate::from_bps(4));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_uses_fallback() {
        let (catalog, _) = catalog(None);
        assert_eq!(catalog.effective_fee(&provider()).await, FeeRate::from_bps(9));
    }

    #[tokio::test]
    async fn test_fixed_catalog_uses_configured_fee() {
        let catalog = LenderCatalog::fixed(vec![provider()]);
        assert_eq!(catalog.effective_fee(&provider()).await, FeeRate::from_bps(5));

        let wbnb = Asset::new("WBNB", Address::repeat_byte(1), 18);
        let busd = Asset::stablecoin("BUSD", Address::repeat_byte(2), 18);
        assert_eq!(catalog.lenders_for(&wbnb).count(), 1);
        assert_eq!(catalog.lenders_for(&busd).count(), 0);
    }
}
