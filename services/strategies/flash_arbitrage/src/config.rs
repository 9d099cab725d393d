//! # Flash Arbitrage Configuration - Layered Parameter Management
//!
//! ## Purpose
//!
//! Single configuration tree for the daemon: RPC endpoints, wallet and relay, the
//! exchange and arbitrage contract, the asset universe, flash-loan lenders, sizing
//! ladder, mode thresholds, controller timings and logging. No parameter is hardcoded
//! in the components themselves.
//!
//! ## Loading Order
//!
//! ```text
//! Defaults → TOML/JSON file → CYCLONE__SECTION__KEY env → CYCLONE_* shortcuts → validate()
//! ```
//!
//! Every section carries `#[serde(default)]`, so a file only lists what differs from
//! the BSC mainnet defaults below. Secrets are never read from the file: the wallet
//! key and the relay auth key come from the environment variables the file names.
//!
//! ## Validation
//!
//! [`FlashArbitrageConfig::validate`] rejects configurations that would make sizing
//! or budgeting meaningless (too few assets, unknown lender symbols, zero budget).
//! [`FlashArbitrageConfig::validate_submission`] additionally checks what live
//! submission needs and is skipped by scan-only runs.

use crate::controller::ControllerConfig;
use crate::events::EventSourceConfig;
use crate::gas::GasModelConfig;
use crate::mode::ModeSet;
use crate::oracle::OracleConfig;
use crate::planner::PlannerConfig;
use crate::sizing::SizingConfig;
use anyhow::{bail, Context};
use config_crate::{Config, Environment, File};
use mev::{ExecutorConfig, MevProtectionConfig};
use network::RpcConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use types::{Address, Asset, FeeRate, FlashloanProvider, LenderKind};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "CYCLONE";

fn address(hex: &str) -> Address {
    hex.parse().unwrap_or_else(|_| Address::zero())
}

/// Complete configuration for the flash arbitrage daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashArbitrageConfig {
    pub network: RpcConfig,
    pub relay: RelayConfig,
    pub wallet: WalletConfig,
    pub exchange: ExchangeConfig,
    /// Routable assets; paths are enumerated over all of them
    pub assets: Vec<Asset>,
    pub lenders: Vec<LenderConfig>,
    pub sizing: SizingConfig,
    pub modes: ModeSet,
    pub oracle: OracleConfig,
    pub controller: ControllerConfig,
    pub events: EventSourceConfig,
    pub executor: ExecutorConfig,
    pub protection: MevProtectionConfig,
    pub gas: GasModelConfig,
    pub planner: PlannerConfig,
    pub logging: LoggingConfig,
}

/// Private bundle relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub name: String,
    /// No relay configured means public submission only, if permitted
    pub url: Option<String>,
    /// Env var holding the key that signs relay requests
    pub auth_key_env: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Env var holding the executing wallet's private key
    pub private_key_env: String,
    pub chain_id: u64,
    /// Health checks fail below this native balance
    pub min_balance_native: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub router: Address,
    pub factory: Address,
    /// Deployed contract that borrows, swaps the cycle and repays
    pub arbitrage_contract: Address,
    /// Asset all USD prices are quoted against
    pub usd_symbol: String,
    /// Wrapped gas token, used to price gas in USD
    pub native_symbol: String,
}

/// Per-asset lending ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxLoan {
    pub symbol: String,
    pub usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LenderConfig {
    pub name: String,
    pub kind: LenderKind,
    #[serde(default)]
    pub address: Address,
    pub fee_bps: u64,
    /// Charged whenever the live fee cannot be read
    pub fallback_fee_bps: u64,
    pub max_loans: Vec<MaxLoan>,
    /// Read the premium from the lender contract instead of trusting `fee_bps`
    #[serde(default)]
    pub live_fee: bool,
}

impl LenderConfig {
    pub fn into_provider(&self) -> FlashloanProvider {
        FlashloanProvider {
            name: self.name.clone(),
            kind: self.kind,
            address: self.address,
            fee: FeeRate::from_bps(self.fee_bps),
            fallback_fee: FeeRate::from_bps(self.fallback_fee_bps),
            max_loan_usd: self
                .max_loans
                .iter()
                .map(|m| (m.symbol.clone(), m.usd))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is unset
    pub log_level: String,
    pub json: bool,
    /// Pipeline journal (JSON lines); `~` and `$VAR` are expanded
    pub journal_path: Option<String>,
}

impl Default for FlashArbitrageConfig {
    fn default() -> Self {
        Self {
            network: RpcConfig {
                read_url: "https://bsc-dataseed.bnbchain.org".to_string(),
                ..RpcConfig::default()
            },
            relay: RelayConfig::default(),
            wallet: WalletConfig::default(),
            exchange: ExchangeConfig::default(),
            assets: default_assets(),
            lenders: default_lenders(),
            sizing: SizingConfig::default(),
            modes: ModeSet::default(),
            oracle: OracleConfig::default(),
            controller: ControllerConfig::default(),
            events: EventSourceConfig::default(),
            executor: ExecutorConfig::default(),
            protection: MevProtectionConfig::default(),
            gas: GasModelConfig::default(),
            planner: PlannerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: "flashbots".to_string(),
            url: None,
            auth_key_env: "CYCLONE_RELAY_AUTH_KEY".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "CYCLONE_PRIVATE_KEY".to_string(),
            chain_id: 56, // BSC mainnet
            min_balance_native: dec!(0.05),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            // PancakeSwap v2
            router: address("0x10ED43C718714eb63d5aA57B78B54704E256024E"),
            factory: address("0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73"),
            arbitrage_contract: Address::zero(),
            usd_symbol: "USDT".to_string(),
            native_symbol: "WBNB".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            journal_path: None,
        }
    }
}

fn default_assets() -> Vec<Asset> {
    vec![
        Asset::new("WBNB", address("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"), 18),
        Asset::stablecoin("USDT", address("0x55d398326f99059fF775485246999027B3197955"), 18),
        Asset::stablecoin("BUSD", address("0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56"), 18),
        Asset::new("BTCB", address("0x7130d2A12B9BCbFAe4f2634d864A1Ee1Ce3Ead9c"), 18),
        Asset::new("ETH", address("0x2170Ed0880ac9A755fd29B2688956BD959F933F8"), 18),
        Asset::new("CAKE", address("0x0E09FaBB73Bd3Ade0a17ECC321fD13a19e81cE82"), 18),
    ]
}

fn default_lenders() -> Vec<LenderConfig> {
    let loans = |entries: &[(&str, Decimal)]| {
        entries
            .iter()
            .map(|(symbol, usd)| MaxLoan {
                symbol: symbol.to_string(),
                usd: *usd,
            })
            .collect::<Vec<_>>()
    };

    vec![
        LenderConfig {
            name: "aave-v3".to_string(),
            kind: LenderKind::Loan,
            address: address("0x6807dc923806fE8Fd134338EABCA509979a7e0cB"),
            fee_bps: 5,
            fallback_fee_bps: 9,
            max_loans: loans(&[
                ("WBNB", dec!(10000)),
                ("USDT", dec!(10000)),
                ("BTCB", dec!(10000)),
                ("ETH", dec!(10000)),
            ]),
            live_fee: true,
        },
        LenderConfig {
            name: "pancake-flash-swap".to_string(),
            kind: LenderKind::Swap,
            address: Address::zero(),
            fee_bps: 25,
            fallback_fee_bps: 25,
            max_loans: loans(&[("WBNB", dec!(5000)), ("BUSD", dec!(5000)), ("CAKE", dec!(2000))]),
            live_fee: false,
        },
    ]
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl FlashArbitrageConfig {
    /// Load from a TOML or JSON file layered with `CYCLONE__*` environment keys
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let mut config: Self = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Short-form overrides for the values operators change most
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CYCLONE_RPC_URL") {
            self.network.read_url = url;
        }
        if let Ok(url) = std::env::var("CYCLONE_WS_URL") {
            self.network.ws_url = Some(url);
        }
        if let Ok(url) = std::env::var("CYCLONE_RELAY_URL") {
            self.relay.url = Some(url);
        }
        if let Some(min_profit) = env_parse::<Decimal>("CYCLONE_MIN_PROFIT_USD") {
            self.modes.normal.min_profit_usd = min_profit;
        }
        if let Some(attempts) = env_parse::<u32>("CYCLONE_ATTEMPTS_PER_DAY") {
            self.controller.attempts_per_day = attempts;
        }
        if let Some(max_gas) = env_parse::<u64>("CYCLONE_MAX_GAS_GWEI") {
            self.executor.max_gas_price_gwei = max_gas;
        }
        if let Ok(fallback) = std::env::var("CYCLONE_ALLOW_PUBLIC_FALLBACK") {
            self.executor.allow_public_fallback = fallback.eq_ignore_ascii_case("true");
        }
        if let Ok(level) = std::env::var("CYCLONE_LOG_LEVEL") {
            self.logging.log_level = level;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.sizing.ladder.validate()?;
        self.modes.validate()?;

        if !(3..=crate::paths::MAX_SUPPORTED_HOPS).contains(&self.sizing.max_hops) {
            bail!(
                "sizing.max_hops must be between 3 and {}",
                crate::paths::MAX_SUPPORTED_HOPS
            );
        }
        if self.sizing.reference_notional_usd <= dec!(0) {
            bail!("sizing.reference_notional_usd must be positive");
        }
        if self.sizing.scan_concurrency == 0 {
            bail!("sizing.scan_concurrency must be at least 1");
        }

        if self.assets.len() < 3 {
            bail!("At least 3 assets are required to form a cycle");
        }
        let mut symbols = HashSet::new();
        for asset in &self.assets {
            if !symbols.insert(asset.symbol.as_str()) {
                bail!("Duplicate asset symbol {}", asset.symbol);
            }
        }
        for symbol in [&self.exchange.usd_symbol, &self.exchange.native_symbol] {
            if !symbols.contains(symbol.as_str()) {
                bail!("Asset {} is not in the asset list", symbol);
            }
        }

        if self.lenders.is_empty() {
            bail!("At least one flash-loan lender is required");
        }
        for lender in &self.lenders {
            if lender.fee_bps > 10_000 || lender.fallback_fee_bps > 10_000 {
                bail!("Lender {} fee must be <= 10000 bps", lender.name);
            }
            for loan in &lender.max_loans {
                if !symbols.contains(loan.symbol.as_str()) {
                    bail!("Lender {} lends unknown asset {}", lender.name, loan.symbol);
                }
                if loan.usd <= dec!(0) {
                    bail!("Lender {} max loan for {} must be positive", lender.name, loan.symbol);
                }
            }
        }

        if self.controller.attempts_per_day == 0 {
            bail!("controller.attempts_per_day must be positive");
        }
        if self.controller.extreme.enabled && self.controller.extreme.max_attempts == 0 {
            bail!("controller.extreme.max_attempts must be positive");
        }
        if self.executor.max_gas_price_gwei == 0 {
            bail!("executor.max_gas_price_gwei must be positive");
        }
        if self.events.channel_capacity == 0 {
            bail!("events.channel_capacity must be positive");
        }
        Ok(())
    }

    /// Extra checks for runs that sign and submit
    pub fn validate_submission(&self) -> anyhow::Result<()> {
        if self.exchange.arbitrage_contract.is_zero() {
            bail!("exchange.arbitrage_contract must be set for live submission");
        }
        if self.relay.url.is_none() && !self.executor.allow_public_fallback {
            bail!("No private relay configured and executor.allow_public_fallback is false");
        }
        Ok(())
    }

    pub fn asset_universe(&self) -> &[Asset] {
        &self.assets
    }

    pub fn providers(&self) -> Vec<FlashloanProvider> {
        self.lenders.iter().map(LenderConfig::into_provider).collect()
    }

    pub fn find_asset(&self, symbol: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.symbol == symbol)
    }

    /// Expanded journal path, if configured
    pub fn journal_path(&self) -> anyhow::Result<Option<PathBuf>> {
        match &self.logging.journal_path {
            Some(raw) => {
                let expanded = shellexpand::full(raw)
                    .with_context(|| format!("Cannot expand journal path {raw}"))?;
                Ok(Some(PathBuf::from(expanded.as_ref())))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validation() {
        let config = FlashArbitrageConfig::default();
        assert!(config.validate().is_ok());
        // No contract and no relay by default
        assert!(config.validate_submission().is_err());
    }

    #[test]
    fn test_providers_from_lenders() {
        let config = FlashArbitrageConfig::default();
        let providers = config.providers();
        assert_eq!(providers.len(), 2);

        let aave = &providers[0];
        assert_eq!(aave.fee, FeeRate::from_bps(5));
        assert_eq!(aave.fallback_fee, FeeRate::from_bps(9));
        let wbnb = config.find_asset("WBNB").unwrap();
        assert_eq!(aave.max_loan_for(wbnb), Some(dec!(10000)));
        let busd = config.find_asset("BUSD").unwrap();
        assert!(!aave.supports(busd));
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[network]
read_url = "http://127.0.0.1:8545"

[relay]
url = "https://relay.example"

[exchange]
arbitrage_contract = "0x1111111111111111111111111111111111111111"

[controller]
attempts_per_day = 12

[sizing]
max_hops = 4
"#
        )
        .unwrap();

        let config = FlashArbitrageConfig::from_file(file.path()).unwrap();
        assert_eq!(config.network.read_url, "http://127.0.0.1:8545");
        assert_eq!(config.controller.attempts_per_day, 12);
        assert_eq!(config.sizing.max_hops, 4);
        // Untouched sections keep defaults
        assert_eq!(config.assets.len(), 6);
        assert_eq!(config.sizing.min_density_per_1000, dec!(0.60));
        assert!(config.validate().is_ok());
        assert!(config.validate_submission().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_universe() {
        let mut config = FlashArbitrageConfig::default();
        config.assets.truncate(2);
        assert!(config.validate().is_err());

        let mut config = FlashArbitrageConfig::default();
        config.lenders[0].max_loans.push(MaxLoan {
            symbol: "DOGE".to_string(),
            usd: dec!(100),
        });
        assert!(config.validate().is_err());

        let mut config = FlashArbitrageConfig::default();
        config.controller.attempts_per_day = 0;
        assert!(config.validate().is_err());

        let mut config = FlashArbitrageConfig::default();
        config.sizing.scan_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("CYCLONE_MIN_PROFIT_USD", "2.50");
        std::env::set_var("CYCLONE_ALLOW_PUBLIC_FALLBACK", "true");

        let config = FlashArbitrageConfig::from_env();

        assert_eq!(config.modes.normal.min_profit_usd, dec!(2.50));
        assert!(config.executor.allow_public_fallback);

        std::env::remove_var("CYCLONE_MIN_PROFIT_USD");
        std::env::remove_var("CYCLONE_ALLOW_PUBLIC_FALLBACK");
    }
}
