//! Bundle planner: sized opportunity → arbitrage contract call
//!
//! The deployed contract borrows `amount` of `asset` from `lender`, swaps it around
//! `path` on the configured router and reverts unless at least `minReturn` comes
//! back. The protected minimum output computed at sizing time is what lands in
//! `minReturn`.

use crate::market::to_units;
use ethers::abi::parse_abi;
use ethers::contract::BaseContract;
use mev::{BundleBuilder, BundleError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::{Address, Bundle, CallDescriptor, FlashloanProvider, SizedOpportunity, U256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Blocks the bundle stays valid for
    pub validity_blocks: u64,
    /// Builder tip appended as a plain transfer
    pub tip_recipient: Option<Address>,
    pub tip_wei: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            validity_blocks: 2,
            tip_recipient: None,
            tip_wei: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("abi error: {0}")]
    Abi(String),

    #[error("unknown lender {0}")]
    UnknownLender(String),

    #[error("amount {0} does not fit token units")]
    Units(String),

    #[error(transparent)]
    Bundle(#[from] BundleError),
}

pub struct BundlePlanner {
    contract: Address,
    abi: BaseContract,
    config: PlannerConfig,
}

impl BundlePlanner {
    pub fn new(contract: Address, config: PlannerConfig) -> Result<Self, PlanError> {
        let abi = parse_abi(&[
            "function executeCycle(address lender, address asset, uint256 amount, address[] path, uint256 minReturn) external",
        ])
        .map_err(|e| PlanError::Abi(e.to_string()))?;
        Ok(Self {
            contract,
            abi: BaseContract::from(abi),
            config,
        })
    }

    pub fn plan(&self, opportunity: &SizedOpportunity, lenders: &[FlashloanProvider]) -> Result<Bundle, PlanError> {
        let lender = lenders
            .iter()
            .find(|l| l.name == opportunity.provider)
            .ok_or_else(|| PlanError::UnknownLender(opportunity.provider.clone()))?;

        let base = opportunity.path.base();
        let amount = to_units(opportunity.amount_in, base.decimals)
            .ok_or_else(|| PlanError::Units(opportunity.amount_in.to_string()))?;
        let min_return = to_units(opportunity.min_output, base.decimals)
            .ok_or_else(|| PlanError::Units(opportunity.min_output.to_string()))?;

        let payload = self
            .abi
            .encode(
                "executeCycle",
                (
                    lender.address,
                    base.address,
                    amount,
                    opportunity.path.route_addresses(),
                    min_return,
                ),
            )
            .map_err(|e| PlanError::Abi(e.to_string()))?;

        let mut builder = BundleBuilder::new(self.config.validity_blocks)
            .add_call(CallDescriptor::new(self.contract, payload, U256::zero()))
            .label(opportunity.path.to_string());
        if let Some(recipient) = self.config.tip_recipient {
            if self.config.tip_wei > 0 {
                builder = builder.add_transfer(recipient, U256::from(self.config.tip_wei));
            }
        }
        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::{Asset, AssetPath, FeeRate, LenderKind, OperatingMode};

    fn opportunity() -> SizedOpportunity {
        let path = AssetPath::new(vec![
            Asset::stablecoin("USDT", Address::repeat_byte(1), 18),
            Asset::new("WBNB", Address::repeat_byte(2), 18),
            Asset::new("CAKE", Address::repeat_byte(3), 18),
        ])
        .unwrap();
        SizedOpportunity {
            path,
            provider: "aave".into(),
            mode: OperatingMode::Extreme,
            notional_usd: dec!(2000),
            amount_in: dec!(2000),
            expected_output: dec!(2020),
            min_output: dec!(2017.98),
            gross_profit_usd: dec!(20),
            gas_cost_usd: dec!(0.30),
            lender_fee_usd: dec!(1),
            net_profit_usd: dec!(18.70),
            price_impact: dec!(0.0002),
            slippage_tolerance: dec!(0.001),
        }
    }

    fn lenders() -> Vec<FlashloanProvider> {
        vec![FlashloanProvider {
            name: "aave".into(),
            kind: LenderKind::Loan,
            address: Address::repeat_byte(0xaa),
            fee: FeeRate::from_bps(5),
            fallback_fee: FeeRate::from_bps(9),
            max_loan_usd: Default::default(),
        }]
    }

    #[test]
    fn test_plan_encodes_single_call() {
        let planner = BundlePlanner::new(Address::repeat_byte(0xcc), PlannerConfig::default()).unwrap();
        let bundle = planner.plan(&opportunity(), &lenders()).unwrap();

        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.validity_blocks, 2);
        assert_eq!(bundle.label, "USDT→WBNB→CAKE→USDT");
        assert_eq!(bundle.calls[0].target, Address::repeat_byte(0xcc));
        // selector + 5 head words + path length + 4 addresses
        assert_eq!(bundle.calls[0].payload.len(), 4 + 32 * 10);
    }

    #[test]
    fn test_tip_is_appended() {
        let config = PlannerConfig {
            tip_recipient: Some(Address::repeat_byte(0xbb)),
            tip_wei: 1_000,
            ..PlannerConfig::default()
        };
        let planner = BundlePlanner::new(Address::repeat_byte(0xcc), config).unwrap();
        let bundle = planner.plan(&opportunity(), &lenders()).unwrap();

        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.calls[1].value, U256::from(1_000));
    }

    #[test]
    fn test_unknown_lender_refused() {
        let planner = BundlePlanner::new(Address::repeat_byte(0xcc), PlannerConfig::default()).unwrap();
        assert!(matches!(
            planner.plan(&opportunity(), &[]),
            Err(PlanError::UnknownLender(_))
        ));
    }
}
