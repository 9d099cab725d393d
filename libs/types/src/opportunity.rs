//! Sized opportunities, operating modes and the execution state

use crate::asset::AssetPath;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which parameter set the sizing engine runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Bootstrap: strict attempt cap, tight slippage, low profit floor
    Extreme,
    /// Steady state: looser thresholds, no attempt cap
    Normal,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Extreme => f.write_str("EXTREME"),
            OperatingMode::Normal => f.write_str("NORMAL"),
        }
    }
}

/// Thresholds a candidate must clear; the only thing distinguishing the two modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeParams {
    pub mode: OperatingMode,
    /// net ≥ this, USD
    pub min_profit_usd: Decimal,
    /// net ≥ gas × this
    pub profit_to_gas_ratio: Decimal,
    /// gas ≤ this, USD
    pub max_gas_usd: Decimal,
    /// Fraction of expected output tolerated as slippage (0.003 = 0.3%)
    pub slippage_tolerance: Decimal,
    /// Fraction; candidates with larger impact are rejected
    pub max_price_impact: Decimal,
}

impl ModeParams {
    pub fn extreme() -> Self {
        Self {
            mode: OperatingMode::Extreme,
            min_profit_usd: dec!(1.00),
            profit_to_gas_ratio: dec!(3),
            max_gas_usd: dec!(0.50),
            slippage_tolerance: dec!(0.001),
            max_price_impact: dec!(0.003),
        }
    }

    pub fn normal() -> Self {
        Self {
            mode: OperatingMode::Normal,
            min_profit_usd: dec!(2.00),
            profit_to_gas_ratio: dec!(2),
            max_gas_usd: dec!(2.00),
            slippage_tolerance: dec!(0.005),
            max_price_impact: dec!(0.01),
        }
    }
}

/// A trade the sizing engine judged worth attempting
///
/// Produced once per decision cycle and discarded after the attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedOpportunity {
    pub path: AssetPath,
    pub provider: String,
    pub mode: OperatingMode,
    /// Borrowed amount in USD
    pub notional_usd: Decimal,
    /// Borrowed amount in base-asset units
    pub amount_in: Decimal,
    /// Simulated cycle output in base-asset units
    pub expected_output: Decimal,
    /// Output floor encoded on-chain; the call reverts below it
    pub min_output: Decimal,
    pub gross_profit_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub lender_fee_usd: Decimal,
    pub net_profit_usd: Decimal,
    pub price_impact: Decimal,
    pub slippage_tolerance: Decimal,
}

impl SizedOpportunity {
    /// Net profit per dollar of gas
    pub fn profit_to_gas(&self) -> Option<Decimal> {
        if self.gas_cost_usd.is_zero() {
            None
        } else {
            Some(self.net_profit_usd / self.gas_cost_usd)
        }
    }
}

/// Process-wide gate on sizing and execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    Idle,
    Simulating,
    Executing,
}

impl ExecutionState {
    pub fn is_busy(&self) -> bool {
        !matches!(self, ExecutionState::Idle)
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        ExecutionState::Idle
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Idle => f.write_str("IDLE"),
            ExecutionState::Simulating => f.write_str("SIMULATING"),
            ExecutionState::Executing => f.write_str("EXECUTING"),
        }
    }
}
