//! Slippage protection for on-chain minimum returns

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Upper bound on the slippage any caller may request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MevProtectionConfig {
    pub max_slippage_bps: u32,
}

impl Default for MevProtectionConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: 100, // 1%
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MevProtection {
    config: MevProtectionConfig,
}

impl MevProtection {
    pub fn new(config: MevProtectionConfig) -> Self {
        Self { config }
    }

    pub fn max_slippage(&self) -> Decimal {
        Decimal::from(self.config.max_slippage_bps) / Decimal::from(10_000)
    }

    /// Requested slippage clamped to `[0, max_slippage]`
    pub fn effective_slippage(&self, requested: Decimal) -> Decimal {
        requested.max(Decimal::ZERO).min(self.max_slippage())
    }

    /// Minimum acceptable output for `expected_output` at `slippage` (fraction),
    /// clamped to the configured maximum. Encoded into the call so the contract
    /// reverts rather than accept a worse fill.
    pub fn calculate_protected_min_output(&self, expected_output: Decimal, slippage: Decimal) -> Decimal {
        expected_output * (Decimal::ONE - self.effective_slippage(slippage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_min_output_applies_slippage() {
        let protection = MevProtection::default();
        assert_eq!(
            protection.calculate_protected_min_output(dec!(1010), dec!(0.005)),
            dec!(1004.95)
        );
    }

    #[test]
    fn test_slippage_clamped_to_max() {
        let protection = MevProtection::new(MevProtectionConfig { max_slippage_bps: 50 });
        assert_eq!(
            protection.calculate_protected_min_output(dec!(1000), dec!(0.2)),
            dec!(995)
        );
        assert_eq!(
            protection.calculate_protected_min_output(dec!(1000), dec!(-0.1)),
            dec!(1000)
        );
        assert_eq!(protection.effective_slippage(dec!(0.2)), dec!(0.005));
        assert_eq!(protection.effective_slippage(dec!(0.001)), dec!(0.001));
    }
}
