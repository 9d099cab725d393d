//! Notional ladder for flash-loan sizing
//!
//! Candidate loan sizes are a fixed ascending ladder, each rung clipped to the
//! lender's max loan and to a fraction of the thinnest reserve on the path. Sizing
//! then evaluates every surviving rung and keeps the most profitable.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Hard upper bound on the reserve fraction a single loan may consume
pub const MAX_RESERVE_CAP_FRACTION: Decimal = dec!(0.18);

/// Ladder configuration, all values in USD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    /// Ascending rung sizes
    pub rungs_usd: Vec<Decimal>,
    /// Fraction of the smallest reserve on the path a loan may take
    pub reserve_cap_fraction: Decimal,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            rungs_usd: vec![
                dec!(1000),
                dec!(2000),
                dec!(3000),
                dec!(5000),
                dec!(7500),
                dec!(10000),
            ],
            reserve_cap_fraction: MAX_RESERVE_CAP_FRACTION,
        }
    }
}

impl LadderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rungs_usd.is_empty() {
            bail!("Notional ladder must have at least one rung");
        }
        if self.rungs_usd.iter().any(|r| *r <= dec!(0)) {
            bail!("Ladder rungs must be positive");
        }
        if self.rungs_usd.windows(2).any(|w| w[0] >= w[1]) {
            bail!("Ladder rungs must be strictly ascending");
        }
        if self.reserve_cap_fraction <= dec!(0) || self.reserve_cap_fraction > MAX_RESERVE_CAP_FRACTION {
            bail!(
                "reserve_cap_fraction must be in (0, {}], got {}",
                MAX_RESERVE_CAP_FRACTION,
                self.reserve_cap_fraction
            );
        }
        Ok(())
    }

    /// `min(max_loan, fraction × min_reserve)`
    pub fn notional_cap(&self, max_loan_usd: Decimal, min_reserve_usd: Decimal) -> Decimal {
        let fraction = self.reserve_cap_fraction.min(MAX_RESERVE_CAP_FRACTION);
        max_loan_usd.min(min_reserve_usd * fraction).max(dec!(0))
    }

    /// Capped, deduplicated, ascending candidate notionals
    pub fn candidates(&self, max_loan_usd: Decimal, min_reserve_usd: Decimal) -> Vec<Decimal> {
        let cap = self.notional_cap(max_loan_usd, min_reserve_usd);
        if cap <= dec!(0) {
            return Vec::new();
        }

        let mut out: Vec<Decimal> = Vec::with_capacity(self.rungs_usd.len());
        for rung in &self.rungs_usd {
            let size = (*rung).min(cap);
            if out.last().map_or(true, |last| size > *last) {
                out.push(size);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_uncapped_ladder_is_rungs() {
        let ladder = LadderConfig::default();
        let c = ladder.candidates(dec!(1000000), dec!(100000000));
        assert_eq!(c, ladder.rungs_usd);
    }

    #[test]
    fn test_reserve_cap_collapses_rungs() {
        let ladder = LadderConfig::default();
        // 18% of 20k = 3.6k
        let c = ladder.candidates(dec!(1000000), dec!(20000));
        assert_eq!(c, vec![dec!(1000), dec!(2000), dec!(3000), dec!(3600)]);
    }

    #[test]
    fn test_lender_cap_applies() {
        let ladder = LadderConfig::default();
        let c = ladder.candidates(dec!(2500), dec!(100000000));
        assert_eq!(c, vec![dec!(1000), dec!(2000), dec!(2500)]);
    }

    #[test]
    fn test_validation_refuses_large_fraction() {
        let ladder = LadderConfig {
            reserve_cap_fraction: dec!(0.25),
            ..LadderConfig::default()
        };
        assert!(ladder.validate().is_err());
        assert!(LadderConfig::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_candidates_never_exceed_cap(
            max_loan in 1u64..50_000_000,
            reserve in 1u64..500_000_000,
        ) {
            let ladder = LadderConfig::default();
            let max_loan = Decimal::from(max_loan);
            let reserve = Decimal::from(reserve);
            let cap = max_loan.min(reserve * dec!(0.18));
            for size in ladder.candidates(max_loan, reserve) {
                prop_assert!(size <= cap);
                prop_assert!(size > dec!(0));
            }
        }
    }
}
