//! Flash-loan lenders and their exact fee rates

use crate::asset::Asset;
use crate::errors::TypesError;
use ethers_core::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Fee as an exact `numerator / denominator` fraction of the borrowed amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    pub numerator: u64,
    pub denominator: u64,
}

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate {
        numerator: 0,
        denominator: 1,
    };

    pub fn new(numerator: u64, denominator: u64) -> Result<Self, TypesError> {
        if denominator == 0 || numerator > denominator {
            return Err(TypesError::InvalidFeeRate {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// 5 bps = 0.05%
    pub const fn from_bps(bps: u64) -> Self {
        Self {
            numerator: bps,
            denominator: 10_000,
        }
    }

    /// Fee owed on `amount`
    pub fn apply(&self, amount: Decimal) -> Decimal {
        amount * Decimal::from(self.numerator) / Decimal::from(self.denominator)
    }

    /// Greater of two rates, compared by cross-multiplication
    pub fn max(self, other: FeeRate) -> FeeRate {
        match self.cmp(&other) {
            Ordering::Less => other,
            _ => self,
        }
    }
}

impl PartialOrd for FeeRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeeRate {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.numerator as u128 * other.denominator as u128;
        let rhs = other.numerator as u128 * self.denominator as u128;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = self.apply(Decimal::ONE_HUNDRED).normalize();
        write!(f, "{}%", pct)
    }
}

/// How the lender hands out the borrowed balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LenderKind {
    /// Lending-pool flash loan, repaid with a premium on the principal
    Loan,
    /// Pair flash swap, repaid through the pool invariant
    Swap,
}

/// A flash-loan source and the assets it will lend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashloanProvider {
    pub name: String,
    pub kind: LenderKind,
    /// Pool or vault the arbitrage contract borrows from
    #[serde(default)]
    pub address: Address,
    /// Last known fee; refreshed live by the lender catalog
    pub fee: FeeRate,
    /// Used whenever a live fee cannot be fetched
    pub fallback_fee: FeeRate,
    /// Max loan per asset symbol, in USD
    pub max_loan_usd: BTreeMap<String, Decimal>,
}

impl FlashloanProvider {
    pub fn supports(&self, asset: &Asset) -> bool {
        self.max_loan_usd.contains_key(&asset.symbol)
    }

    pub fn max_loan_for(&self, asset: &Asset) -> Option<Decimal> {
        self.max_loan_usd.get(&asset.symbol).copied()
    }

    pub fn supported_symbols(&self) -> impl Iterator<Item = &str> {
        self.max_loan_usd.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_is_exact() {
        let fee = FeeRate::from_bps(5);
        assert_eq!(fee.apply(dec!(2000)), dec!(1));
        assert_eq!(fee.to_string(), "0.05%");
    }

    #[test]
    fn test_fee_ordering_uses_cross_multiplication() {
        let a = FeeRate::new(1, 3).unwrap();
        let b = FeeRate::new(333, 1000).unwrap();
        assert!(a > b);
        assert_eq!(a.max(b), a);
    }

    #[test]
    fn test_invalid_fee_rejected() {
        assert!(FeeRate::new(1, 0).is_err());
        assert!(FeeRate::new(3, 2).is_err());
    }
}
