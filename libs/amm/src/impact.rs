//! Reserve-relative price impact

use anyhow::{bail, Result};
use rust_decimal::Decimal;

/// Impact of `notional` against the thinnest reserve, `x / (R + x)`
///
/// Both values must share a unit (USD in practice).
pub fn reserve_impact(notional: Decimal, min_reserve: Decimal) -> Result<Decimal> {
    if notional <= Decimal::ZERO {
        bail!("Notional must be positive");
    }
    if min_reserve <= Decimal::ZERO {
        bail!("Reserve must be positive");
    }
    Ok(notional / (min_reserve + notional))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reserve_impact() {
        assert_eq!(reserve_impact(dec!(1000), dec!(99000)).unwrap(), dec!(0.01));
        assert!(reserve_impact(dec!(1), dec!(0)).is_err());
        assert!(reserve_impact(dec!(0), dec!(10)).is_err());
    }

    proptest! {
        #[test]
        fn prop_impact_grows_with_size(
            reserve in 1_000u64..1_000_000_000,
            small in 1u64..1_000_000,
            extra in 1u64..1_000_000,
        ) {
            let reserve = Decimal::from(reserve);
            let a = reserve_impact(Decimal::from(small), reserve).unwrap();
            let b = reserve_impact(Decimal::from(small + extra), reserve).unwrap();
            prop_assert!(a < b);
            prop_assert!(b < Decimal::ONE);
        }
    }
}
