//! Cyclic path universe
//!
//! Every simple cycle of 3 (optionally 4) assets over the configured universe, one
//! entry per rotation class. A→B→C→A and B→C→A→B are the same trade with a different
//! borrowed asset, so each class is emitted once, rotated to start at the first asset
//! (in universe order) some lender will lend. Direction matters: A→C→B→A is a
//! separate cycle.

use std::collections::HashSet;
use tracing::debug;
use types::{Address, Asset, AssetPath, FlashloanProvider};

/// Longest cycle the generator will build
pub const MAX_SUPPORTED_HOPS: usize = 4;

/// Build all cycles with 3..=`max_hops` assets
pub fn generate_paths(
    assets: &[Asset],
    providers: &[FlashloanProvider],
    max_hops: usize,
) -> Vec<AssetPath> {
    let max_hops = max_hops.clamp(AssetPath::MIN_ASSETS, MAX_SUPPORTED_HOPS);
    let lendable: Vec<bool> = assets
        .iter()
        .map(|a| providers.iter().any(|p| p.supports(a)))
        .collect();

    let mut paths = Vec::new();
    let mut seen = HashSet::new();
    for len in AssetPath::MIN_ASSETS..=max_hops {
        for start in 0..assets.len() {
            let mut cycle = vec![start];
            extend_cycles(assets.len(), len, &mut cycle, &mut |indices| {
                let Some(rotated) = rotate_to_lendable(indices, &lendable) else {
                    return;
                };
                if !seen.insert(rotated.clone()) {
                    return;
                }
                let members = rotated.iter().map(|&i| assets[i].clone()).collect();
                match AssetPath::new(members) {
                    Ok(path) => paths.push(path),
                    Err(e) => debug!("Skipping cycle: {}", e),
                }
            });
        }
    }
    paths
}

/// Depth-first extension where `cycle[0]` stays the smallest index, so each rotation
/// class is visited exactly once
fn extend_cycles(
    universe: usize,
    len: usize,
    cycle: &mut Vec<usize>,
    emit: &mut dyn FnMut(&[usize]),
) {
    if cycle.len() == len {
        emit(cycle);
        return;
    }
    let first = cycle[0];
    for next in (first + 1)..universe {
        if cycle.contains(&next) {
            continue;
        }
        cycle.push(next);
        extend_cycles(universe, len, cycle, emit);
        cycle.pop();
    }
}

fn rotate_to_lendable(indices: &[usize], lendable: &[bool]) -> Option<Vec<usize>> {
    let pivot = indices
        .iter()
        .enumerate()
        .filter(|(_, i)| lendable[**i])
        .min_by_key(|(_, i)| **i)
        .map(|(pos, _)| pos)?;
    let mut rotated = indices.to_vec();
    rotated.rotate_left(pivot);
    Some(rotated)
}

/// Generated paths plus the asset set they were built from
#[derive(Debug, Default)]
pub struct PathUniverse {
    fingerprint: Vec<Address>,
    paths: Vec<AssetPath>,
}

impl PathUniverse {
    pub fn new(assets: &[Asset], providers: &[FlashloanProvider], max_hops: usize) -> Self {
        let mut universe = Self::default();
        universe.refresh(assets, providers, max_hops);
        universe
    }

    /// Regenerate only when the asset set changed. Returns whether it did.
    pub fn refresh(&mut self, assets: &[Asset], providers: &[FlashloanProvider], max_hops: usize) -> bool {
        let fingerprint: Vec<Address> = assets.iter().map(|a| a.address).collect();
        if fingerprint == self.fingerprint && !self.paths.is_empty() {
            return false;
        }
        self.paths = generate_paths(assets, providers, max_hops);
        self.fingerprint = fingerprint;
        true
    }

    pub fn paths(&self) -> &[AssetPath] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use types::{FeeRate, LenderKind};

    fn asset(symbol: &str, byte: u8) -> Asset {
        Asset::new(symbol, Address::repeat_byte(byte), 18)
    }

    fn lender(symbols: &[&str]) -> FlashloanProvider {
        FlashloanProvider {
            name: "pool".into(),
            kind: LenderKind::Loan,
            address: Address::repeat_byte(0xaa),
            fee: FeeRate::from_bps(5),
            fallback_fee: FeeRate::from_bps(9),
            max_loan_usd: symbols
                .iter()
                .map(|s| (s.to_string(), dec!(100000)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_three_assets_give_both_directions() {
        let assets = vec![asset("A", 1), asset("B", 2), asset("C", 3)];
        let paths = generate_paths(&assets, &[lender(&["A"])], 3);

        let names: Vec<String> = paths.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["A→B→C→A", "A→C→B→A"]);
    }

    #[test]
    fn test_rotation_starts_at_lendable_asset() {
        let assets = vec![asset("A", 1), asset("B", 2), asset("C", 3)];
        let paths = generate_paths(&assets, &[lender(&["C"])], 3);

        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.base().symbol == "C"));
    }

    #[test]
    fn test_unlendable_cycles_are_dropped() {
        let assets = vec![asset("A", 1), asset("B", 2), asset("C", 3)];
        assert!(generate_paths(&assets, &[lender(&["Z"])], 3).is_empty());
    }

    #[test]
    fn test_four_hop_count() {
        // 4 triples × 2 directions, plus 3! directed four-cycles
        let assets = vec![asset("A", 1), asset("B", 2), asset("C", 3), asset("D", 4)];
        let paths = generate_paths(&assets, &[lender(&["A", "B", "C", "D"])], 4);

        assert_eq!(paths.iter().filter(|p| p.hop_count() == 3).count(), 8);
        assert_eq!(paths.iter().filter(|p| p.hop_count() == 4).count(), 6);
    }

    #[test]
    fn test_universe_regenerates_only_on_change() {
        let mut assets = vec![asset("A", 1), asset("B", 2), asset("C", 3)];
        let providers = vec![lender(&["A"])];
        let mut universe = PathUniverse::new(&assets, &providers, 3);
        assert_eq!(universe.len(), 2);

        assert!(!universe.refresh(&assets, &providers, 3));
        assets.push(asset("D", 4));
        assert!(universe.refresh(&assets, &providers, 3));
        // B→C→D has no lendable asset
        assert_eq!(universe.len(), 6);
    }
}
