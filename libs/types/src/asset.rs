//! Assets and the cyclic paths built from them

use crate::errors::TypesError;
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A fungible token the system is allowed to route through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    /// USD-pegged; quoted at 1.0 without touching the chain
    #[serde(default)]
    pub stable: bool,
}

impl Asset {
    pub fn new(symbol: impl Into<String>, address: Address, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            address,
            decimals,
            stable: false,
        }
    }

    pub fn stablecoin(symbol: impl Into<String>, address: Address, decimals: u8) -> Self {
        Self {
            stable: true,
            ..Self::new(symbol, address, decimals)
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// Ordered (base, quote) pair used to key quotes and pools
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetPair {
    pub base: Asset,
    pub quote: Asset,
}

impl AssetPair {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }

    /// Same pair with sides swapped
    pub fn inverted(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base.symbol, self.quote.symbol)
    }
}

/// Cyclic route A → B → C (→ ...) → A on a single exchange
///
/// The closing hop back to the first asset is implicit. The first asset is the one
/// borrowed from the lender and repaid at the end of the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetPath {
    assets: Vec<Asset>,
}

impl AssetPath {
    pub const MIN_ASSETS: usize = 3;

    pub fn new(assets: Vec<Asset>) -> Result<Self, TypesError> {
        if assets.len() < Self::MIN_ASSETS {
            return Err(TypesError::PathTooShort { len: assets.len() });
        }

        let mut seen = HashSet::with_capacity(assets.len());
        for asset in &assets {
            if !seen.insert(asset.address) {
                return Err(TypesError::DuplicateAsset {
                    symbol: asset.symbol.clone(),
                });
            }
        }

        Ok(Self { assets })
    }

    /// Asset borrowed and repaid
    pub fn base(&self) -> &Asset {
        &self.assets[0]
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Number of swaps, including the closing hop
    pub fn hop_count(&self) -> usize {
        self.assets.len()
    }

    /// Every (from, to) hop, closing back to the base
    pub fn hops(&self) -> impl Iterator<Item = (&Asset, &Asset)> + '_ {
        let n = self.assets.len();
        (0..n).map(move |i| (&self.assets[i], &self.assets[(i + 1) % n]))
    }

    /// Router path `[A, B, C, A]`
    pub fn route_addresses(&self) -> Vec<Address> {
        self.assets
            .iter()
            .chain(std::iter::once(self.base()))
            .map(|a| a.address)
            .collect()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.assets.iter().any(|a| &a.address == address)
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for asset in &self.assets {
            write!(f, "{}→", asset.symbol)?;
        }
        f.write_str(&self.base().symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(symbol: &str, byte: u8) -> Asset {
        Asset::new(symbol, Address::repeat_byte(byte), 18)
    }

    #[test]
    fn test_path_requires_three_assets() {
        let err = AssetPath::new(vec![asset("A", 1), asset("B", 2)]).unwrap_err();
        assert_eq!(err, TypesError::PathTooShort { len: 2 });
    }

    #[test]
    fn test_path_rejects_repeats() {
        let err = AssetPath::new(vec![asset("A", 1), asset("B", 2), asset("A", 1)]).unwrap_err();
        assert!(matches!(err, TypesError::DuplicateAsset { .. }));
    }

    #[test]
    fn test_hops_close_the_cycle() {
        let path = AssetPath::new(vec![asset("A", 1), asset("B", 2), asset("C", 3)]).unwrap();
        let hops: Vec<_> = path
            .hops()
            .map(|(a, b)| format!("{}{}", a.symbol, b.symbol))
            .collect();
        assert_eq!(hops, vec!["AB", "BC", "CA"]);
        assert_eq!(path.route_addresses().len(), 4);
        assert_eq!(path.to_string(), "A→B→C→A");
    }
}
