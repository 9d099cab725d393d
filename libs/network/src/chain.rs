//! Chain access seam
//!
//! Everything above the network layer (market reads, fee lookups, simulation,
//! broadcast) talks to the chain through [`ChainClient`], so tests can swap in
//! scripted chains.

use crate::error::Result;
use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Bytes, Filter, Log, TransactionReceipt, H256, U256};

/// Current fee market snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeData {
    pub gas_price: U256,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

impl FeeData {
    pub fn legacy(gas_price: U256) -> Self {
        Self {
            gas_price,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        }
    }

    /// Price a transaction should expect to pay per gas
    pub fn effective_gas_price(&self) -> U256 {
        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(max_fee), Some(tip)) => max_fee.min(self.gas_price + tip),
            _ => self.gas_price,
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Read-only call against `block` (latest when `None`)
    async fn call(&self, tx: &TypedTransaction, block: Option<BlockId>) -> Result<Bytes>;

    /// Independent read-only calls; results keep input order
    async fn batch_call(&self, txs: Vec<TypedTransaction>) -> Vec<Result<Bytes>> {
        let mut results = Vec::with_capacity(txs.len());
        for tx in &txs {
            results.push(self.call(tx, None).await);
        }
        results
    }

    async fn block_number(&self) -> Result<u64>;

    async fn fee_data(&self) -> Result<FeeData>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    async fn balance(&self, address: Address) -> Result<U256>;

    /// Pending nonce
    async fn nonce(&self, address: Address) -> Result<U256>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256>;

    async fn chain_id(&self) -> Result<u64>;

    /// Broadcast through the write handle
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256>;

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_gas_price() {
        let legacy = FeeData::legacy(U256::from(5_000_000_000u64));
        assert_eq!(legacy.effective_gas_price(), U256::from(5_000_000_000u64));

        let dynamic = FeeData {
            gas_price: U256::from(3_000_000_000u64),
            max_fee_per_gas: Some(U256::from(4_000_000_000u64)),
            max_priority_fee_per_gas: Some(U256::from(2_000_000_000u64)),
        };
        assert_eq!(dynamic.effective_gas_price(), U256::from(4_000_000_000u64));
    }
}
