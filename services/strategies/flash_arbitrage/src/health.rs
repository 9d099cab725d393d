//! Periodic liveness probe: chain head and wallet balance

use async_trait::async_trait;
use network::{ChainClient, RpcError};
use std::sync::Arc;
use thiserror::Error;
use types::{Address, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub head: u64,
    pub balance_wei: U256,
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("wallet balance {balance} wei below minimum {minimum} wei")]
    LowBalance { balance: U256, minimum: U256 },
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<HealthReport, HealthError>;
}

pub struct HealthChecker {
    chain: Arc<dyn ChainClient>,
    wallet: Address,
    min_balance_wei: U256,
}

impl HealthChecker {
    pub fn new(chain: Arc<dyn ChainClient>, wallet: Address, min_balance_wei: U256) -> Self {
        Self {
            chain,
            wallet,
            min_balance_wei,
        }
    }
}

#[async_trait]
impl HealthProbe for HealthChecker {
    async fn check(&self) -> Result<HealthReport, HealthError> {
        let (head, balance_wei) = tokio::try_join!(self.chain.block_number(), self.chain.balance(self.wallet))?;
        if balance_wei < self.min_balance_wei {
            return Err(HealthError::LowBalance {
                balance: balance_wei,
                minimum: self.min_balance_wei,
            });
        }
        Ok(HealthReport { head, balance_wei })
    }
}
