//! Read/write RPC handle pair
//!
//! Reads and simulation go through one [`ResilientClient`], broadcasts through
//! another, so a throttled read path never delays a submission. Bulk reads are
//! chunked into bounded concurrent batches with a pause between chunks.

use crate::chain::{ChainClient, FeeData};
use crate::client::{HandleStatsSnapshot, ResilientClient};
use crate::config::RpcConfig;
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use ethers::providers::{Http, JsonRpcClient};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, Filter, Log, TransactionReceipt, H256, U256, U64,
};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

/// One request of a bulk read
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn eth_call(tx: &TypedTransaction) -> Self {
        Self::new("eth_call", json!([tx, BlockId::Number(BlockNumber::Latest)]))
    }
}

#[derive(Debug)]
pub struct RpcPool<C = Http> {
    read: ResilientClient<C>,
    write: ResilientClient<C>,
    max_batch_size: usize,
    inter_batch_delay: Duration,
}

fn parse_url(raw: &str) -> Result<Url> {
    raw.parse()
        .map_err(|e| RpcError::Transport(format!("invalid RPC URL {raw}: {e}")))
}

impl RpcPool<Http> {
    /// Build HTTP handles with a shared, keep-alive connection pool
    pub fn connect(config: &RpcConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_millis(config.request_timeout_ms.saturating_mul(2)))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {e}")))?;

        let read = Http::new_with_client(parse_url(&config.read_url)?, http_client.clone());
        let write = Http::new_with_client(parse_url(config.write_url())?, http_client);

        info!(
            "🔌 RPC pool ready (read: {}, write: {}, ceiling {}/min)",
            config.read_url,
            config.write_url(),
            config.requests_per_minute
        );
        Ok(Self::new(read, write, config))
    }
}

impl<C: JsonRpcClient + 'static> RpcPool<C> {
    pub fn new(read: C, write: C, config: &RpcConfig) -> Self {
        let limits = config.handle_limits();
        Self {
            read: ResilientClient::new(read, "read", &limits),
            write: ResilientClient::new(write, "write", &limits),
            max_batch_size: config.max_batch_size.max(1),
            inter_batch_delay: config.inter_batch_delay(),
        }
    }

    pub fn read_handle(&self) -> &ResilientClient<C> {
        &self.read
    }

    pub fn write_handle(&self) -> &ResilientClient<C> {
        &self.write
    }

    pub fn stats(&self) -> (HandleStatsSnapshot, HandleStatsSnapshot) {
        (self.read.stats(), self.write.stats())
    }

    /// Issue requests in chunks of `max_batch_size`, concurrently within a chunk,
    /// pausing `inter_batch_delay` between chunks. Results keep input order.
    pub async fn batch_read(&self, requests: Vec<RpcRequest>) -> Vec<Result<Value>> {
        let chunk_count = requests.len().div_ceil(self.max_batch_size);
        let mut results = Vec::with_capacity(requests.len());

        for (index, chunk) in requests.chunks(self.max_batch_size).enumerate() {
            if index > 0 && !self.inter_batch_delay.is_zero() {
                sleep(self.inter_batch_delay).await;
            }
            debug!(chunk = index + 1, of = chunk_count, size = chunk.len(), "batch read");

            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|req| self.read.request_value(&req.method, req.params.clone())),
            )
            .await;
            results.extend(outcomes.into_iter().map(|r| r.map_err(RpcError::from)));
        }
        results
    }

    async fn read<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let value = self.read.request_value(method, params).await?;
        decode(value)
    }

    async fn write<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let value = self.write.request_value(method, params).await?;
        decode(value)
    }
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R> {
    serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
}

#[async_trait]
impl<C: JsonRpcClient + 'static> ChainClient for RpcPool<C> {
    async fn call(&self, tx: &TypedTransaction, block: Option<BlockId>) -> Result<Bytes> {
        let block = block.unwrap_or(BlockId::Number(BlockNumber::Latest));
        self.read("eth_call", json!([tx, block])).await
    }

    async fn batch_call(&self, txs: Vec<TypedTransaction>) -> Vec<Result<Bytes>> {
        let requests = txs.iter().map(RpcRequest::eth_call).collect();
        self.batch_read(requests)
            .await
            .into_iter()
            .map(|r| r.and_then(decode))
            .collect()
    }

    async fn block_number(&self) -> Result<u64> {
        let number: U64 = self.read("eth_blockNumber", json!([])).await?;
        Ok(number.as_u64())
    }

    async fn fee_data(&self) -> Result<FeeData> {
        let gas_price: U256 = self.read("eth_gasPrice", json!([])).await?;
        // Chains without EIP-1559 reject this method
        let tip: Option<U256> = self.read("eth_maxPriorityFeePerGas", json!([])).await.ok();
        Ok(FeeData {
            gas_price,
            max_fee_per_gas: tip.map(|tip| gas_price.saturating_mul(U256::from(2)).max(gas_price + tip)),
            max_priority_fee_per_gas: tip,
        })
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.read("eth_getLogs", json!([filter])).await
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.read("eth_getBalance", json!([address, BlockNumber::Latest]))
            .await
    }

    async fn nonce(&self, address: Address) -> Result<U256> {
        self.read(
            "eth_getTransactionCount",
            json!([address, BlockNumber::Pending]),
        )
        .await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256> {
        self.read("eth_estimateGas", json!([tx])).await
    }

    async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.read("eth_chainId", json!([])).await?;
        Ok(id.as_u64())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        self.write("eth_sendRawTransaction", json!([raw])).await
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        self.read("eth_getTransactionReceipt", json!([hash])).await
    }
}
