//! Resilience tests for the RPC layer
//!
//! A scripted node stands in for the provider so throttling, timeouts and batch
//! pacing can be checked under tokio's paused clock.

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, ProviderError};
use ethers::types::{U256, U64};
use network::{
    BackoffPolicy, ChainClient, ResilientClient, ResilientClientError, RpcConfig, RpcError,
    RpcPool, RpcRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Step {
    Fail(&'static str),
    Reply(Value),
    Hang,
}

/// Replays `script` in order, then echoes params back
#[derive(Debug, Default)]
struct ScriptedNode {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedNode {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::default(),
        }
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl JsonRpcClient for ScriptedNode {
    type Error = ProviderError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), Instant::now()));
        let step = self.script.lock().unwrap().pop_front();

        match step {
            Some(Step::Fail(message)) => Err(ProviderError::CustomError(message.to_string())),
            Some(Step::Reply(value)) => Ok(serde_json::from_value(value)?),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::CustomError("hung".into()))
            }
            None => Ok(serde_json::from_value(serde_json::to_value(params)?)?),
        }
    }
}

fn fast_config() -> RpcConfig {
    RpcConfig {
        requests_per_second: 10_000,
        requests_per_minute: 10_000,
        ..RpcConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_two_rate_limits_then_success() {
    let limits = fast_config().handle_limits();
    let client = ResilientClient::new(
        ScriptedNode::new([
            Step::Fail("429 Too Many Requests"),
            Step::Fail("429 Too Many Requests"),
            Step::Reply(json!("0x2a")),
        ]),
        "read",
        &limits,
    );

    let block: U64 = client.request("eth_blockNumber", ()).await.unwrap();
    assert_eq!(block.as_u64(), 42);

    let times = client.inner().call_times();
    assert_eq!(times.len(), 3);
    let policy = BackoffPolicy::default();
    for pair in times.windows(2) {
        let delay = pair[1] - pair[0];
        assert!(delay >= policy.initial_delay(), "delay {delay:?} below initial");
        assert!(delay < policy.max_delay(), "delay {delay:?} at or above max");
    }
    assert!(times[2] - times[1] > times[1] - times[0]);
    assert_eq!(client.stats().rate_limited, 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_throttling_error_not_retried() {
    let limits = fast_config().handle_limits();
    let client = ResilientClient::new(
        ScriptedNode::new([Step::Fail("nonce too low")]),
        "write",
        &limits,
    );

    let result: Result<U256, _> = client.request("eth_sendRawTransaction", ["0x00"]).await;
    assert!(matches!(result, Err(ResilientClientError::Provider(_))));
    assert_eq!(client.inner().call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_digits_in_error_text_not_retried() {
    let limits = fast_config().handle_limits();
    let client = ResilientClient::new(
        ScriptedNode::new([Step::Fail(
            "insufficient funds for gas * price + value: address 0x4290000000000000000000000000000000000001 have 1 want 2",
        )]),
        "write",
        &limits,
    );

    let started = Instant::now();
    let result: Result<U256, _> = client.request("eth_sendRawTransaction", ["0x00"]).await;
    assert!(matches!(result, Err(ResilientClientError::Provider(_))));
    assert_eq!(client.inner().call_count(), 1);
    assert_eq!(client.stats().rate_limited, 0);
    assert!(Instant::now() - started < BackoffPolicy::default().initial_delay());
}

#[tokio::test(start_paused = true)]
async fn test_persistent_throttling_exhausts_retries() {
    let mut config = fast_config();
    config.backoff.max_retries = 2;
    let client = ResilientClient::new(
        ScriptedNode::new(std::iter::repeat(Step::Fail("rate limit exceeded")).take(10)),
        "read",
        &config.handle_limits(),
    );

    let result: Result<U64, _> = client.request("eth_chainId", ()).await;
    match result {
        Err(ResilientClientError::RateLimited { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected rate limit exhaustion, got {other:?}"),
    }
    assert_eq!(client.inner().call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried_then_reported() {
    let mut config = fast_config();
    config.request_timeout_ms = 1_000;
    config.backoff.max_retries = 1;
    let client = ResilientClient::new(
        ScriptedNode::new([Step::Hang, Step::Hang]),
        "read",
        &config.handle_limits(),
    );

    let result: Result<U64, _> = client.request("eth_blockNumber", ()).await;
    assert!(matches!(result, Err(ResilientClientError::Timeout(d)) if d == Duration::from_secs(1)));
    assert_eq!(client.inner().call_count(), 2);
    assert_eq!(client.stats().timeouts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_minute_ceiling_defers_excess_requests() {
    let config = RpcConfig {
        requests_per_minute: 2,
        ..fast_config()
    };
    let client = ResilientClient::new(ScriptedNode::default(), "read", &config.handle_limits());

    for i in 0..3u64 {
        let echoed: Vec<u64> = client.request("eth_getBlockByNumber", [i]).await.unwrap();
        assert_eq!(echoed, vec![i]);
    }

    let times = client.inner().call_times();
    assert!(times[1] - times[0] < Duration::from_secs(1));
    assert!(times[2] - times[0] >= Duration::from_secs(59));
    assert_eq!(client.stats().locally_throttled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_read_chunks_and_keeps_order() {
    let config = RpcConfig {
        max_batch_size: 20,
        inter_batch_delay_ms: 100,
        ..fast_config()
    };
    let pool = RpcPool::new(ScriptedNode::default(), ScriptedNode::default(), &config);

    let requests = (0..45)
        .map(|i| RpcRequest::new("eth_call", json!([i])))
        .collect();
    let results = pool.batch_read(requests).await;

    assert_eq!(results.len(), 45);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap(), &json!([i]));
    }

    let times = pool.read_handle().inner().call_times();
    assert_eq!(times.len(), 45);
    assert!(times[19] - times[0] < Duration::from_millis(100));
    assert!(times[20] - times[0] >= Duration::from_millis(100));
    assert!(times[40] - times[0] >= Duration::from_millis(200));
    assert_eq!(pool.write_handle().inner().call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_uses_write_handle() {
    let hash = format!("0x{}", "ab".repeat(32));
    let pool = RpcPool::new(
        ScriptedNode::default(),
        ScriptedNode::new([Step::Reply(json!(hash))]),
        &fast_config(),
    );

    let sent = pool
        .send_raw_transaction(vec![0x02, 0x01].into())
        .await
        .unwrap();
    assert_eq!(format!("{sent:?}"), hash);
    assert_eq!(pool.read_handle().inner().call_count(), 0);
    assert_eq!(pool.write_handle().inner().call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fee_data_without_priority_fee_support() {
    let pool = RpcPool::new(
        ScriptedNode::new([
            Step::Reply(json!("0x3b9aca00")),
            Step::Fail("the method eth_maxPriorityFeePerGas does not exist"),
        ]),
        ScriptedNode::default(),
        &fast_config(),
    );

    let fees = pool.fee_data().await.unwrap();
    assert_eq!(fees.gas_price, U256::from(1_000_000_000u64));
    assert!(fees.max_priority_fee_per_gas.is_none());
    assert_eq!(fees.effective_gas_price(), U256::from(1_000_000_000u64));
}

#[tokio::test(start_paused = true)]
async fn test_revert_maps_to_domain_error() {
    let pool = RpcPool::new(
        ScriptedNode::new([Step::Fail("execution reverted: K")]),
        ScriptedNode::default(),
        &fast_config(),
    );

    let err = pool.block_number().await.unwrap_err();
    assert!(matches!(err, RpcError::Transport(_) | RpcError::Reverted { .. }));
    assert!(!err.is_rate_limited());
}
