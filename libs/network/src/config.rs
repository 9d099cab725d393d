//! RPC endpoint configuration

use crate::backoff::BackoffPolicy;
use crate::client::HandleLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Endpoint for reads and simulation
    pub read_url: String,
    /// Endpoint for broadcasts; falls back to `read_url`
    pub write_url: Option<String>,
    /// Push endpoint for block and pending-tx subscriptions
    pub ws_url: Option<String>,
    pub request_timeout_ms: u64,
    pub requests_per_minute: u32,
    pub requests_per_second: u32,
    pub max_batch_size: usize,
    pub inter_batch_delay_ms: u64,
    pub backoff: BackoffPolicy,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            read_url: "http://localhost:8545".to_string(),
            write_url: None,
            ws_url: None,
            request_timeout_ms: 10_000,
            requests_per_minute: 600,
            requests_per_second: 25,
            max_batch_size: 20,
            inter_batch_delay_ms: 100,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RpcConfig {
    pub fn write_url(&self) -> &str {
        self.write_url.as_deref().unwrap_or(&self.read_url)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn handle_limits(&self) -> HandleLimits {
        HandleLimits {
            requests_per_minute: self.requests_per_minute,
            requests_per_second: self.requests_per_second,
            request_timeout_ms: self.request_timeout_ms,
            backoff: self.backoff.clone(),
        }
    }
}
