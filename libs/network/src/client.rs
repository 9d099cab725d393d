//! Resilient JSON-RPC client wrapper
//!
//! Wraps any ethers [`JsonRpcClient`] with a local request ceiling, a per-second
//! smoother, a request timeout, and exponential backoff on rate-limit signatures.
//! Anything that is not throttling or a timeout is returned on first sight.

use crate::backoff::{BackoffPolicy, RetryOutcome};
use crate::counter::WindowCounter;
use crate::error::is_rate_limit_error;
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, ProviderError, RpcError as EthersRpcError};
use governor::{DefaultDirectRateLimiter, Quota};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{trace, warn};

/// Per-handle limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleLimits {
    /// Self-imposed ceiling, independent of the provider's own limits
    pub requests_per_minute: u32,
    /// Burst smoother in front of the minute ceiling
    pub requests_per_second: u32,
    pub request_timeout_ms: u64,
    pub backoff: BackoffPolicy,
}

impl Default for HandleLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
            requests_per_second: 25,
            request_timeout_ms: 10_000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl HandleLimits {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Failure surfaced by [`ResilientClient`]
#[derive(Debug, Error)]
pub enum ResilientClientError {
    #[error("rate limited after {attempts} attempts: {source}")]
    RateLimited {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("serialization error: {0}")]
    Serde(serde_json::Error),
}

impl EthersRpcError for ResilientClientError {
    fn as_error_response(&self) -> Option<&JsonRpcError> {
        match self {
            ResilientClientError::RateLimited { source, .. } => source.as_error_response(),
            ResilientClientError::Provider(err) => err.as_error_response(),
            _ => None,
        }
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        match self {
            ResilientClientError::Serde(err) => Some(err),
            ResilientClientError::Provider(err) => err.as_serde_error(),
            _ => None,
        }
    }
}

impl From<ResilientClientError> for ProviderError {
    fn from(src: ResilientClientError) -> Self {
        match src {
            ResilientClientError::Provider(err) => err,
            other => ProviderError::JsonRpcClientError(Box::new(other)),
        }
    }
}

/// One failed attempt, before classification
enum AttemptError {
    Provider(ProviderError),
    Timeout,
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::Timeout => true,
            AttemptError::Provider(err) => is_rate_limit_error(err),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Provider(err) => write!(f, "{}", err),
            AttemptError::Timeout => f.write_str("timeout"),
        }
    }
}

/// Lock-free counters for one handle
#[derive(Debug, Default)]
pub struct HandleStats {
    requests: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    timeouts: AtomicU64,
    locally_throttled: AtomicU64,
}

/// Point-in-time copy of [`HandleStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleStatsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub timeouts: u64,
    pub locally_throttled: u64,
    pub requests_this_minute: u32,
}

/// JSON-RPC client with rate limiting, timeouts and backoff
pub struct ResilientClient<C> {
    inner: C,
    label: String,
    counter: WindowCounter,
    smoother: DefaultDirectRateLimiter,
    backoff: BackoffPolicy,
    request_timeout: Duration,
    stats: HandleStats,
}

impl<C: fmt::Debug> fmt::Debug for ResilientClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("label", &self.label)
            .field("inner", &self.inner)
            .field("ceiling_per_minute", &self.counter.ceiling())
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl<C: JsonRpcClient> ResilientClient<C> {
    pub fn new(inner: C, label: impl Into<String>, limits: &HandleLimits) -> Self {
        let rps = NonZeroU32::new(limits.requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            inner,
            label: label.into(),
            counter: WindowCounter::starting_at(
                limits.requests_per_minute,
                Duration::from_secs(60),
                Instant::now().into_std(),
            ),
            smoother: DefaultDirectRateLimiter::direct(Quota::per_second(rps)),
            backoff: limits.backoff.clone(),
            request_timeout: limits.request_timeout(),
            stats: HandleStats::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn stats(&self) -> HandleStatsSnapshot {
        HandleStatsSnapshot {
            requests: self.stats.requests.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            rate_limited: self.stats.rate_limited.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            locally_throttled: self.stats.locally_throttled.load(Ordering::Relaxed),
            requests_this_minute: self.counter.current(Instant::now().into_std()),
        }
    }

    /// Wait for room under the minute ceiling, then for the smoother
    async fn admit(&self, method: &str) {
        loop {
            match self.counter.try_acquire(Instant::now().into_std()) {
                Ok(_) => break,
                Err(wait) => {
                    self.stats.locally_throttled.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        handle = %self.label,
                        method,
                        wait_ms = wait.as_millis() as u64,
                        "⏱️ per-minute ceiling of {} reached, waiting for next window",
                        self.counter.ceiling()
                    );
                    sleep(wait).await;
                }
            }
        }
        self.smoother.until_ready().await;
    }

    /// Issue one request with untyped params and result
    pub async fn request_value(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ResilientClientError> {
        let params = if params.is_null() {
            serde_json::Value::Array(Vec::new())
        } else {
            params
        };

        let outcome = self
            .backoff
            .retry(
                |attempt| {
                    let params = params.clone();
                    async move {
                        if attempt > 1 {
                            self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        }
                        self.admit(method).await;
                        self.stats.requests.fetch_add(1, Ordering::Relaxed);
                        trace!(handle = %self.label, method, attempt, "rpc request");

                        match timeout(
                            self.request_timeout,
                            self.inner.request::<_, serde_json::Value>(method, params),
                        )
                        .await
                        {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(err)) => {
                                let err: ProviderError = err.into();
                                if is_rate_limit_error(&err) {
                                    self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(AttemptError::Provider(err))
                            }
                            Err(_) => {
                                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                                Err(AttemptError::Timeout)
                            }
                        }
                    }
                },
                AttemptError::is_transient,
            )
            .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(RetryOutcome::Fatal(AttemptError::Provider(err))) => {
                Err(ResilientClientError::Provider(err))
            }
            Err(RetryOutcome::Exhausted {
                attempts,
                last: AttemptError::Provider(err),
            }) => Err(ResilientClientError::RateLimited {
                attempts,
                source: err,
            }),
            Err(RetryOutcome::Fatal(AttemptError::Timeout))
            | Err(RetryOutcome::Exhausted {
                last: AttemptError::Timeout,
                ..
            }) => Err(ResilientClientError::Timeout(self.request_timeout)),
        }
    }
}

#[async_trait]
impl<C> JsonRpcClient for ResilientClient<C>
where
    C: JsonRpcClient + 'static,
{
    type Error = ResilientClientError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: fmt::Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(params).map_err(ResilientClientError::Serde)?;
        let value = self.request_value(method, params).await?;
        serde_json::from_value(value).map_err(ResilientClientError::Serde)
    }
}

impl From<ResilientClientError> for crate::error::RpcError {
    fn from(err: ResilientClientError) -> Self {
        use crate::error::RpcError;
        match err {
            ResilientClientError::RateLimited { attempts, source } => RpcError::RateLimited {
                attempts,
                message: source.to_string(),
            },
            ResilientClientError::Timeout(after) => RpcError::Timeout(after),
            ResilientClientError::Provider(err) => RpcError::from(err),
            ResilientClientError::Serde(err) => RpcError::Decode(err.to_string()),
        }
    }
}
