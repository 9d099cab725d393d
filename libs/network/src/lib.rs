//! Network Infrastructure
//!
//! Rate-limited JSON-RPC access to chain nodes:
//!
//! - [`client::ResilientClient`]: per-handle minute ceiling, per-second smoothing,
//!   request timeouts, and exponential backoff on throttling
//! - [`pool::RpcPool`]: separate read and write handles plus chunked bulk reads
//! - [`chain::ChainClient`]: the seam the rest of the system reads and broadcasts through

pub mod backoff;
pub mod chain;
pub mod client;
pub mod config;
pub mod counter;
pub mod error;
pub mod pool;

pub use backoff::{BackoffPolicy, RetryOutcome};
pub use chain::{ChainClient, FeeData};
pub use client::{HandleLimits, HandleStatsSnapshot, ResilientClient, ResilientClientError};
pub use config::RpcConfig;
pub use counter::WindowCounter;
pub use error::{is_rate_limit_error, matches_rate_limit, Result, RpcError};
pub use pool::{RpcPool, RpcRequest};
