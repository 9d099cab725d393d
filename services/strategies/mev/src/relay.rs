//! Private relay submission
//!
//! A private relay forwards signed transactions straight to block builders, keeping
//! them out of the public pending pool until inclusion. Availability is itself
//! fallible and is checked before every attempt.

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Bytes, H256};
use ethers::utils::keccak256;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    /// The relay received and refused the bundle
    #[error("relay rejected bundle: {0}")]
    Rejected(String),

    /// Request may or may not have reached the relay
    #[error("relay transport error: {0}")]
    Transport(String),
}

/// Acknowledgement returned by a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    pub bundle_hash: Option<H256>,
    pub target_block: u64,
    pub max_block: u64,
}

#[async_trait]
pub trait PrivateRelay: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    /// Submit signed transactions for inclusion in `target_block..=max_block`
    async fn submit(
        &self,
        signed_transactions: &[Bytes],
        target_block: u64,
        max_block: u64,
    ) -> Result<RelayReceipt, RelayError>;
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    result: Option<serde_json::Value>,
    error: Option<RelayResponseError>,
}

#[derive(Debug, Deserialize)]
struct RelayResponseError {
    #[serde(default)]
    code: i64,
    message: String,
}

/// Flashbots-style `eth_sendBundle` relay
pub struct FlashbotsRelay {
    name: String,
    url: String,
    client: reqwest::Client,
    auth: LocalWallet,
    availability_timeout: Duration,
}

impl FlashbotsRelay {
    /// `auth` only identifies the searcher to the relay; it never holds funds
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        auth: LocalWallet,
        request_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(request_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RelayError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
            auth,
            availability_timeout: request_timeout.min(Duration::from_secs(2)),
        })
    }

    async fn signature_header(&self, body: &str) -> Result<String, RelayError> {
        let digest = format!("{:?}", H256::from(keccak256(body.as_bytes())));
        let signature = self
            .auth
            .sign_message(digest)
            .await
            .map_err(|e| RelayError::Unavailable(format!("failed to sign relay request: {e}")))?;
        Ok(format!("{:?}:0x{}", self.auth.address(), signature))
    }
}

#[async_trait]
impl PrivateRelay for FlashbotsRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "eth_blockNumber", "params": []});
        let probe = self
            .client
            .post(&self.url)
            .timeout(self.availability_timeout)
            .json(&body)
            .send()
            .await;

        match probe {
            Ok(response) if !response.status().is_server_error() => true,
            Ok(response) => {
                warn!(relay = %self.name, status = %response.status(), "relay health probe failed");
                false
            }
            Err(e) => {
                warn!(relay = %self.name, "relay unreachable: {}", e);
                false
            }
        }
    }

    async fn submit(
        &self,
        signed_transactions: &[Bytes],
        target_block: u64,
        max_block: u64,
    ) -> Result<RelayReceipt, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendBundle",
            "params": [{
                "txs": signed_transactions,
                "blockNumber": format!("0x{target_block:x}"),
                "maxBlockNumber": format!("0x{max_block:x}"),
            }],
        })
        .to_string();

        let signature = self.signature_header(&body).await?;
        debug!(relay = %self.name, txs = signed_transactions.len(), target_block, max_block, "submitting bundle");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Flashbots-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RelayError::Unavailable(e.to_string())
                } else {
                    RelayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let parsed: RelayResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Transport(format!("HTTP {status}: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(RelayError::Rejected(format!("{} ({})", error.message, error.code)));
        }

        let bundle_hash = parsed
            .result
            .as_ref()
            .and_then(|r| r.get("bundleHash"))
            .and_then(|h| h.as_str())
            .and_then(|h| h.parse::<H256>().ok());

        Ok(RelayReceipt {
            bundle_hash,
            target_block,
            max_block,
        })
    }
}
