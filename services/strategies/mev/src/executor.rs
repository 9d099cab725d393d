//! Atomic bundle executor
//!
//! Validates, simulates, signs and submits a [`Bundle`], then waits for inclusion.
//! Submission goes to a private relay; the public mempool is used only when the
//! caller opted in, and per-call sequential submission only when the relay refused
//! the bundle and the caller opted into losing atomicity.

use crate::bundle::{validate_bundle, BundleError};
use crate::relay::{PrivateRelay, RelayError};
use crate::simulation::{call_request, simulate_bundle, SimulationFailure};
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, Eip1559TransactionRequest, H256, U256};
use network::{ChainClient, FeeData};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use types::Bundle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_calls: usize,
    pub simulation_timeout_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    /// Broadcast publicly when the private relay is down
    pub allow_public_fallback: bool,
    /// Submit calls one by one, non-atomically, when the relay rejects the bundle
    pub allow_sequential_fallback: bool,
    pub gas_limit_buffer_pct: u64,
    pub default_gas_limit: u64,
    pub max_gas_price_gwei: u64,
    pub use_eip1559: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_calls: 8,
            simulation_timeout_ms: 3_000,
            confirmation_timeout_secs: 60,
            receipt_poll_interval_ms: 500,
            allow_public_fallback: false,
            allow_sequential_fallback: false,
            gas_limit_buffer_pct: 10,
            default_gas_limit: 600_000,
            max_gas_price_gwei: 20,
            use_eip1559: false,
        }
    }
}

impl ExecutorConfig {
    pub fn simulation_timeout(&self) -> Duration {
        Duration::from_millis(self.simulation_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn max_gas_price_wei(&self) -> U256 {
        U256::from(self.max_gas_price_gwei) * U256::exp10(9)
    }
}

/// How signed transactions left the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmissionChannel {
    PrivateRelay,
    PublicMempool,
    /// Per-call submission after a relay rejection
    Sequential,
}

impl fmt::Display for SubmissionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionChannel::PrivateRelay => f.write_str("private-relay"),
            SubmissionChannel::PublicMempool => f.write_str("public-mempool"),
            SubmissionChannel::Sequential => f.write_str("sequential"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitFailure {
    #[error("invalid bundle: {0}")]
    InvalidBundle(#[from] BundleError),

    #[error("simulation: call {index} would revert: {reason}")]
    SimulationReverted { index: usize, reason: String },

    #[error("simulation: call {index} failed: {reason}")]
    SimulationError { index: usize, reason: String },

    #[error("simulation timed out after {0:?}")]
    SimulationTimeout(Duration),

    #[error("private relay unavailable and public fallback not permitted")]
    RelayUnavailable,

    #[error("relay rejected bundle: {0}")]
    RelayRejected(String),

    #[error("gas price {price_gwei} gwei above cap {cap_gwei} gwei")]
    GasPriceTooHigh { price_gwei: u64, cap_gwei: u64 },

    #[error("failed to prepare transactions: {0}")]
    Preparation(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("transaction {0:?} reverted on-chain")]
    Reverted(H256),

    #[error("not included by block {0}")]
    NotIncluded(u64),

    #[error("no confirmation within {0:?}")]
    ConfirmationTimeout(Duration),
}

impl From<SimulationFailure> for SubmitFailure {
    fn from(failure: SimulationFailure) -> Self {
        match failure {
            SimulationFailure::Reverted { index, reason } => {
                SubmitFailure::SimulationReverted { index, reason }
            }
            other => SubmitFailure::SimulationError {
                index: other.index(),
                reason: other.to_string(),
            },
        }
    }
}

impl SubmitFailure {
    /// Index of the offending call for simulation failures
    pub fn call_index(&self) -> Option<usize> {
        match self {
            SubmitFailure::SimulationReverted { index, .. }
            | SubmitFailure::SimulationError { index, .. } => Some(*index),
            SubmitFailure::InvalidBundle(BundleError::MissingField { index, .. })
            | SubmitFailure::InvalidBundle(BundleError::SpliceOutOfRange { index, .. }) => Some(*index),
            _ => None,
        }
    }
}

/// Result of one `submit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Included {
        identifier: H256,
        channel: SubmissionChannel,
        /// False when the all-or-nothing guarantee was given up
        atomic: bool,
        gas_used: U256,
        block: u64,
    },
    /// Stopped before anything was broadcast
    Rejected(SubmitFailure),
    /// Broadcast, then failed; gas may have been spent
    Failed {
        reason: SubmitFailure,
        identifier: Option<H256>,
        channel: SubmissionChannel,
        atomic: bool,
    },
}

impl SubmitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, SubmitOutcome::Included { .. })
    }

    pub fn broadcast(&self) -> bool {
        !matches!(self, SubmitOutcome::Rejected(_))
    }

    pub fn identifier(&self) -> Option<H256> {
        match self {
            SubmitOutcome::Included { identifier, .. } => Some(*identifier),
            SubmitOutcome::Failed { identifier, .. } => *identifier,
            SubmitOutcome::Rejected(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&SubmitFailure> {
        match self {
            SubmitOutcome::Included { .. } => None,
            SubmitOutcome::Rejected(reason) | SubmitOutcome::Failed { reason, .. } => Some(reason),
        }
    }
}

/// Signed, ready-to-send transactions
struct SignedBundle {
    raw: Vec<Bytes>,
    hashes: Vec<H256>,
    head: u64,
}

pub struct BundleExecutor<S> {
    chain: Arc<dyn ChainClient>,
    relay: Option<Arc<dyn PrivateRelay>>,
    signer: S,
    config: ExecutorConfig,
}

impl<S: Signer> BundleExecutor<S> {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        relay: Option<Arc<dyn PrivateRelay>>,
        signer: S,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            chain,
            relay,
            signer,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn has_private_relay(&self) -> bool {
        self.relay.is_some()
    }

    pub async fn submit(&self, bundle: &Bundle) -> SubmitOutcome {
        let broadcast = AtomicBool::new(false);
        self.submit_tracked(bundle, &broadcast).await
    }

    /// Like [`submit`](Self::submit), setting `broadcast` the moment anything
    /// leaves the process, so a caller that abandons this future still knows
    /// whether gas may have been spent.
    pub async fn submit_tracked(&self, bundle: &Bundle, broadcast: &AtomicBool) -> SubmitOutcome {
        if let Err(e) = validate_bundle(bundle, self.config.max_calls) {
            warn!(bundle = %bundle.label, "🚫 invalid bundle: {}", e);
            return SubmitOutcome::Rejected(e.into());
        }

        let simulation = timeout(
            self.config.simulation_timeout(),
            simulate_bundle(self.chain.as_ref(), self.signer.address(), bundle),
        )
        .await;
        match simulation {
            Ok(Ok(report)) => {
                debug!(bundle = %bundle.label, calls = report.outputs.len(), "🧪 simulation passed");
            }
            Ok(Err(failure)) => {
                warn!(
                    bundle = %bundle.label,
                    index = failure.index(),
                    "🧪 simulation failed: {}", failure
                );
                return SubmitOutcome::Rejected(failure.into());
            }
            Err(_) => {
                warn!(bundle = %bundle.label, "🧪 simulation timed out");
                return SubmitOutcome::Rejected(SubmitFailure::SimulationTimeout(
                    self.config.simulation_timeout(),
                ));
            }
        }

        let private = match &self.relay {
            Some(relay) if relay.is_available().await => Some(relay.clone()),
            Some(relay) => {
                warn!(relay = relay.name(), "🔒 private relay unavailable");
                None
            }
            None => None,
        };
        if private.is_none() && !self.config.allow_public_fallback {
            return SubmitOutcome::Rejected(SubmitFailure::RelayUnavailable);
        }

        let signed = match self.sign(bundle).await {
            Ok(signed) => signed,
            Err(reason) => return SubmitOutcome::Rejected(reason),
        };
        let identifier = signed.hashes.last().copied();
        let max_block = signed.head + bundle.validity_blocks;

        let channel = match private {
            Some(relay) => {
                match relay
                    .submit(&signed.raw, signed.head + 1, max_block)
                    .await
                {
                    Ok(receipt) => {
                        broadcast.store(true, Ordering::SeqCst);
                        info!(
                            bundle = %bundle.label,
                            relay = relay.name(),
                            bundle_hash = ?receipt.bundle_hash,
                            target_block = receipt.target_block,
                            "🚀 bundle submitted privately"
                        );
                        SubmissionChannel::PrivateRelay
                    }
                    Err(RelayError::Rejected(message)) if self.config.allow_sequential_fallback => {
                        warn!(
                            bundle = %bundle.label,
                            "⚠️ relay rejected bundle ({}), submitting calls sequentially without atomicity",
                            message
                        );
                        if let Err(failure) = self
                            .broadcast_public(&signed, SubmissionChannel::Sequential, broadcast)
                            .await
                        {
                            return failure;
                        }
                        SubmissionChannel::Sequential
                    }
                    Err(RelayError::Rejected(message)) => {
                        return SubmitOutcome::Rejected(SubmitFailure::RelayRejected(message));
                    }
                    Err(RelayError::Unavailable(message)) => {
                        warn!(relay = relay.name(), "🔒 relay dropped before submission: {}", message);
                        return SubmitOutcome::Rejected(SubmitFailure::RelayUnavailable);
                    }
                    Err(RelayError::Transport(message)) => {
                        // Relay may have received the bundle
                        broadcast.store(true, Ordering::SeqCst);
                        return SubmitOutcome::Failed {
                            reason: SubmitFailure::Broadcast(message),
                            identifier,
                            channel: SubmissionChannel::PrivateRelay,
                            atomic: true,
                        };
                    }
                }
            }
            None => {
                warn!(bundle = %bundle.label, "📢 broadcasting publicly (explicit fallback)");
                if let Err(failure) = self
                    .broadcast_public(&signed, SubmissionChannel::PublicMempool, broadcast)
                    .await
                {
                    return failure;
                }
                SubmissionChannel::PublicMempool
            }
        };

        let atomic = match channel {
            SubmissionChannel::PrivateRelay => true,
            SubmissionChannel::PublicMempool | SubmissionChannel::Sequential => bundle.len() == 1,
        };
        self.confirm(&signed.hashes, max_block, channel, atomic).await
    }

    async fn sign(&self, bundle: &Bundle) -> Result<SignedBundle, SubmitFailure> {
        let from = self.signer.address();
        let (head, fee_data, nonce) = tokio::try_join!(
            self.chain.block_number(),
            self.chain.fee_data(),
            self.chain.nonce(from),
        )
        .map_err(|e| SubmitFailure::Preparation(e.to_string()))?;

        let gas_price = fee_data.effective_gas_price();
        let cap = self.config.max_gas_price_wei();
        if gas_price > cap {
            return Err(SubmitFailure::GasPriceTooHigh {
                price_gwei: (gas_price / U256::exp10(9)).low_u64(),
                cap_gwei: self.config.max_gas_price_gwei,
            });
        }

        let mut raw = Vec::with_capacity(bundle.len());
        let mut hashes = Vec::with_capacity(bundle.len());
        for (offset, call) in bundle.calls.iter().enumerate() {
            let request = call_request(from, call, call.payload.clone());
            let gas_limit = match call.gas_limit {
                Some(limit) => U256::from(limit),
                None => self.chain.estimate_gas(&request).await.unwrap_or_else(|e| {
                    debug!("gas estimate failed, using default: {}", e);
                    U256::from(self.config.default_gas_limit)
                }),
            };
            let gas_limit = gas_limit * U256::from(100 + self.config.gas_limit_buffer_pct) / U256::from(100);

            let mut tx = self.priced(request, &fee_data);
            tx.set_gas(gas_limit);
            tx.set_nonce(nonce + U256::from(offset));
            let chain_id = self.signer.chain_id();
            if chain_id != 0 {
                tx.set_chain_id(chain_id);
            }

            let signature = self
                .signer
                .sign_transaction(&tx)
                .await
                .map_err(|e| SubmitFailure::Signing(e.to_string()))?;
            hashes.push(tx.hash(&signature));
            raw.push(tx.rlp_signed(&signature));
        }

        Ok(SignedBundle { raw, hashes, head })
    }

    fn priced(&self, request: TypedTransaction, fee_data: &FeeData) -> TypedTransaction {
        match (self.config.use_eip1559, fee_data.max_fee_per_gas, fee_data.max_priority_fee_per_gas) {
            (true, Some(max_fee), Some(tip)) => {
                let mut eip1559 = Eip1559TransactionRequest::new()
                    .max_fee_per_gas(max_fee)
                    .max_priority_fee_per_gas(tip)
                    .value(request.value().copied().unwrap_or_default());
                if let Some(from) = request.from() {
                    eip1559 = eip1559.from(*from);
                }
                if let Some(to) = request.to() {
                    eip1559 = eip1559.to(to.clone());
                }
                if let Some(data) = request.data() {
                    eip1559 = eip1559.data(data.clone());
                }
                eip1559.into()
            }
            _ => {
                let mut legacy = request;
                legacy.set_gas_price(fee_data.gas_price);
                legacy
            }
        }
    }

    /// Send each signed transaction through the write handle, in order
    async fn broadcast_public(
        &self,
        signed: &SignedBundle,
        channel: SubmissionChannel,
        broadcast: &AtomicBool,
    ) -> Result<(), SubmitOutcome> {
        for (index, raw) in signed.raw.iter().enumerate() {
            match self.chain.send_raw_transaction(raw.clone()).await {
                Ok(hash) => {
                    broadcast.store(true, Ordering::SeqCst);
                    debug!(index, ?hash, "📤 transaction broadcast");
                }
                Err(e) => {
                    let reason = SubmitFailure::Broadcast(format!("call {index}: {e}"));
                    if broadcast.load(Ordering::SeqCst) {
                        return Err(SubmitOutcome::Failed {
                            reason,
                            identifier: signed.hashes.get(index.saturating_sub(1)).copied(),
                            channel,
                            atomic: false,
                        });
                    }
                    return Err(SubmitOutcome::Rejected(reason));
                }
            }
        }
        Ok(())
    }

    /// Poll receipts until all are in, one reverts, the validity window passes,
    /// or the confirmation timeout expires
    async fn confirm(
        &self,
        hashes: &[H256],
        max_block: u64,
        channel: SubmissionChannel,
        atomic: bool,
    ) -> SubmitOutcome {
        let identifier = hashes.last().copied();
        let failed = |reason| SubmitOutcome::Failed {
            reason,
            identifier,
            channel,
            atomic,
        };
        let deadline = Instant::now() + self.config.confirmation_timeout();
        let mut receipts = vec![None; hashes.len()];

        loop {
            for (slot, hash) in receipts.iter_mut().zip(hashes) {
                if slot.is_some() {
                    continue;
                }
                match self.chain.transaction_receipt(*hash).await {
                    Ok(Some(receipt)) => {
                        if receipt.status.map(|s| s.as_u64()) == Some(0) {
                            warn!(?hash, "❌ transaction reverted on-chain");
                            return failed(SubmitFailure::Reverted(*hash));
                        }
                        *slot = Some(receipt);
                    }
                    Ok(None) => {}
                    Err(e) => debug!(?hash, "receipt lookup failed: {}", e),
                }
            }

            if receipts.iter().all(Option::is_some) {
                let gas_used = receipts
                    .iter()
                    .flatten()
                    .filter_map(|r| r.gas_used)
                    .fold(U256::zero(), |acc, g| acc + g);
                let block = receipts
                    .iter()
                    .flatten()
                    .filter_map(|r| r.block_number)
                    .map(|b| b.as_u64())
                    .max()
                    .unwrap_or_default();
                let Some(identifier) = identifier else {
                    return failed(SubmitFailure::NotIncluded(max_block));
                };
                info!(?identifier, block, %channel, atomic, "✅ bundle included");
                return SubmitOutcome::Included {
                    identifier,
                    channel,
                    atomic,
                    gas_used,
                    block,
                };
            }

            if channel == SubmissionChannel::PrivateRelay && receipts.iter().all(Option::is_none) {
                if let Ok(head) = self.chain.block_number().await {
                    if head > max_block {
                        warn!(max_block, head, "⌛ bundle not included within validity window");
                        return failed(SubmitFailure::NotIncluded(max_block));
                    }
                }
            }

            if Instant::now() >= deadline {
                return failed(SubmitFailure::ConfirmationTimeout(self.config.confirmation_timeout()));
            }
            sleep(self.config.receipt_poll_interval()).await;
        }
    }
}
