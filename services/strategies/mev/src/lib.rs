//! # Cyclone MEV Library - Atomic Bundle Submission
//!
//! ## Purpose
//!
//! Turns an ordered call sequence into an all-or-nothing on-chain attempt: structural
//! validation, local simulation through read-only calls, signing, and submission through
//! a private relay that keeps the transactions out of the public pending pool.
//!
//! ## Integration Points
//!
//! - **Input Sources**: [`types::Bundle`] built by the flash arbitrage planner
//! - **Chain Access**: [`network::ChainClient`] for simulation, nonces, fees, receipts
//! - **Output Destinations**: private relay (`eth_sendBundle`); public mempool or
//!   per-call submission only when the caller explicitly opted in
//!
//! ## Architecture Role
//!
//! ```text
//! Bundle → [Validate] → [Simulate] → [Sign] → [Private Relay] → [Confirm]
//!              ↓             ↓                       ↓               ↓
//!          Rejected      Rejected           Sequential fallback   Included / Failed
//!        (no budget)   (no budget)            (non-atomic)        (budget consumed)
//! ```
//!
//! Anything returned as [`SubmitOutcome::Rejected`] never left the process; the
//! caller's attempt budget is charged only for the other outcomes.

pub mod bundle;
pub mod executor;
pub mod protection;
pub mod relay;
pub mod simulation;

pub use bundle::{validate_bundle, BundleBuilder, BundleError};
pub use executor::{BundleExecutor, ExecutorConfig, SubmissionChannel, SubmitFailure, SubmitOutcome};
pub use protection::{MevProtection, MevProtectionConfig};
pub use relay::{FlashbotsRelay, PrivateRelay, RelayError, RelayReceipt};
pub use simulation::{simulate_bundle, SimulationFailure, SimulationReport};
