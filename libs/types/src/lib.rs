//! # Cyclone Types Library
//!
//! Domain types shared by every Cyclone crate: the assets and cyclic paths the sizing
//! engine walks, the quotes and reserve snapshots it reads, the flash-loan lenders it
//! borrows from, and the budgets and bundles the controller and executor exchange.
//!
//! ## Design Philosophy
//!
//! - **No Floating Point**: USD values and token amounts are `rust_decimal::Decimal`;
//!   lender fees are exact rationals ([`FeeRate`])
//! - **Validated Construction**: [`AssetPath`] refuses short or repeating cycles at the
//!   boundary so downstream code never re-checks
//! - **Freshness Is Part Of The Type**: [`PriceQuote`] and [`PoolReserves`] carry their
//!   observation instant; a stale quote is treated as absent, never as usable-but-old
//! - **Plain Values**: nothing here performs I/O
//!
//! ## Integration Points
//!
//! - **amm**: consumes reserve snapshots for impact maths
//! - **network**: none (chain primitives come from `ethers-core`)
//! - **mev**: consumes [`Bundle`] / [`CallDescriptor`]
//! - **flash-arbitrage-strategy**: produces [`SizedOpportunity`], owns [`AttemptBudget`]
//!   and [`ExecutionState`]

pub mod asset;
pub mod budget;
pub mod bundle;
pub mod errors;
pub mod lender;
pub mod market;
pub mod opportunity;

pub use asset::{Asset, AssetPair, AssetPath};
pub use budget::AttemptBudget;
pub use bundle::{Bundle, CallDescriptor};
pub use errors::TypesError;
pub use lender::{FeeRate, FlashloanProvider, LenderKind};
pub use market::{PoolReserves, PriceQuote, DEFAULT_QUOTE_TTL};
pub use opportunity::{ExecutionState, ModeParams, OperatingMode, SizedOpportunity};

/// Chain primitives re-exported so downstream crates agree on one version
pub use ethers_core::types::{Address, Bytes, H256, U256};
pub use rust_decimal::Decimal;
