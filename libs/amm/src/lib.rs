//! # Cyclone AMM Library - Sizing Mathematics
//!
//! ## Purpose
//!
//! Mathematical core for cyclic arbitrage sizing: reserve-relative price impact and
//! the capped notional ladder the sizing engine walks. Every value is a `Decimal`;
//! nothing here touches floating point.
//!
//! ## Integration Points
//!
//! - **Input Sources**: USD notionals, lender caps, thinnest reserve on a path
//! - **Output Destinations**: Opportunity sizing engine
//! - **Protocol Support**: Uniswap V2 forks (PancakeSwap, BiSwap, SushiSwap)
//!
//! ## Architecture Role
//!
//! ```text
//! Lender Max Loan  ┐
//! Min Reserve USD  ┴→ [LadderConfig] → Candidate Notionals ┐
//!                                                          ├→ Sizing Engine
//! Candidate + Min Reserve → [reserve_impact] → x / (R + x) ┘
//! ```
//!
//! ## Performance Profile
//!
//! - **Ladder Generation**: O(rungs), allocation-light
//! - **Precision**: 28 significant digits, no rounding until display

pub mod impact;
pub mod ladder;

pub use impact::reserve_impact;
pub use ladder::{LadderConfig, MAX_RESERVE_CAP_FRACTION};

/// Common types for AMM calculations
pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;
