//! # Flash Arbitrage Strategy - Cyclic Flash-Loan Arbitrage Daemon
//!
//! ## Purpose
//!
//! Finds closed trading cycles (A→B→C→A) on a single V2-style exchange whose round trip
//! returns more of the starting asset than went in, borrows the starting amount through
//! a flash loan, and executes borrow, swaps and repayment as one atomic bundle. Nothing
//! is submitted unless the sized net profit clears the active mode's thresholds, and at
//! most one attempt is ever in flight.
//!
//! ## Integration Points
//!
//! - **Input Sources**: new heads and large pending transactions over websocket, pool
//!   reserve divergence polling, idle timeout
//! - **Market Data**: router `getAmountsOut` for cycle simulation, pair reserves for
//!   price impact, a median of price oracles for USD valuation
//! - **Flash Loan Providers**: configured lenders with live or fixed fees
//! - **Output Destinations**: private relay bundles through [`mev::BundleExecutor`];
//!   a JSON-lines pipeline journal
//!
//! ## Architecture Role
//!
//! ```text
//! Triggers ──→ [Controller] ──→ [Sizer] ──→ [Planner] ──→ [Executor]
//!                  │              │  ↑           │            │
//!             budget, mode    density, ladder  executeCycle  simulate, relay
//!                  │           impact, gas       bundle        confirm
//!                  └──────────── outcome: budget + mode bookkeeping ←──┘
//! ```
//!
//! ## Modules
//!
//! - [`paths`]: cycle enumeration over the asset universe
//! - [`market`], [`oracle`]: on-chain simulation, reserves and USD prices
//! - [`lenders`], [`gas`]: fee and gas cost inputs to sizing
//! - [`sizing`]: density prefilter, notional ladder, threshold checks
//! - [`planner`]: opportunity → atomic bundle
//! - [`controller`], [`mode`]: single-flight state machine, budget, EXTREME/NORMAL
//! - [`events`], [`health`]: trigger sources and liveness
//! - [`journal`], [`metrics`], [`logging`]: observability

pub mod config;
pub mod controller;
pub mod events;
pub mod gas;
pub mod health;
pub mod journal;
pub mod lenders;
pub mod logging;
pub mod market;
pub mod metrics;
pub mod mode;
pub mod oracle;
pub mod paths;
pub mod pipeline;
pub mod planner;
pub mod sizing;

pub use config::FlashArbitrageConfig;
pub use controller::{AttemptOutcome, Controller, ControllerConfig, ControllerReport, Pipeline, PlannedAttempt};
pub use events::{ChainEventSource, DivergenceMonitor, DivergencePoll, EventSourceConfig, Trigger, TriggerSource};
pub use gas::{FeeDataGasEstimator, GasEstimate, GasEstimator, GasModelConfig};
pub use health::{HealthChecker, HealthProbe, HealthReport};
pub use journal::{PipelineJournal, PipelineRecord};
pub use lenders::{AavePremiumSource, FeeSource, LenderCatalog};
pub use market::{MarketError, MarketView, OnChainMarket};
pub use metrics::{MetricsSnapshot, StrategyMetrics};
pub use mode::{ExtremeModeConfig, ModeController, ModeSet, SwitchReason};
pub use oracle::{CachedOracle, MedianQuoteAggregator, OracleConfig, PriceOracle, RouterPriceOracle};
pub use paths::{generate_paths, PathUniverse};
pub use pipeline::StrategyPipeline;
pub use planner::{BundlePlanner, PlannerConfig};
pub use sizing::{OpportunitySizer, ScanReport, SizingConfig, SizingRejection};
