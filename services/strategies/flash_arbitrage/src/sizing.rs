//! # Opportunity Sizing Engine - Capped Ladder Over Cyclic Paths
//!
//! ## Purpose
//!
//! Decides whether a cyclic path is worth a flash loan and, if so, how much to
//! borrow and from whom. The engine is parameterised by [`ModeParams`] and knows
//! nothing about which operating mode is active.
//!
//! ## Evaluation Pipeline
//!
//! ```text
//! Path → [Density Prefilter] → [Reserves] → per lender: [Ladder] → per rung:
//!           ($100 probe)          min USD       capped       [Impact] → [Simulate]
//!                                                               → [Gas, Fee] → [Thresholds]
//!                                                                          ↓
//!                                              best net across lenders and rungs
//! ```
//!
//! A failed quote, simulation or gas read disqualifies only the candidate it
//! belongs to. Nothing here returns an error to the caller: every way a path can
//! fail is a [`SizingRejection`].
//!
//! `scan` evaluates up to `scan_concurrency` paths at once. Completion order does
//! not affect the result: ties on net profit go to the path listed first.

use crate::gas::GasEstimator;
use crate::lenders::LenderCatalog;
use crate::market::MarketView;
use amm::{reserve_impact, LadderConfig};
use futures::stream::{self, StreamExt};
use mev::MevProtection;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use types::{AssetPath, ModeParams, SizedOpportunity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub ladder: LadderConfig,
    /// Probe size for the density prefilter
    pub reference_notional_usd: Decimal,
    /// Gross USD per $1,000 notional below which a path is dropped unevaluated
    pub min_density_per_1000: Decimal,
    /// 3 for triangles only, 4 to include four-asset cycles
    pub max_hops: usize,
    /// Paths evaluated concurrently during a scan
    pub scan_concurrency: usize,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            ladder: LadderConfig::default(),
            reference_notional_usd: dec!(100),
            min_density_per_1000: dec!(0.60),
            max_hops: 3,
            scan_concurrency: 8,
        }
    }
}

/// Why a path produced no opportunity
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingRejection {
    #[error("no lender supports the base asset")]
    NoLender,

    #[error("price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("density {density_per_1000} per $1000 below minimum")]
    BelowDensity { density_per_1000: Decimal },

    #[error("reserves unavailable: {0}")]
    ReservesUnavailable(String),

    #[error("notional cap leaves no candidate sizes")]
    NoCandidates,

    #[error("price impact {impact} above ceiling")]
    ImpactTooHigh { impact: Decimal },

    #[error("gas unavailable: {0}")]
    GasUnavailable(String),

    #[error("no candidate cleared thresholds (best net {best_net_usd:?})")]
    BelowThresholds { best_net_usd: Option<Decimal> },
}

impl SizingRejection {
    pub fn kind(&self) -> &'static str {
        match self {
            SizingRejection::NoLender => "no_lender",
            SizingRejection::PriceUnavailable(_) => "price_unavailable",
            SizingRejection::BelowDensity { .. } => "below_density",
            SizingRejection::ReservesUnavailable(_) => "reserves_unavailable",
            SizingRejection::NoCandidates => "no_candidates",
            SizingRejection::ImpactTooHigh { .. } => "impact_too_high",
            SizingRejection::GasUnavailable(_) => "gas_unavailable",
            SizingRejection::BelowThresholds { .. } => "below_thresholds",
        }
    }
}

/// `net ≥ min_profit`, `net ≥ gas × ratio`, `gas ≤ max_gas`
pub fn clears_thresholds(net_usd: Decimal, gas_usd: Decimal, params: &ModeParams) -> bool {
    net_usd >= params.min_profit_usd
        && net_usd >= gas_usd * params.profit_to_gas_ratio
        && gas_usd <= params.max_gas_usd
}

/// Outcome of evaluating a whole path set
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub best: Option<SizedOpportunity>,
    pub evaluated: usize,
    /// Rejection counts by [`SizingRejection::kind`]
    pub rejections: BTreeMap<&'static str, usize>,
}

pub struct OpportunitySizer {
    market: Arc<dyn MarketView>,
    lenders: Arc<LenderCatalog>,
    gas: Arc<dyn GasEstimator>,
    protection: MevProtection,
    config: SizingConfig,
}

impl OpportunitySizer {
    pub fn new(
        market: Arc<dyn MarketView>,
        lenders: Arc<LenderCatalog>,
        gas: Arc<dyn GasEstimator>,
        protection: MevProtection,
        config: SizingConfig,
    ) -> Self {
        Self {
            market,
            lenders,
            gas,
            protection,
            config,
        }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Best sized opportunity on `path` under `params`
    pub async fn evaluate(&self, path: &AssetPath, params: &ModeParams) -> Result<SizedOpportunity, SizingRejection> {
        let base = path.base();
        let lenders: Vec<_> = self.lenders.lenders_for(base).collect();
        if lenders.is_empty() {
            return Err(SizingRejection::NoLender);
        }

        let base_usd = self
            .market
            .usd_price(base)
            .await
            .map_err(|e| SizingRejection::PriceUnavailable(e.to_string()))?;
        if base_usd <= Decimal::ZERO {
            return Err(SizingRejection::PriceUnavailable(format!("{} priced at {}", base, base_usd)));
        }

        self.prefilter(path, base_usd).await?;

        let min_reserve_usd = self.min_reserve_usd(path).await?;
        let slippage = self.protection.effective_slippage(params.slippage_tolerance);

        let mut best: Option<SizedOpportunity> = None;
        let mut best_failing_net: Option<Decimal> = None;
        let mut lowest_rejected_impact: Option<Decimal> = None;
        let mut gas_failure: Option<String> = None;
        let mut any_candidate = false;

        for lender in lenders {
            let Some(max_loan) = lender.max_loan_for(base) else {
                continue;
            };
            let candidates = self.config.ladder.candidates(max_loan, min_reserve_usd);
            if candidates.is_empty() {
                continue;
            }
            any_candidate = true;

            let gas = match self.gas.estimate(path, lender).await {
                Ok(gas) => gas,
                Err(e) => {
                    debug!("{} via {}: gas estimate failed: {}", path, lender.name, e);
                    gas_failure = Some(e.to_string());
                    continue;
                }
            };
            let fee = self.lenders.effective_fee(lender).await;

            for notional in candidates {
                let impact = match reserve_impact(notional, min_reserve_usd) {
                    Ok(impact) => impact,
                    Err(e) => {
                        debug!("{} at ${}: {}", path, notional, e);
                        continue;
                    }
                };
                if impact > params.max_price_impact {
                    lowest_rejected_impact = Some(lowest_rejected_impact.map_or(impact, |i| i.min(impact)));
                    continue;
                }

                let amount_in = notional / base_usd;
                let expected_output = match self.market.simulate_cycle(path, amount_in).await {
                    Ok(out) => out,
                    Err(e) => {
                        debug!("{} at ${}: simulation failed: {}", path, notional, e);
                        continue;
                    }
                };

                let gross_profit_usd = (expected_output - amount_in) * base_usd;
                let lender_fee_usd = fee.apply(notional);
                let net_profit_usd = gross_profit_usd - gas.cost_usd - lender_fee_usd;

                if !clears_thresholds(net_profit_usd, gas.cost_usd, params) {
                    best_failing_net = Some(best_failing_net.map_or(net_profit_usd, |n| n.max(net_profit_usd)));
                    continue;
                }
                if best.as_ref().is_some_and(|b| b.net_profit_usd >= net_profit_usd) {
                    continue;
                }

                best = Some(SizedOpportunity {
                    path: path.clone(),
                    provider: lender.name.clone(),
                    mode: params.mode,
                    notional_usd: notional,
                    amount_in,
                    expected_output,
                    min_output: self
                        .protection
                        .calculate_protected_min_output(expected_output, slippage),
                    gross_profit_usd,
                    gas_cost_usd: gas.cost_usd,
                    lender_fee_usd,
                    net_profit_usd,
                    price_impact: impact,
                    slippage_tolerance: slippage,
                });
            }
        }

        if let Some(best) = best {
            return Ok(best);
        }
        Err(if best_failing_net.is_some() {
            SizingRejection::BelowThresholds {
                best_net_usd: best_failing_net,
            }
        } else if let Some(impact) = lowest_rejected_impact {
            SizingRejection::ImpactTooHigh { impact }
        } else if let Some(reason) = gas_failure {
            SizingRejection::GasUnavailable(reason)
        } else if !any_candidate {
            SizingRejection::NoCandidates
        } else {
            SizingRejection::BelowThresholds { best_net_usd: None }
        })
    }

    /// Evaluate every path; the highest net wins, earlier paths win ties
    pub async fn scan(&self, paths: &[AssetPath], params: &ModeParams) -> ScanReport {
        let pending: Vec<_> = paths
            .iter()
            .enumerate()
            .map(|(index, path)| async move { (index, path, self.evaluate(path, params).await) })
            .collect();
        let mut evaluations = stream::iter(pending).buffer_unordered(self.config.scan_concurrency.max(1));

        let mut report = ScanReport::default();
        let mut best_index = usize::MAX;
        while let Some((index, path, result)) = evaluations.next().await {
            report.evaluated += 1;
            match result {
                Ok(found) => {
                    let better = report.best.as_ref().map_or(true, |b| {
                        found.net_profit_usd > b.net_profit_usd
                            || (found.net_profit_usd == b.net_profit_usd && index < best_index)
                    });
                    if better {
                        best_index = index;
                        report.best = Some(found);
                    }
                }
                Err(rejection) => {
                    debug!("{} rejected: {}", path, rejection);
                    *report.rejections.entry(rejection.kind()).or_default() += 1;
                }
            }
        }
        report
    }

    async fn prefilter(&self, path: &AssetPath, base_usd: Decimal) -> Result<(), SizingRejection> {
        let reference = self.config.reference_notional_usd;
        let reference_in = reference / base_usd;
        let reference_out = self
            .market
            .simulate_cycle(path, reference_in)
            .await
            .map_err(|e| SizingRejection::PriceUnavailable(e.to_string()))?;

        let gross_usd = (reference_out - reference_in) * base_usd;
        let density_per_1000 = gross_usd / reference * dec!(1000);
        if density_per_1000 < self.config.min_density_per_1000 {
            return Err(SizingRejection::BelowDensity { density_per_1000 });
        }
        Ok(())
    }

    /// Thinnest pool side on the path, in USD
    async fn min_reserve_usd(&self, path: &AssetPath) -> Result<Decimal, SizingRejection> {
        let reserves = self
            .market
            .path_reserves(path)
            .await
            .map_err(|e| SizingRejection::ReservesUnavailable(e.to_string()))?;

        let mut prices = BTreeMap::new();
        for asset in path.assets() {
            let price = self
                .market
                .usd_price(asset)
                .await
                .map_err(|e| SizingRejection::PriceUnavailable(e.to_string()))?;
            prices.insert(asset.address, price);
        }

        reserves
            .iter()
            .filter_map(|pool| {
                let pa = prices.get(&pool.pair.base.address)?;
                let pb = prices.get(&pool.pair.quote.address)?;
                Some(pool.min_side_usd(*pa, *pb))
            })
            .min()
            .filter(|r| *r > Decimal::ZERO)
            .ok_or_else(|| SizingRejection::ReservesUnavailable(format!("no usable reserves on {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_inclusive() {
        let params = ModeParams {
            min_profit_usd: dec!(5),
            profit_to_gas_ratio: dec!(8),
            max_gas_usd: dec!(1),
            ..ModeParams::extreme()
        };
        // 0.625 × 8 = 5 exactly
        assert!(clears_thresholds(dec!(5), dec!(0.625), &params));
        assert!(!clears_thresholds(dec!(5), dec!(0.63), &params));
        assert!(!clears_thresholds(dec!(4.99), dec!(0.10), &params));
        assert!(!clears_thresholds(dec!(100), dec!(1.01), &params));
    }

    #[test]
    fn test_rejection_kinds_are_stable() {
        assert_eq!(SizingRejection::NoLender.kind(), "no_lender");
        assert_eq!(
            SizingRejection::BelowThresholds { best_net_usd: None }.kind(),
            "below_thresholds"
        );
    }
}
