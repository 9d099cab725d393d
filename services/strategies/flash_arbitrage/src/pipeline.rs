//! Live pipeline: scan the path universe, plan the winner, hand it to the executor

use crate::controller::{Pipeline, PlannedAttempt};
use crate::journal::{PipelineJournal, PipelineRecord};
use crate::lenders::LenderCatalog;
use crate::paths::PathUniverse;
use crate::planner::BundlePlanner;
use crate::sizing::{OpportunitySizer, ScanReport};
use crate::{log_error, log_profit, log_search};
use async_trait::async_trait;
use ethers::signers::Signer;
use mev::{BundleExecutor, SubmitOutcome};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;
use types::ModeParams;

pub struct StrategyPipeline<S> {
    sizer: OpportunitySizer,
    planner: BundlePlanner,
    executor: BundleExecutor<S>,
    lenders: Arc<LenderCatalog>,
    universe: PathUniverse,
    journal: Arc<PipelineJournal>,
}

impl<S: Signer> StrategyPipeline<S> {
    pub fn new(
        sizer: OpportunitySizer,
        planner: BundlePlanner,
        executor: BundleExecutor<S>,
        lenders: Arc<LenderCatalog>,
        universe: PathUniverse,
        journal: Arc<PipelineJournal>,
    ) -> Self {
        Self {
            sizer,
            planner,
            executor,
            lenders,
            universe,
            journal,
        }
    }

    pub fn universe(&self) -> &PathUniverse {
        &self.universe
    }

    /// One full pass over the universe, journaled
    pub async fn scan(&self, params: &ModeParams) -> ScanReport {
        debug!("Scanning {} paths in {} mode", self.universe.len(), params.mode);
        let report = self.sizer.scan(self.universe.paths(), params).await;

        match &report.best {
            Some(best) => {
                log_profit!(
                    "{} via {}: ${} notional, net ${:.2} (gas ${:.2}, fee ${:.2})",
                    best.path,
                    best.provider,
                    best.notional_usd,
                    best.net_profit_usd,
                    best.gas_cost_usd,
                    best.lender_fee_usd
                );
                self.journal.record(PipelineRecord::OpportunityFound {
                    path: best.path.to_string(),
                    provider: best.provider.clone(),
                    mode: best.mode.to_string(),
                    notional_usd: best.notional_usd.to_string(),
                    net_profit_usd: best.net_profit_usd.to_string(),
                    gas_cost_usd: best.gas_cost_usd.to_string(),
                });
            }
            None => {
                log_search!(
                    "No opportunity across {} paths ({:?})",
                    report.evaluated,
                    report.rejections
                );
                self.journal.record(PipelineRecord::OpportunitySkipped {
                    paths: report.evaluated,
                    rejections: report
                        .rejections
                        .iter()
                        .map(|(kind, count)| (kind.to_string(), *count))
                        .collect(),
                });
            }
        }
        report
    }
}

#[async_trait]
impl<S: Signer + 'static> Pipeline for StrategyPipeline<S> {
    async fn evaluate(&self, params: &ModeParams) -> Option<PlannedAttempt> {
        let opportunity = self.scan(params).await.best?;
        match self.planner.plan(&opportunity, self.lenders.providers()) {
            Ok(bundle) => Some(PlannedAttempt { opportunity, bundle }),
            Err(e) => {
                log_error!("Failed to plan {}: {}", opportunity.path, e);
                None
            }
        }
    }

    async fn submit(&self, attempt: &PlannedAttempt, broadcast: &AtomicBool) -> SubmitOutcome {
        self.executor.submit_tracked(&attempt.bundle, broadcast).await
    }
}
