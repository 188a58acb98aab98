//! Fans identities out to concurrent workflows and owns every result-log
//! write, so each identity gets at most one line per log per cycle.

use crate::faucet::{FaucetContext, FaucetReport, FaucetState, FaucetWorkflow};
use crate::identity::Identity;
use crate::onchain::iterations::{ActionPlanner, IterationReport};
use crate::onchain::OnchainRunner;
use core_logic::{
    sleep_or_cancel, OperationClass, Outcome, ProxyAssignment, ResultKind, ResultLog, RunStats,
    WorkerRunner,
};
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

/// Which on-chain actions a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Mixed(u32),
    SwapsOnly(u32),
    LiquidityOnly(u32),
}

impl Plan {
    pub fn planner(&self) -> ActionPlanner {
        match *self {
            Plan::Mixed(n) => ActionPlanner::balanced(n),
            Plan::SwapsOnly(n) => ActionPlanner::swaps_only(n),
            Plan::LiquidityOnly(n) => ActionPlanner::liquidity_only(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Daily faucet claim only.
    Faucet,
    /// Faucet, then mixed swaps and liquidity, over several cycles.
    Daily { iterations: u32 },
    /// Mixed swaps and liquidity without the faucet, over several cycles.
    Full { iterations: u32 },
    Swap { iterations: u32 },
    Liquidity { iterations: u32 },
}

impl RunMode {
    fn with_faucet(&self) -> bool {
        matches!(self, RunMode::Faucet | RunMode::Daily { .. })
    }

    fn plan(&self) -> Option<Plan> {
        match *self {
            RunMode::Faucet => None,
            RunMode::Daily { iterations } | RunMode::Full { iterations } => {
                Some(Plan::Mixed(iterations))
            }
            RunMode::Swap { iterations } => Some(Plan::SwapsOnly(iterations)),
            RunMode::Liquidity { iterations } => Some(Plan::LiquidityOnly(iterations)),
        }
    }

    fn repeats(&self) -> bool {
        matches!(self, RunMode::Daily { .. } | RunMode::Full { .. })
    }
}

pub struct IdentityReport {
    pub index: usize,
    pub address: String,
    log_entry: String,
    pub faucet: Option<FaucetReport>,
    pub onchain: Option<IterationReport>,
    pub cancelled: bool,
}

impl fmt::Debug for IdentityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityReport")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("faucet", &self.faucet)
            .field("onchain", &self.onchain)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub faucet: RunStats,
    pub onchain: RunStats,
    pub cycles: u32,
}

impl RunSummary {
    fn merge(&mut self, other: &RunSummary) {
        self.faucet.merge(&other.faucet);
        self.onchain.merge(&other.onchain);
        self.cycles += other.cycles;
    }
}

/// Cheap to clone; every worker gets its own handle.
#[derive(Clone)]
pub struct WalletTaskScheduler {
    faucet: FaucetContext,
    onchain: Arc<dyn OnchainRunner>,
    proxies: Arc<ProxyAssignment>,
    faucet_log: ResultLog,
    onchain_log: ResultLog,
    cancel: CancellationToken,
}

impl WalletTaskScheduler {
    pub fn new(
        faucet: FaucetContext,
        onchain: Arc<dyn OnchainRunner>,
        proxies: ProxyAssignment,
        cancel: CancellationToken,
    ) -> Self {
        let files = &faucet.config.files;
        let faucet_log = ResultLog::new(&files.faucet_success_log, &files.faucet_failure_log);
        let onchain_log = ResultLog::new(&files.onchain_success_log, &files.onchain_failure_log);
        Self {
            faucet,
            onchain,
            proxies: Arc::new(proxies),
            faucet_log,
            onchain_log,
            cancel,
        }
    }

    pub fn faucet_log(&self) -> &ResultLog {
        &self.faucet_log
    }

    pub fn onchain_log(&self) -> &ResultLog {
        &self.onchain_log
    }

    /// Runs `mode` over all identities. Repeating modes draw their cycle count
    /// from the timing config and reshuffle dispatch order each cycle.
    pub async fn run(&self, identities: Vec<Identity>, mode: RunMode) -> RunSummary {
        let identities = Arc::new(identities);
        let cycles = if mode.repeats() {
            self.faucet.config.timing.cycles()
        } else {
            1
        };
        let started = Instant::now();
        let mut summary = RunSummary::default();

        info!(
            target: "task_result",
            "Starting {:?} for {} wallets ({} cycle(s), {} proxies)",
            mode,
            identities.len(),
            cycles,
            self.proxies.len()
        );

        for cycle in 0..cycles {
            if self.cancel.is_cancelled() {
                break;
            }
            if cycles > 1 {
                info!(target: "task_result", "=== Cycle {}/{} ===", cycle + 1, cycles);
            }
            let cycle_summary = self.run_cycle(&identities, mode).await;
            summary.merge(&cycle_summary);
        }

        let elapsed = started.elapsed();
        if mode.with_faucet() {
            WorkerRunner::log_summary("Faucet", &summary.faucet, elapsed);
        }
        if mode.plan().is_some() {
            WorkerRunner::log_summary("On-chain", &summary.onchain, elapsed);
        }
        summary
    }

    /// One pass over every identity. Proxies stay bound to load position
    /// whatever the dispatch order.
    pub async fn run_cycle(&self, identities: &Arc<Vec<Identity>>, mode: RunMode) -> RunSummary {
        let mut order: Vec<usize> = (0..identities.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        let mut set = JoinSet::new();
        for (position, index) in order.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            if position > 0 && mode.plan().is_some() {
                let delay = self.faucet.config.timing.dispatch_delay();
                if !sleep_or_cancel(delay, &self.cancel).await {
                    break;
                }
            }

            let this = self.clone();
            let identities = Arc::clone(identities);
            let span = tracing::info_span!(
                "wallet",
                index = index + 1,
                proxy = %self.proxies.label_for_index(index)
            );
            set.spawn(
                async move { this.run_identity(&identities[index], index, mode).await }
                    .instrument(span),
            );
        }

        let mut summary = RunSummary {
            cycles: 1,
            ..RunSummary::default()
        };
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => self.record(&report, mode, &mut summary).await,
                Err(e) => error!("Wallet worker aborted: {}", e),
            }
        }
        summary
    }

    async fn run_identity(&self, identity: &Identity, index: usize, mode: RunMode) -> IdentityReport {
        let mut report = IdentityReport {
            index,
            address: identity.address().to_string(),
            log_entry: identity.log_entry(self.faucet.config.log_private_keys),
            faucet: None,
            onchain: None,
            cancelled: false,
        };

        let _workflow_permit = match self
            .faucet
            .limiter
            .acquire_or_cancel(OperationClass::Workflow, &self.cancel)
            .await
        {
            Some(permit) => permit,
            None => {
                report.cancelled = true;
                return report;
            }
        };
        let proxy = self.proxies.for_index(index);

        if mode.with_faucet() {
            let faucet = FaucetWorkflow::new(self.faucet.clone())
                .run(identity, index, proxy, &self.cancel)
                .await;
            report.cancelled = faucet.state == FaucetState::Cancelled;
            report.faucet = Some(faucet);
        }

        if let Some(plan) = mode.plan() {
            let allowed = report.faucet.as_ref().map_or(true, FaucetReport::allows_onchain);
            if report.cancelled || self.cancel.is_cancelled() {
                report.cancelled = true;
            } else if !allowed {
                info!(
                    target: "task_result",
                    "[{:03}][{}] Skipping on-chain work after faucet failure",
                    index + 1,
                    identity.short()
                );
            } else {
                let onchain = self
                    .onchain
                    .run(identity, index, proxy, plan.planner(), &self.cancel)
                    .await;
                report.cancelled = onchain.cancelled;
                report.onchain = Some(onchain);
            }
        }

        report
    }

    async fn record(&self, report: &IdentityReport, mode: RunMode, summary: &mut RunSummary) {
        if let Some(faucet) = &report.faucet {
            match &faucet.state {
                FaucetState::Done(Outcome::Success) => summary.faucet.success += 1,
                FaucetState::Done(Outcome::Cooldown(_)) | FaucetState::SkippedCooldown(_) => {
                    summary.faucet.cooldown += 1
                }
                FaucetState::Done(_) => summary.faucet.failed += 1,
                FaucetState::AuthFailed(_) => summary.faucet.auth_failed += 1,
                FaucetState::Cancelled => summary.faucet.cancelled += 1,
            }
            if let Some(kind) = faucet.state.result_kind() {
                self.write_line(&self.faucet_log, kind, &report.log_entry).await;
            }
        }

        if let Some(onchain) = &report.onchain {
            let kind = onchain.result_kind();
            match kind {
                Some(ResultKind::Success) => summary.onchain.success += 1,
                Some(ResultKind::Failure) => summary.onchain.failed += 1,
                None => summary.onchain.cancelled += 1,
            }
            if let Some(kind) = kind {
                self.write_line(&self.onchain_log, kind, &report.log_entry).await;
            }
        }

        // Cancelled while waiting for a workflow slot.
        if report.cancelled && report.faucet.is_none() && report.onchain.is_none() {
            if mode.with_faucet() {
                summary.faucet.cancelled += 1;
            } else {
                summary.onchain.cancelled += 1;
            }
        }
    }

    async fn write_line(&self, log: &ResultLog, kind: ResultKind, entry: &str) {
        if let Err(e) = log.append(kind, entry).await {
            warn!(
                "Failed to append result line to {}: {}",
                log.path(kind).display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_shapes() {
        assert!(RunMode::Faucet.with_faucet());
        assert!(RunMode::Faucet.plan().is_none());
        assert!(RunMode::Daily { iterations: 3 }.with_faucet());
        assert_eq!(
            RunMode::Full { iterations: 3 }.plan(),
            Some(Plan::Mixed(3))
        );
        assert!(!RunMode::Swap { iterations: 1 }.with_faucet());
        assert!(!RunMode::Swap { iterations: 1 }.repeats());
        assert!(RunMode::Full { iterations: 1 }.repeats());
    }

    #[test]
    fn test_plan_planner() {
        assert_eq!(
            Plan::LiquidityOnly(4).planner(),
            ActionPlanner::liquidity_only(4)
        );
        assert_eq!(Plan::Mixed(4).planner(), ActionPlanner::balanced(4));
    }
}
