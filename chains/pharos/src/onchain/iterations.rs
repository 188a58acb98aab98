//! Swap/liquidity iteration loop for one identity.

use super::TxError;
use crate::config::TimingConfig;
use anyhow::Result;
use core_logic::{
    classify_error, sleep_or_cancel, with_policy, Attempt, Outcome, ResultKind, RetryError,
    RetryPolicy, Task, TaskResult,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Swap,
    Liquidity,
}

/// Picks the next action so that liquidity additions stay interleaved with
/// swaps until either target is met. Counts move on success only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionPlanner {
    liquidity_target: u32,
    swap_target: u32,
    liquidity_done: u32,
    swap_done: u32,
}

impl ActionPlanner {
    pub fn new(liquidity_target: u32, swap_target: u32) -> Self {
        Self {
            liquidity_target,
            swap_target,
            liquidity_done: 0,
            swap_done: 0,
        }
    }

    /// Half of the iterations (rounded up) go to liquidity.
    pub fn balanced(iterations: u32) -> Self {
        let liquidity = iterations.div_ceil(2);
        Self::new(liquidity, iterations - liquidity)
    }

    pub fn swaps_only(iterations: u32) -> Self {
        Self::new(0, iterations)
    }

    pub fn liquidity_only(iterations: u32) -> Self {
        Self::new(iterations, 0)
    }

    pub fn next(&self) -> Action {
        if self.liquidity_done < self.liquidity_target
            && (self.liquidity_done < self.swap_done || self.swap_done >= self.swap_target)
        {
            Action::Liquidity
        } else {
            Action::Swap
        }
    }

    pub fn record_success(&mut self, action: Action) {
        match action {
            Action::Swap => self.swap_done += 1,
            Action::Liquidity => self.liquidity_done += 1,
        }
    }

    pub fn done(&self) -> (u32, u32) {
        (self.swap_done, self.liquidity_done)
    }

    /// Iterations the plan calls for.
    pub fn total(&self) -> u32 {
        self.liquidity_target + self.swap_target
    }
}

#[derive(Debug, Clone)]
pub struct IterationSettings {
    pub attempts_per_iteration: u32,
    pub policy: RetryPolicy,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
}

impl IterationSettings {
    /// Total attempts the loop may spend across `iterations`.
    pub fn attempt_budget(&self, iterations: u32) -> u32 {
        iterations.saturating_mul(self.attempts_per_iteration)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub completed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cooldown: u32,
    pub attempts_used: u32,
    pub cancelled: bool,
    pub budget_exhausted: bool,
}

impl IterationReport {
    pub fn setup_failed() -> Self {
        Self {
            failed: 1,
            ..Self::default()
        }
    }

    /// One line per identity per cycle: success if anything went through.
    /// Nothing is written when the run was cancelled before any iteration.
    pub fn result_kind(&self) -> Option<ResultKind> {
        if self.succeeded > 0 {
            Some(ResultKind::Success)
        } else if self.cancelled && self.completed == 0 {
            None
        } else {
            Some(ResultKind::Failure)
        }
    }
}

/// Maps a unit result onto the retry protocol. Anything that went wrong after
/// a transaction was accepted is final; other errors are classified by message.
pub fn classify_task_result(result: Result<TaskResult>) -> Attempt<Outcome> {
    match result {
        Ok(r) if r.success => Attempt::Done(Outcome::Success),
        Ok(r) => Attempt::Done(Outcome::PermanentFailure(r.message)),
        Err(e) if e.downcast_ref::<TxError>().is_some() => {
            Attempt::Done(Outcome::PermanentFailure(format!("{:#}", e)))
        }
        Err(e) => match classify_error(&e) {
            Some(class) => Attempt::Retry {
                class,
                reason: format!("{:#}", e),
            },
            None => Attempt::Done(Outcome::PermanentFailure(format!("{:#}", e))),
        },
    }
}

pub struct IterationRunner<Ctx> {
    settings: IterationSettings,
    after_success: Option<Arc<dyn Task<Ctx>>>,
}

impl<Ctx> IterationRunner<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
{
    pub fn new(settings: IterationSettings) -> Self {
        Self {
            settings,
            after_success: None,
        }
    }

    /// Runs `task` once after every successful iteration. Its result is only
    /// logged and never changes the report.
    pub fn with_after_success(mut self, task: Arc<dyn Task<Ctx>>) -> Self {
        self.after_success = Some(task);
        self
    }

    async fn run_after_success(&self, ctx: &Ctx, operation: &str) {
        let Some(task) = &self.after_success else {
            return;
        };
        match task.run(ctx.clone()).await {
            Ok(result) if result.success => {
                info!(
                    target: "task_result",
                    "{} {}: {}",
                    operation,
                    task.name(),
                    result.message
                );
            }
            Ok(result) => debug!("{} {}: {}", operation, task.name(), result.message),
            Err(e) => warn!("{} {} failed: {:#}", operation, task.name(), e),
        }
    }

    pub async fn run(
        &self,
        mut planner: ActionPlanner,
        swap: Arc<dyn Task<Ctx>>,
        liquidity: Arc<dyn Task<Ctx>>,
        ctx: Ctx,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> IterationReport {
        let settings = &self.settings;
        let iterations = planner.total();
        let budget = settings.attempt_budget(iterations);
        let mut report = IterationReport::default();

        for i in 0..iterations {
            if report.attempts_used >= budget {
                report.budget_exhausted = true;
                warn!(
                    target: "task_result",
                    "{} Attempt budget of {} used up after {} iterations",
                    prefix,
                    budget,
                    report.completed
                );
                break;
            }

            let action = planner.next();
            let task = match action {
                Action::Swap => swap.clone(),
                Action::Liquidity => liquidity.clone(),
            };
            let operation = format!("{} [{}/{}] {}", prefix, i + 1, iterations, task.name());
            let budget_left = budget - report.attempts_used;
            let mut used = 0u32;

            let result = with_policy(&settings.policy, &operation, cancel, |_attempt| {
                let exhausted = used >= budget_left;
                if !exhausted {
                    used += 1;
                }
                let task = task.clone();
                let ctx = ctx.clone();
                async move {
                    if exhausted {
                        return Attempt::Done(Outcome::PermanentFailure(
                            "attempt budget exhausted".to_string(),
                        ));
                    }
                    classify_task_result(task.run(ctx).await)
                }
            })
            .await;
            report.attempts_used += used;

            match result {
                Ok(Outcome::Success) => {
                    report.succeeded += 1;
                    planner.record_success(action);
                    info!(target: "task_result", "{} SUCCESS", operation);
                    self.run_after_success(&ctx, &operation).await;
                }
                Ok(Outcome::Cooldown(until)) => {
                    report.cooldown += 1;
                    info!(target: "task_result", "{} COOLDOWN until {}", operation, until);
                }
                Ok(Outcome::PermanentFailure(reason)) | Ok(Outcome::TransientFailure(reason)) => {
                    report.failed += 1;
                    warn!(target: "task_result", "{} FAILED: {}", operation, reason);
                }
                Err(RetryError::Exhausted { last_error, .. }) => {
                    report.failed += 1;
                    warn!(target: "task_result", "{} FAILED: {}", operation, last_error);
                }
                Err(RetryError::Cancelled { .. }) => {
                    report.cancelled = true;
                    break;
                }
            }
            report.completed += 1;

            if i + 1 < iterations {
                let delay = TimingConfig::pick(settings.delay_min_ms, settings.delay_max_ms);
                if !sleep_or_cancel(delay, cancel).await {
                    report.cancelled = true;
                    break;
                }
            }
        }

        let (swaps, adds) = planner.done();
        info!(
            target: "task_result",
            "{} On-chain done: {} swaps, {} liquidity adds, {} failed",
            prefix,
            swaps,
            adds,
            report.failed
        );
        report
    }
}
