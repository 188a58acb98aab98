//! # Core Logic - Concurrency Limiting
//!
//! Named counting gates, one per class of remote operation. A permit is held
//! for the duration of the guarded work and released on drop, whatever path
//! the holder takes out of its scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Class of remote operation guarded by its own gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    Login,
    Claim,
    /// Whole per-identity workflow; capacity is the user-chosen thread count.
    Workflow,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationClass::Login => "login",
            OperationClass::Claim => "claim",
            OperationClass::Workflow => "workflow",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub login: usize,
    pub claim: usize,
    pub workflow: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            login: 2,
            claim: 2,
            workflow: 2,
        }
    }
}

/// Shared registry of per-class semaphores. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    gates: Arc<HashMap<OperationClass, Arc<Semaphore>>>,
    capacities: Arc<HashMap<OperationClass, usize>>,
}

impl ConcurrencyLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        let capacities: HashMap<OperationClass, usize> = [
            (OperationClass::Login, config.login.max(1)),
            (OperationClass::Claim, config.claim.max(1)),
            (OperationClass::Workflow, config.workflow.max(1)),
        ]
        .into_iter()
        .collect();

        let gates = capacities
            .iter()
            .map(|(class, cap)| (*class, Arc::new(Semaphore::new(*cap))))
            .collect();

        Self {
            gates: Arc::new(gates),
            capacities: Arc::new(capacities),
        }
    }

    fn gate(&self, class: OperationClass) -> Arc<Semaphore> {
        // Every class is inserted in `new`, so the lookup cannot miss.
        match self.gates.get(&class) {
            Some(gate) => gate.clone(),
            None => Arc::new(Semaphore::new(1)),
        }
    }

    /// Waits until a slot of `class` is free. The returned permit releases the
    /// slot when dropped.
    pub async fn acquire(&self, class: OperationClass) -> Result<OwnedSemaphorePermit, AcquireError> {
        let gate = self.gate(class);
        if gate.available_permits() == 0 {
            debug!("Waiting for a free {} slot", class);
        }
        gate.acquire_owned().await
    }

    /// Like [`acquire`](Self::acquire) but gives up when `cancel` fires.
    pub async fn acquire_or_cancel(
        &self,
        class: OperationClass,
        cancel: &CancellationToken,
    ) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            permit = self.acquire(class) => permit.ok(),
        }
    }

    pub fn try_acquire(&self, class: OperationClass) -> Option<OwnedSemaphorePermit> {
        self.gate(class).try_acquire_owned().ok()
    }

    pub fn available(&self, class: OperationClass) -> usize {
        self.gate(class).available_permits()
    }

    pub fn capacity(&self, class: OperationClass) -> usize {
        self.capacities.get(&class).copied().unwrap_or(1)
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let limiter = ConcurrencyLimiter::new(LimiterConfig {
            login: 2,
            claim: 1,
            workflow: 4,
        });

        let a = limiter.acquire(OperationClass::Login).await.unwrap();
        let _b = limiter.acquire(OperationClass::Login).await.unwrap();
        assert_eq!(limiter.available(OperationClass::Login), 0);
        assert!(limiter.try_acquire(OperationClass::Login).is_none());

        drop(a);
        assert_eq!(limiter.available(OperationClass::Login), 1);
        assert!(limiter.try_acquire(OperationClass::Login).is_some());
    }

    #[tokio::test]
    async fn test_classes_are_independent() {
        let limiter = ConcurrencyLimiter::new(LimiterConfig {
            login: 1,
            claim: 1,
            workflow: 1,
        });

        let _login = limiter.acquire(OperationClass::Login).await.unwrap();
        assert!(limiter.try_acquire(OperationClass::Claim).is_some());
        assert!(limiter.try_acquire(OperationClass::Workflow).is_some());
    }

    #[tokio::test]
    async fn test_acquire_or_cancel_gives_up() {
        let limiter = ConcurrencyLimiter::new(LimiterConfig {
            login: 1,
            claim: 1,
            workflow: 1,
        });
        let _held = limiter.acquire(OperationClass::Login).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(limiter
            .acquire_or_cancel(OperationClass::Login, &cancel)
            .await
            .is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let limiter = ConcurrencyLimiter::new(LimiterConfig {
            login: 0,
            claim: 0,
            workflow: 0,
        });
        assert_eq!(limiter.capacity(OperationClass::Login), 1);
        assert_eq!(limiter.capacity(OperationClass::Workflow), 1);
    }

    #[tokio::test]
    async fn test_permit_released_on_panic_path() {
        let limiter = ConcurrencyLimiter::new(LimiterConfig {
            login: 1,
            claim: 1,
            workflow: 1,
        });
        let l = limiter.clone();
        let handle = tokio::spawn(async move {
            let _permit = l.acquire(OperationClass::Claim).await.unwrap();
            panic!("worker failed while holding a permit");
        });
        assert!(handle.await.is_err());
        assert_eq!(limiter.available(OperationClass::Claim), 1);
    }
}
