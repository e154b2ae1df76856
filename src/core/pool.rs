use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::traits::sandbox::{ExecutionOutcome, ExecutionRequest, Sandbox, SandboxError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no sandbox slot became free within {waited_ms}ms")]
    Saturated { waited_ms: u64 },
    #[error("cancelled while waiting for a sandbox slot")]
    Cancelled,
    #[error("sandbox pool is closed")]
    Closed,
}

#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub capacity: usize,
    /// `None` waits for a slot indefinitely.
    pub admission_timeout: Option<Duration>,
    /// Extra attempts for transient sandbox failures, per execution.
    pub sandbox_retries: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Default)]
struct ExecutionGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ExecutionGauge {
    fn enter(self: &Arc<Self>) -> ActiveExecution {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveExecution(self.clone())
    }
}

struct ActiveExecution(Arc<ExecutionGauge>);

impl Drop for ActiveExecution {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Admission gate in front of a sandbox backend.
///
/// Every execution happens through a [`PoolLease`]; the semaphore's permits
/// bound the number of executions in flight across all submissions. Waiters
/// are admitted in FIFO order.
#[derive(Clone, Debug)]
pub struct SandboxPool {
    sandbox: Arc<dyn Sandbox>,
    permits: Arc<Semaphore>,
    settings: PoolSettings,
    gauge: Arc<ExecutionGauge>,
}

impl SandboxPool {
    pub fn new(sandbox: Arc<dyn Sandbox>, settings: PoolSettings) -> Self {
        let settings = PoolSettings {
            capacity: settings.capacity.max(1),
            ..settings
        };
        Self {
            sandbox,
            permits: Arc::new(Semaphore::new(settings.capacity)),
            settings,
            gauge: Arc::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    pub fn admission_timeout(&self) -> Option<Duration> {
        self.settings.admission_timeout
    }

    pub fn sandbox_retries(&self) -> u32 {
        self.settings.sandbox_retries
    }

    pub fn retry_backoff(&self) -> Duration {
        self.settings.retry_backoff
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn active_executions(&self) -> usize {
        self.gauge.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous executions observed so far.
    pub fn peak_executions(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// Waits for `slots` permits (clamped to the pool capacity).
    ///
    /// Returns early if `cancel` fires or the admission timeout elapses. The
    /// permits are released when the lease is dropped.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn acquire(
        &self,
        slots: usize,
        cancel: &CancellationToken,
    ) -> Result<PoolLease, PoolError> {
        let slots = slots.clamp(1, self.settings.capacity);

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
            permit = self.admit(slots) => permit?,
        };
        tracing::debug!(
            slots,
            available = self.permits.available_permits(),
            "Sandbox slots leased"
        );

        Ok(PoolLease {
            _permit: permit,
            slots,
            sandbox: self.sandbox.clone(),
            gauge: self.gauge.clone(),
            retries: self.settings.sandbox_retries,
            backoff: self.settings.retry_backoff,
        })
    }

    async fn admit(&self, slots: usize) -> Result<OwnedSemaphorePermit, PoolError> {
        let acquire = self.permits.clone().acquire_many_owned(slots as u32);
        match self.settings.admission_timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(permit) => permit.map_err(|_| PoolError::Closed),
                Err(_) => {
                    tracing::warn!(
                        waited_ms = limit.as_millis() as u64,
                        capacity = self.settings.capacity,
                        "Sandbox pool saturated"
                    );
                    Err(PoolError::Saturated {
                        waited_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => acquire.await.map_err(|_| PoolError::Closed),
        }
    }
}

/// Exclusive right to run up to `slots` executions at once.
#[derive(Debug)]
pub struct PoolLease {
    _permit: OwnedSemaphorePermit,
    slots: usize,
    sandbox: Arc<dyn Sandbox>,
    gauge: Arc<ExecutionGauge>,
    retries: u32,
    backoff: Duration,
}

impl PoolLease {
    pub fn slots(&self) -> usize {
        self.slots
    }
}

#[async_trait::async_trait]
impl Sandbox for PoolLease {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let _active = self.gauge.enter();
        let mut attempt = 0;
        loop {
            match self.sandbox.execute(request).await {
                Err(error) if error.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(attempt, %error, "Sandbox unavailable, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                result => return result,
            }
        }
    }
}
