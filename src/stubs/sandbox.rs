use std::time::Duration;

use crate::core::traits::sandbox::{ExecutionOutcome, ExecutionRequest, Sandbox, SandboxError};

/// Answers every execution with the same result after a fixed delay.
#[derive(Debug, Clone)]
pub struct SandboxStub {
    result: Result<ExecutionOutcome, SandboxError>,
    delay: Duration,
}

impl SandboxStub {
    pub fn new(result: Result<ExecutionOutcome, SandboxError>, delay: Duration) -> Self {
        Self { result, delay }
    }
}

#[async_trait::async_trait]
impl Sandbox for SandboxStub {
    #[tracing::instrument(skip(self))]
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        tracing::debug!(
            "Start execution: language={}, stdin={:?}, limits={:?}",
            request.language,
            request.stdin,
            request.limits
        );
        tokio::time::sleep(self.delay).await;
        tracing::debug!("Execution result: {:?}", self.result);

        self.result
            .clone()
            .map(|outcome| outcome.with_elapsed(self.delay.as_millis() as u64))
    }
}
