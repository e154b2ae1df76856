use crate::core::{
    domain::{ProblemId, SubmissionId, UnsupportedLanguage},
    pool::PoolError,
    traits::{sandbox::SandboxError, store::StoreError},
    transition::TransitionError,
};

/// Errors returned to callers of the orchestrator.
///
/// Input errors are raised before any sandbox work. Infrastructure errors
/// hit while judging a formal submission never surface here; they resolve the
/// submission to a terminal status instead.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),
    #[error("problem {0} not found")]
    ProblemNotFound(ProblemId),
    #[error("problem {0} has no test cases")]
    NoTestCases(ProblemId),
    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),
    #[error("submission {0} belongs to another user")]
    Forbidden(SubmissionId),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("judging task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl JudgeError {
    /// True for errors the caller can fix by changing the request.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            JudgeError::MissingField { .. }
                | JudgeError::UnsupportedLanguage(_)
                | JudgeError::ProblemNotFound(_)
                | JudgeError::NoTestCases(_)
        )
    }
}
