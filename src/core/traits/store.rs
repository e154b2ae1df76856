use crate::core::domain::{ProblemId, Submission, SubmissionId, TestCase, UserId};
use crate::core::pipeline::comparing::Comparison;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} {id} already exists")]
    Conflict { entity: &'static str, id: String },
    #[error("store unavailable: {msg}")]
    Unavailable { msg: String },
}

impl StoreError {
    pub fn problem_not_found(id: &ProblemId) -> Self {
        StoreError::NotFound {
            entity: "problem",
            id: id.clone(),
        }
    }

    pub fn submission_not_found(id: &SubmissionId) -> Self {
        StoreError::NotFound {
            entity: "submission",
            id: id.to_string(),
        }
    }
}

/// Read side of problem storage the judge needs.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProblemStore: std::fmt::Debug + Send + Sync {
    async fn hidden_test_cases(&self, problem: &ProblemId) -> Result<Vec<TestCase>, StoreError>;

    async fn sample_test_cases(&self, problem: &ProblemId) -> Result<Vec<TestCase>, StoreError>;

    async fn comparison(&self, problem: &ProblemId) -> Result<Comparison, StoreError>;
}

/// Durable record of formal submissions. Called once per state transition.
#[mockall::automock]
#[async_trait::async_trait]
pub trait SubmissionStore: std::fmt::Debug + Send + Sync {
    async fn create(&self, submission: &Submission) -> Result<(), StoreError>;

    async fn update(&self, submission: &Submission) -> Result<(), StoreError>;

    async fn get(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError>;

    /// Newest first.
    async fn list_for_user_problem(
        &self,
        user: &UserId,
        problem: &ProblemId,
    ) -> Result<Vec<Submission>, StoreError>;
}
