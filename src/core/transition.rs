use chrono::Utc;

use crate::core::{
    domain::{CaseResult, Status, Submission},
    pipeline::aggregating::aggregate,
};

#[derive(Clone, Debug)]
pub enum Transition {
    /// Judging begins.
    Start,
    /// Judging finished; the status is derived from the results.
    Conclude(Vec<CaseResult>),
    /// The judge failed, not the code. Users see `RuntimeError`.
    Fail { reason: String },
    Cancel,
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Conclude(_) => "conclude",
            Transition::Fail { .. } => "fail",
            Transition::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {transition} a submission that is {from}")]
pub struct TransitionError {
    pub from: Status,
    pub transition: &'static str,
}

impl Submission {
    /// The only way a submission's status changes.
    ///
    /// `Pending → Running → terminal`; `Fail` and `Cancel` are also accepted
    /// from `Pending` so that nothing is ever left non-terminal. Terminal
    /// submissions reject every transition.
    pub fn apply(self, transition: Transition) -> Result<Submission, TransitionError> {
        let from = self.status;
        let rejected = || TransitionError {
            from,
            transition: transition.name(),
        };

        let now = Utc::now();
        let next = match (from, &transition) {
            (Status::Pending, Transition::Start) => Submission {
                status: Status::Running,
                updated_at: now,
                ..self
            },
            (Status::Running, Transition::Conclude(results)) => Submission {
                status: aggregate(results, self.case_count),
                results: results.clone(),
                updated_at: now,
                completed_at: Some(now),
                ..self
            },
            (Status::Pending | Status::Running, Transition::Fail { reason }) => Submission {
                status: Status::RuntimeError,
                failure: Some(reason.clone()),
                updated_at: now,
                completed_at: Some(now),
                ..self
            },
            (Status::Pending | Status::Running, Transition::Cancel) => Submission {
                status: Status::Cancelled,
                updated_at: now,
                completed_at: Some(now),
                ..self
            },
            _ => return Err(rejected()),
        };

        Ok(next)
    }
}
