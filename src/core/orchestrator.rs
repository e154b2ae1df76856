use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::constants::{
    DEFAULT_DEADLINE_OVERHEAD_MS, DEFAULT_RESULT_OUTPUT_BYTES, UPDATES_CHANNEL_CAPACITY,
};
use crate::core::{
    domain::{
        CaseResult, CaseVisibility, ExecutionLimits, Language, ProblemId, Submission,
        SubmissionId, SubmissionSummary, TestCase, UserId,
    },
    errors::JudgeError,
    pipeline::{
        aggregating::is_unexplained_truncation,
        comparing::Comparison,
        evaluating::{EvaluationMode, EvaluationPolicy, evaluate},
    },
    pool::{PoolError, SandboxPool},
    traits::{
        sandbox::{ExecutionOutcome, ExecutionRequest, Sandbox, SandboxError},
        store::{ProblemStore, StoreError, SubmissionStore},
    },
    transition::Transition,
};

#[derive(Clone, Debug)]
pub struct JudgeSettings {
    pub fail_fast: bool,
    /// Cases of one submission run at once. Clamped to the pool capacity.
    pub case_parallelism: usize,
    pub reveal_hidden_output: bool,
    pub stderr_is_error: bool,
    pub result_output_bytes: usize,
    pub limits: ExecutionLimits,
    /// Slack on top of the per-case ceilings in the hard judging deadline.
    pub deadline_overhead: Duration,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            fail_fast: false,
            case_parallelism: 1,
            reveal_hidden_output: false,
            stderr_is_error: true,
            result_output_bytes: DEFAULT_RESULT_OUTPUT_BYTES,
            limits: ExecutionLimits::default(),
            deadline_overhead: Duration::from_millis(DEFAULT_DEADLINE_OVERHEAD_MS),
        }
    }
}

/// Ad-hoc execution. `input` wins over `problem`; with neither, stdin is empty.
#[derive(Clone, Debug, Default)]
pub struct RunRequest {
    pub user: UserId,
    pub language: String,
    pub source: String,
    pub input: Option<String>,
    pub problem: Option<ProblemId>,
}

#[derive(Clone, Debug, Default)]
pub struct SubmitRequest {
    pub user: UserId,
    pub problem: ProblemId,
    pub language: String,
    pub source: String,
}

/// A submission being judged on a background task.
///
/// `updates` yields a snapshot at every transition and ends once the
/// submission is terminal.
#[derive(Debug)]
pub struct SubmissionHandle {
    pub id: SubmissionId,
    pub updates: ReceiverStream<Submission>,
    pub task: JoinHandle<Result<Submission, JudgeError>>,
}

/// Removes a submission from the active set when judging ends, however it ends.
#[derive(Debug)]
struct ActiveEntry {
    id: SubmissionId,
    active: Arc<DashMap<SubmissionId, CancellationToken>>,
}

impl Drop for ActiveEntry {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

#[derive(Debug)]
struct Prepared {
    _entry: ActiveEntry,
    submission: Submission,
    cases: Vec<TestCase>,
    comparison: Comparison,
    cancel: CancellationToken,
}

#[derive(Clone, Debug)]
pub struct Orchestrator {
    pool: SandboxPool,
    problems: Arc<dyn ProblemStore>,
    submissions: Arc<dyn SubmissionStore>,
    settings: JudgeSettings,
    active: Arc<DashMap<SubmissionId, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        pool: SandboxPool,
        problems: Arc<dyn ProblemStore>,
        submissions: Arc<dyn SubmissionStore>,
        settings: JudgeSettings,
    ) -> Self {
        Self {
            pool,
            problems,
            submissions,
            settings,
            active: Arc::default(),
        }
    }

    pub fn pool(&self) -> &SandboxPool {
        &self.pool
    }

    pub fn active_submissions(&self) -> usize {
        self.active.len()
    }

    pub async fn run(&self, request: RunRequest) -> Result<ExecutionOutcome, JudgeError> {
        self.run_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Executes the source once and returns the raw outcome. Nothing is
    /// persisted and no verdict is produced.
    ///
    /// Infrastructure failures come back as an outcome with
    /// [`Termination::Internal`](crate::core::traits::sandbox::Termination::Internal).
    #[tracing::instrument(skip_all, fields(user = %request.user, language = %request.language))]
    pub async fn run_cancellable(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, JudgeError> {
        require(&request.user, "user")?;
        require(&request.source, "source")?;
        require(&request.language, "language")?;
        let language: Language = request.language.parse()?;

        let stdin = match (request.input, &request.problem) {
            (Some(input), _) => input,
            (None, Some(problem)) => self
                .problems
                .sample_test_cases(problem)
                .await
                .map_err(|error| problem_error(problem, error))?
                .into_iter()
                .next()
                .map(|case| case.input)
                .unwrap_or_default(),
            (None, None) => String::new(),
        };
        let execution = ExecutionRequest {
            language,
            source: Arc::from(request.source),
            stdin,
            limits: self.settings.limits.clone(),
        };

        let lease = match self.pool.acquire(1, cancel).await {
            Ok(lease) => lease,
            Err(PoolError::Cancelled) => return Err(JudgeError::Cancelled),
            Err(error) => {
                tracing::error!(infra = true, %error, "Run was not admitted");
                return Ok(ExecutionOutcome::internal(&SandboxError::Unavailable {
                    msg: error.to_string(),
                }));
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JudgeError::Cancelled),
            result = lease.execute(&execution) => result,
        };

        match result {
            Ok(outcome) => {
                tracing::info!(
                    termination = ?outcome.termination,
                    elapsed_ms = outcome.elapsed_ms,
                    "Run finished"
                );
                Ok(outcome)
            }
            Err(error) => {
                tracing::error!(infra = true, %error, "Run failed in the sandbox");
                Ok(ExecutionOutcome::internal(&error))
            }
        }
    }

    /// Judges the source against the problem's sample cases, with diffs.
    /// Nothing is persisted.
    #[tracing::instrument(skip_all, fields(user = %request.user, problem = %request.problem))]
    pub async fn check_samples(
        &self,
        request: SubmitRequest,
    ) -> Result<Vec<CaseResult>, JudgeError> {
        let language = validate(&request)?;
        let cases = self
            .problems
            .sample_test_cases(&request.problem)
            .await
            .map_err(|error| problem_error(&request.problem, error))?;
        if cases.is_empty() {
            return Err(JudgeError::NoTestCases(request.problem));
        }
        let comparison = self
            .problems
            .comparison(&request.problem)
            .await
            .map_err(|error| problem_error(&request.problem, error))?;

        let policy = self.policy(CaseVisibility::Sample, comparison);
        let lease = self
            .pool
            .acquire(policy.parallelism, &CancellationToken::new())
            .await?;
        let results = evaluate(&lease, language, Arc::from(request.source), &cases, &policy)
            .await
            .inspect_err(|error| {
                tracing::error!(infra = true, %error, "Sample check failed in the sandbox")
            })?;

        Ok(results)
    }

    /// Judges the source against the problem's hidden cases and returns the
    /// terminal submission.
    ///
    /// Every transition is persisted. Sandbox failures, pool saturation and
    /// the hard deadline resolve to `RuntimeError` with a failure note; only
    /// input and store errors are returned as `Err`.
    ///
    /// Judging runs on its own task. Dropping the returned future cancels the
    /// submission, and the task still records `Cancelled`.
    #[tracing::instrument(skip_all, fields(user = %request.user, problem = %request.problem))]
    pub async fn submit(&self, request: SubmitRequest) -> Result<Submission, JudgeError> {
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();

        let orchestrator = self.clone();
        let task = tokio::spawn(
            async move {
                let prepared = orchestrator.prepare(request, cancel).await?;
                orchestrator.judge(prepared, None).await
            }
            .in_current_span(),
        );
        let submission = task.await??;

        guard.disarm();
        Ok(submission)
    }

    /// Like [`Orchestrator::submit`], but judging continues on a spawned task.
    /// Input errors are still returned immediately.
    #[tracing::instrument(skip_all, fields(user = %request.user, problem = %request.problem))]
    pub async fn submit_detached(
        &self,
        request: SubmitRequest,
    ) -> Result<SubmissionHandle, JudgeError> {
        let prepared = self.prepare(request, CancellationToken::new()).await?;
        let id = prepared.submission.id;

        let (tx, rx) = mpsc::channel(UPDATES_CHANNEL_CAPACITY);
        let _ = tx.send(prepared.submission.clone()).await;

        let orchestrator = self.clone();
        let task = tokio::spawn(async move { orchestrator.judge(prepared, Some(tx)).await });

        Ok(SubmissionHandle {
            id,
            updates: ReceiverStream::new(rx),
            task,
        })
    }

    /// Returns false if the submission is not being judged.
    pub fn cancel(&self, id: &SubmissionId) -> bool {
        match self.active.get(id) {
            Some(token) => {
                token.cancel();
                tracing::info!(%id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub async fn submission(
        &self,
        user: &UserId,
        id: &SubmissionId,
    ) -> Result<Submission, JudgeError> {
        let submission = self
            .submissions
            .get(id)
            .await?
            .ok_or(JudgeError::SubmissionNotFound(*id))?;
        if &submission.user_id != user {
            return Err(JudgeError::Forbidden(*id));
        }
        Ok(submission)
    }

    /// The user's submissions for one problem, newest first.
    pub async fn history(
        &self,
        user: &UserId,
        problem: &ProblemId,
    ) -> Result<Vec<SubmissionSummary>, JudgeError> {
        require(user, "user")?;
        require(problem, "problem")?;
        let submissions = self
            .submissions
            .list_for_user_problem(user, problem)
            .await?;
        Ok(submissions.iter().map(SubmissionSummary::from).collect())
    }

    async fn prepare(
        &self,
        request: SubmitRequest,
        cancel: CancellationToken,
    ) -> Result<Prepared, JudgeError> {
        let language = validate(&request)?;
        let cases = self
            .problems
            .hidden_test_cases(&request.problem)
            .await
            .map_err(|error| problem_error(&request.problem, error))?;
        if cases.is_empty() {
            return Err(JudgeError::NoTestCases(request.problem));
        }
        let comparison = self
            .problems
            .comparison(&request.problem)
            .await
            .map_err(|error| problem_error(&request.problem, error))?;

        let submission = Submission::new(
            request.user,
            request.problem,
            language,
            request.source,
            cases.len(),
        );
        self.submissions.create(&submission).await?;
        tracing::info!(id = %submission.id, cases = cases.len(), "Submission created");

        self.active.insert(submission.id, cancel.clone());

        Ok(Prepared {
            _entry: ActiveEntry {
                id: submission.id,
                active: self.active.clone(),
            },
            submission,
            cases,
            comparison,
            cancel,
        })
    }

    #[tracing::instrument(skip_all, fields(id = %prepared.submission.id))]
    async fn judge(
        &self,
        prepared: Prepared,
        updates: Option<mpsc::Sender<Submission>>,
    ) -> Result<Submission, JudgeError> {
        let Prepared {
            _entry,
            submission,
            cases,
            comparison,
            cancel,
        } = prepared;

        if cancel.is_cancelled() {
            return self
                .advance(submission, Transition::Cancel, updates.as_ref())
                .await;
        }
        let submission = self
            .advance(submission, Transition::Start, updates.as_ref())
            .await?;
        let transition = self
            .judge_hidden(&submission, &cases, comparison, &cancel)
            .await;
        self.advance(submission, transition, updates.as_ref()).await
    }

    async fn judge_hidden(
        &self,
        submission: &Submission,
        cases: &[TestCase],
        comparison: Comparison,
        cancel: &CancellationToken,
    ) -> Transition {
        let policy = self.policy(CaseVisibility::Hidden, comparison);
        let deadline = self.deadline(cases.len());
        let source: Arc<str> = Arc::from(submission.source.as_str());

        let judging = async {
            let lease = self.pool.acquire(policy.parallelism, cancel).await?;
            let results = evaluate(&lease, submission.language, source, cases, &policy).await?;
            Ok::<_, JudgeError>(results)
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Judging cancelled");
                return Transition::Cancel;
            }
            outcome = tokio::time::timeout(deadline, judging) => outcome,
        };

        match outcome {
            Ok(Ok(results)) => {
                if is_unexplained_truncation(&results, cases.len()) {
                    tracing::error!(
                        infra = true,
                        evaluated = results.len(),
                        total = cases.len(),
                        "Evaluation stopped early without a failing verdict"
                    );
                }
                Transition::Conclude(results)
            }
            Ok(Err(JudgeError::Pool(PoolError::Cancelled))) => Transition::Cancel,
            Ok(Err(error)) => {
                tracing::error!(infra = true, %error, "Judging failed");
                Transition::Fail {
                    reason: error.to_string(),
                }
            }
            Err(_) => {
                let deadline_ms = deadline.as_millis() as u64;
                tracing::error!(infra = true, deadline_ms, "Judging deadline exceeded");
                Transition::Fail {
                    reason: format!("judging exceeded its {}ms deadline", deadline_ms),
                }
            }
        }
    }

    /// Applies the transition, persists the result and publishes a snapshot.
    async fn advance(
        &self,
        submission: Submission,
        transition: Transition,
        updates: Option<&mpsc::Sender<Submission>>,
    ) -> Result<Submission, JudgeError> {
        let submission = submission.apply(transition)?;
        self.submissions
            .update(&submission)
            .await
            .inspect_err(|error| {
                tracing::error!(infra = true, %error, status = %submission.status, "Failed to persist submission")
            })?;
        tracing::info!(
            status = %submission.status,
            results = submission.results.len(),
            "Submission updated"
        );

        if let Some(updates) = updates {
            let _ = updates.send(submission.clone()).await;
        }
        Ok(submission)
    }

    fn policy(&self, visibility: CaseVisibility, comparison: Comparison) -> EvaluationPolicy {
        EvaluationPolicy {
            mode: if self.settings.fail_fast {
                EvaluationMode::FailFast
            } else {
                EvaluationMode::Exhaustive
            },
            parallelism: self
                .settings
                .case_parallelism
                .clamp(1, self.pool.capacity()),
            visibility,
            reveal_hidden_output: self.settings.reveal_hidden_output,
            stderr_is_error: self.settings.stderr_is_error,
            result_output_bytes: self.settings.result_output_bytes,
            comparison,
            limits: self.settings.limits.clone(),
        }
    }

    /// `cases × attempts × (compile + run) + backoff + admission wait + overhead`,
    /// where a case gets one attempt plus the pool's transient retries.
    fn deadline(&self, cases: usize) -> Duration {
        let cases = u32::try_from(cases).unwrap_or(u32::MAX);
        let retries = self.pool.sandbox_retries();
        let per_case = self
            .settings
            .limits
            .per_case_ceiling()
            .saturating_mul(retries.saturating_add(1))
            .saturating_add(self.pool.retry_backoff().saturating_mul(retries));
        per_case
            .saturating_mul(cases)
            .saturating_add(self.pool.admission_timeout().unwrap_or_default())
            .saturating_add(self.settings.deadline_overhead)
    }
}

fn require(value: &str, field: &'static str) -> Result<(), JudgeError> {
    if value.trim().is_empty() {
        Err(JudgeError::MissingField { field })
    } else {
        Ok(())
    }
}

fn validate(request: &SubmitRequest) -> Result<Language, JudgeError> {
    require(&request.user, "user")?;
    require(&request.problem, "problem")?;
    require(&request.source, "source")?;
    require(&request.language, "language")?;
    Ok(request.language.parse()?)
}

fn problem_error(problem: &ProblemId, error: StoreError) -> JudgeError {
    match error {
        StoreError::NotFound { .. } => JudgeError::ProblemNotFound(problem.clone()),
        other => JudgeError::Store(other),
    }
}
