use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;

use crate::constants::DEFAULT_RESULT_OUTPUT_BYTES;
use crate::core::{
    domain::{CaseResult, CaseVisibility, ExecutionLimits, Language, TestCase, Verdict},
    pipeline::comparing::Comparison,
    traits::sandbox::{
        ExecutionOutcome, ExecutionRequest, LimitKind, Sandbox, SandboxError, Termination,
    },
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Every case is evaluated unless the source fails to compile.
    #[default]
    Exhaustive,
    /// Stop at the first case that is not `Passed`.
    FailFast,
}

#[derive(Clone, Debug)]
pub struct EvaluationPolicy {
    pub mode: EvaluationMode,
    /// Cases run concurrently within one batch. 1 means strictly sequential.
    pub parallelism: usize,
    pub visibility: CaseVisibility,
    pub reveal_hidden_output: bool,
    pub stderr_is_error: bool,
    pub result_output_bytes: usize,
    pub comparison: Comparison,
    pub limits: ExecutionLimits,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self {
            mode: EvaluationMode::Exhaustive,
            parallelism: 1,
            visibility: CaseVisibility::Hidden,
            reveal_hidden_output: false,
            stderr_is_error: true,
            result_output_bytes: DEFAULT_RESULT_OUTPUT_BYTES,
            comparison: Comparison::Exact,
            limits: ExecutionLimits::default(),
        }
    }
}

impl EvaluationPolicy {
    fn reveals_output(&self) -> bool {
        self.visibility == CaseVisibility::Sample || self.reveal_hidden_output
    }

    fn stops_after(&self, verdict: Verdict) -> bool {
        match verdict {
            Verdict::CompilationError => true,
            Verdict::Passed => false,
            _ => self.mode == EvaluationMode::FailFast,
        }
    }
}

/// Runs `source` against `cases` in list order and judges every outcome.
///
/// Results come back ordered by case index whatever order the sandbox
/// finished them in. Code-caused failures become verdicts; only sandbox
/// failures are returned as `Err`, and they abort the whole evaluation.
#[tracing::instrument(skip_all, fields(language = %language, cases = cases.len()))]
pub async fn evaluate(
    sandbox: &dyn Sandbox,
    language: Language,
    source: Arc<str>,
    cases: &[TestCase],
    policy: &EvaluationPolicy,
) -> Result<Vec<CaseResult>, SandboxError> {
    let batch_size = policy.parallelism.max(1);
    let mut results = Vec::with_capacity(cases.len());

    for (batch_idx, batch) in cases.chunks(batch_size).enumerate() {
        let offset = batch_idx * batch_size;
        let batch_results = run_batch(sandbox, language, &source, batch, offset, policy).await?;

        for result in batch_results {
            let stop = policy.stops_after(result.verdict);
            tracing::debug!(index = result.index, verdict = %result.verdict, "Case judged");
            results.push(result);
            if stop {
                tracing::debug!(
                    evaluated = results.len(),
                    total = cases.len(),
                    "Stopping evaluation early"
                );
                return Ok(results);
            }
        }
    }

    Ok(results)
}

/// Runs one batch concurrently and returns its results sorted by index.
async fn run_batch(
    sandbox: &dyn Sandbox,
    language: Language,
    source: &Arc<str>,
    batch: &[TestCase],
    offset: usize,
    policy: &EvaluationPolicy,
) -> Result<Vec<CaseResult>, SandboxError> {
    let mut futures: FuturesUnordered<_> = batch
        .iter()
        .enumerate()
        .map(|(i, case)| {
            let request = ExecutionRequest {
                language,
                source: source.clone(),
                stdin: case.input.clone(),
                limits: policy.limits.clone(),
            };
            async move {
                let outcome = sandbox.execute(&request).await;
                (offset + i, case, outcome)
            }
        })
        .collect();

    let mut results = Vec::with_capacity(batch.len());
    while let Some((index, case, outcome)) = futures.next().await {
        let outcome = outcome?;
        results.push(judge_case(index, case, &outcome, policy));
    }
    results.sort_by_key(|result| result.index);

    Ok(results)
}

pub fn classify(outcome: &ExecutionOutcome, expected: &str, policy: &EvaluationPolicy) -> Verdict {
    match outcome.termination {
        Termination::CompileFailed => Verdict::CompilationError,
        Termination::LimitExceeded(LimitKind::Time) => Verdict::TimeLimitExceeded,
        Termination::LimitExceeded(_) | Termination::Signaled(_) | Termination::Internal => {
            Verdict::RuntimeError
        }
        Termination::Exited(code) if code != 0 => Verdict::RuntimeError,
        Termination::Exited(_) if policy.stderr_is_error && !outcome.stderr.trim().is_empty() => {
            Verdict::RuntimeError
        }
        Termination::Exited(_) => {
            if policy.comparison.matches(&outcome.stdout, expected) {
                Verdict::Passed
            } else {
                Verdict::WrongAnswer
            }
        }
    }
}

fn judge_case(
    index: usize,
    case: &TestCase,
    outcome: &ExecutionOutcome,
    policy: &EvaluationPolicy,
) -> CaseResult {
    let verdict = classify(outcome, &case.expected_output, policy);
    let cap = policy.result_output_bytes;

    let error = match verdict {
        Verdict::Passed | Verdict::WrongAnswer => None,
        _ => Some(truncate(&error_text(outcome), cap)),
    };

    let (actual_output, expected_output) = if policy.reveals_output() {
        (
            Some(truncate(&outcome.stdout, cap)),
            Some(truncate(&case.expected_output, cap)),
        )
    } else {
        (None, None)
    };

    CaseResult {
        index,
        verdict,
        actual_output,
        expected_output,
        error,
        elapsed_ms: outcome.elapsed_ms,
    }
}

fn error_text(outcome: &ExecutionOutcome) -> String {
    let stderr = outcome.stderr.trim_end();
    let headline = match outcome.termination {
        Termination::LimitExceeded(kind) => Some(kind.marker().to_string()),
        Termination::Signaled(signal) => Some(format!("Killed by signal {}", signal)),
        Termination::Exited(code) if code != 0 && stderr.is_empty() => {
            Some(format!("Process exited with code {}", code))
        }
        _ => None,
    };

    match headline {
        Some(headline) if stderr.is_empty() => headline,
        Some(headline) => format!("{}\n{}", headline, stderr),
        None => stderr.to_string(),
    }
}

fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated)", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MEMORY_EXCEEDED_MARKER;
    use crate::core::traits::sandbox::MockSandbox;
    use std::sync::Mutex;
    use std::time::Duration;

    fn sum_cases() -> Vec<TestCase> {
        vec![TestCase::new("2 3", "5"), TestCase::new("10 10", "20")]
    }

    fn sum_of(stdin: &str) -> i64 {
        stdin
            .split_whitespace()
            .filter_map(|n| n.parse::<i64>().ok())
            .sum()
    }

    fn verdicts(results: &[CaseResult]) -> Vec<Verdict> {
        results.iter().map(|r| r.verdict).collect()
    }

    fn source() -> Arc<str> {
        Arc::from("a, b = map(int, input().split()); print(a + b)")
    }

    #[tokio::test]
    async fn test_correct_sum_passes_every_case() {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_execute()
            .times(2)
            .returning(|req| Ok(ExecutionOutcome::exited(0, format!("{}\n", sum_of(&req.stdin)), "")));

        let results = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &sum_cases(),
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(verdicts(&results), vec![Verdict::Passed, Verdict::Passed]);
        assert_eq!(results[0].index, 0);
        assert_eq!(results[1].index, 1);
    }

    #[tokio::test]
    async fn test_trailing_blank_line_still_passes() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().returning(|req| {
            let stdout = if req.stdin == "2 3" {
                "5\n\n".to_string()
            } else {
                format!("{}\n", sum_of(&req.stdin))
            };
            Ok(ExecutionOutcome::exited(0, stdout, ""))
        });

        let results = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &sum_cases(),
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(verdicts(&results), vec![Verdict::Passed, Verdict::Passed]);
    }

    #[tokio::test]
    async fn test_timeout_on_second_case() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().returning(|req| {
            if req.stdin == "10 10" {
                Ok(ExecutionOutcome::limit_exceeded(LimitKind::Time).with_elapsed(2000))
            } else {
                Ok(ExecutionOutcome::exited(0, "5", ""))
            }
        });

        let results = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &sum_cases(),
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            verdicts(&results),
            vec![Verdict::Passed, Verdict::TimeLimitExceeded]
        );
        assert_eq!(results[1].elapsed_ms, 2000);
        assert!(results[1].error.as_deref().unwrap().contains("Time limit"));
    }

    #[tokio::test]
    async fn test_compile_failure_stops_after_first_case() {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_execute()
            .times(1)
            .returning(|_| Ok(ExecutionOutcome::compile_failed("main.cpp:1: error: expected ';'")));

        let results = evaluate(
            &sandbox,
            Language::Cpp,
            Arc::from("int main() { return 0 }"),
            &sum_cases(),
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(verdicts(&results), vec![Verdict::CompilationError]);
        assert!(results[0].error.as_deref().unwrap().contains("expected ';'"));
    }

    #[tokio::test]
    async fn test_exhaustive_mode_keeps_going_after_failures() {
        let cases = vec![
            TestCase::new("1", "1"),
            TestCase::new("2", "2"),
            TestCase::new("3", "3"),
            TestCase::new("4", "4"),
        ];
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().times(4).returning(|req| {
            Ok(match req.stdin.as_str() {
                "2" => ExecutionOutcome::exited(0, "wrong", ""),
                "3" => ExecutionOutcome::exited(1, "", "Traceback: ZeroDivisionError"),
                other => ExecutionOutcome::exited(0, other, ""),
            })
        });

        let results = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &cases,
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            verdicts(&results),
            vec![
                Verdict::Passed,
                Verdict::WrongAnswer,
                Verdict::RuntimeError,
                Verdict::Passed
            ]
        );
        assert!(results[2].error.as_deref().unwrap().contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_non_passed() {
        let cases = vec![
            TestCase::new("1", "1"),
            TestCase::new("2", "2"),
            TestCase::new("3", "3"),
        ];
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().times(2).returning(|req| {
            Ok(match req.stdin.as_str() {
                "2" => ExecutionOutcome::exited(0, "nope", ""),
                other => ExecutionOutcome::exited(0, other, ""),
            })
        });
        let policy = EvaluationPolicy {
            mode: EvaluationMode::FailFast,
            ..EvaluationPolicy::default()
        };

        let results = evaluate(&sandbox, Language::Python, source(), &cases, &policy)
            .await
            .unwrap();

        assert_eq!(verdicts(&results), vec![Verdict::Passed, Verdict::WrongAnswer]);
    }

    #[tokio::test]
    async fn test_stderr_output_counts_as_runtime_error_by_default() {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_execute()
            .returning(|_| Ok(ExecutionOutcome::exited(0, "5", "warning: something")));
        let cases = vec![TestCase::new("2 3", "5")];

        let strict = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &cases,
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();
        let lenient = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &cases,
            &EvaluationPolicy {
                stderr_is_error: false,
                ..EvaluationPolicy::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(strict[0].verdict, Verdict::RuntimeError);
        assert_eq!(lenient[0].verdict, Verdict::Passed);
    }

    #[tokio::test]
    async fn test_memory_limit_is_runtime_error_with_marker() {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_execute()
            .returning(|_| Ok(ExecutionOutcome::limit_exceeded(LimitKind::Memory)));

        let results = evaluate(
            &sandbox,
            Language::Java,
            source(),
            &[TestCase::new("", "")],
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(results[0].verdict, Verdict::RuntimeError);
        assert_eq!(results[0].error.as_deref(), Some(MEMORY_EXCEEDED_MARKER));
    }

    #[tokio::test]
    async fn test_signal_termination_is_runtime_error() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().returning(|_| {
            Ok(ExecutionOutcome {
                stdout: String::new(),
                stderr: String::new(),
                termination: Termination::Signaled(11),
                elapsed_ms: 3,
            })
        });

        let results = evaluate(
            &sandbox,
            Language::Cpp,
            source(),
            &[TestCase::new("", "")],
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(results[0].verdict, Verdict::RuntimeError);
        assert_eq!(results[0].error.as_deref(), Some("Killed by signal 11"));
    }

    #[tokio::test]
    async fn test_hidden_cases_withhold_outputs_and_samples_reveal_them() {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_execute()
            .returning(|_| Ok(ExecutionOutcome::exited(0, "6", "")));
        let cases = vec![TestCase::new("2 3", "5")];

        let hidden = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &cases,
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();
        let sample = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &cases,
            &EvaluationPolicy {
                visibility: CaseVisibility::Sample,
                ..EvaluationPolicy::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(hidden[0].verdict, Verdict::WrongAnswer);
        assert_eq!(hidden[0].actual_output, None);
        assert_eq!(hidden[0].expected_output, None);
        assert_eq!(sample[0].verdict, Verdict::WrongAnswer);
        assert_eq!(sample[0].actual_output.as_deref(), Some("6"));
        assert_eq!(sample[0].expected_output.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_long_output_is_truncated_in_results() {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_execute()
            .returning(|_| Ok(ExecutionOutcome::exited(0, "x".repeat(100), "")));
        let policy = EvaluationPolicy {
            visibility: CaseVisibility::Sample,
            result_output_bytes: 10,
            ..EvaluationPolicy::default()
        };

        let results = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &[TestCase::new("", "y")],
            &policy,
        )
        .await
        .unwrap();

        let actual = results[0].actual_output.as_deref().unwrap();
        assert!(actual.starts_with("xxxxxxxxxx\n"));
        assert!(actual.ends_with("(truncated)"));
    }

    #[tokio::test]
    async fn test_sandbox_failure_aborts_evaluation() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().times(1).returning(|_| {
            Err(SandboxError::Toolchain {
                program: "python3".to_string(),
                msg: "No such file or directory".to_string(),
            })
        });

        let result = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &sum_cases(),
            &EvaluationPolicy::default(),
        )
        .await;

        assert!(matches!(result, Err(SandboxError::Toolchain { .. })));
    }

    #[tokio::test]
    async fn test_empty_case_list_produces_no_results() {
        let sandbox = MockSandbox::new();

        let results = evaluate(
            &sandbox,
            Language::Python,
            source(),
            &[],
            &EvaluationPolicy::default(),
        )
        .await
        .unwrap();

        assert!(results.is_empty());
    }

    /// Finishes later cases first so completion order differs from list order.
    #[derive(Debug, Default)]
    struct ReversedSandbox {
        started: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Sandbox for ReversedSandbox {
        async fn execute(
            &self,
            request: &ExecutionRequest,
        ) -> Result<ExecutionOutcome, SandboxError> {
            self.started.lock().unwrap().push(request.stdin.clone());
            let n: u64 = request.stdin.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50 - n * 10)).await;
            if request.stdin == "1" {
                return Ok(ExecutionOutcome::compile_failed("broken"));
            }
            Ok(ExecutionOutcome::exited(0, request.stdin.clone(), ""))
        }
    }

    #[tokio::test]
    async fn test_parallel_batches_report_in_index_order() {
        let cases: Vec<TestCase> = (0..4)
            .map(|n| TestCase::new(n.to_string(), n.to_string()))
            .collect();
        let sandbox = ReversedSandbox::default();
        let policy = EvaluationPolicy {
            parallelism: 4,
            ..EvaluationPolicy::default()
        };

        let results = evaluate(&sandbox, Language::Python, source(), &cases, &policy)
            .await
            .unwrap();

        assert_eq!(
            verdicts(&results),
            vec![Verdict::Passed, Verdict::CompilationError]
        );
        assert_eq!(results[1].index, 1);
        assert_eq!(sandbox.started.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_parallel_batches_cover_every_case() {
        let cases: Vec<TestCase> = (2..5)
            .map(|n| TestCase::new(n.to_string(), n.to_string()))
            .collect();
        let sandbox = ReversedSandbox::default();
        let policy = EvaluationPolicy {
            parallelism: 2,
            ..EvaluationPolicy::default()
        };

        let results = evaluate(&sandbox, Language::Python, source(), &cases, &policy)
            .await
            .unwrap();

        assert_eq!(
            results.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(results.iter().all(|r| r.verdict == Verdict::Passed));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ééééé";
        let truncated = truncate(text, 3);
        assert!(truncated.starts_with('é'));
        assert!(!truncated.starts_with("éé"));
        assert_eq!(truncate("short", 10), "short");
    }
}
