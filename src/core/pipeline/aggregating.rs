use crate::core::domain::{CaseResult, Status, Verdict};

/// Verdicts in precedence order, highest first.
const PRECEDENCE: [Verdict; 4] = [
    Verdict::CompilationError,
    Verdict::RuntimeError,
    Verdict::TimeLimitExceeded,
    Verdict::WrongAnswer,
];

/// Reduces per-case results to the submission status.
///
/// Independent of result order. `case_count` is the number of cases the
/// submission was judged against; a short list made only of `Passed` results
/// is never `Accepted` and resolves to `RuntimeError`.
pub fn aggregate(results: &[CaseResult], case_count: usize) -> Status {
    PRECEDENCE
        .iter()
        .find(|verdict| results.iter().any(|r| r.verdict == **verdict))
        .map(|verdict| Status::from(*verdict))
        .unwrap_or_else(|| {
            if results.len() < case_count {
                Status::RuntimeError
            } else {
                Status::Accepted
            }
        })
}

/// True when evaluation stopped early with nothing in the results to explain
/// why. Worth an operator's attention: no evaluator path produces this.
pub fn is_unexplained_truncation(results: &[CaseResult], case_count: usize) -> bool {
    results.len() < case_count && results.iter().all(|r| r.verdict.is_passed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    fn result(index: usize, verdict: Verdict) -> CaseResult {
        CaseResult {
            index,
            verdict,
            actual_output: None,
            expected_output: None,
            error: None,
            elapsed_ms: 1,
        }
    }

    fn results(verdicts: &[Verdict]) -> Vec<CaseResult> {
        verdicts
            .iter()
            .enumerate()
            .map(|(i, v)| result(i, *v))
            .collect()
    }

    #[test]
    fn test_all_passed_is_accepted() {
        let results = results(&[Verdict::Passed, Verdict::Passed]);
        assert_eq!(aggregate(&results, 2), Status::Accepted);
    }

    #[test]
    fn test_single_wrong_answer() {
        let results = results(&[Verdict::Passed, Verdict::WrongAnswer, Verdict::Passed]);
        assert_eq!(aggregate(&results, 3), Status::WrongAnswer);
    }

    #[test]
    fn test_timeout_on_second_case() {
        let results = results(&[Verdict::Passed, Verdict::TimeLimitExceeded]);
        assert_eq!(aggregate(&results, 2), Status::TimeLimitExceeded);
    }

    #[test]
    fn test_compilation_error_truncated_list() {
        let results = results(&[Verdict::CompilationError]);
        assert_eq!(aggregate(&results, 2), Status::CompilationError);
        assert!(!is_unexplained_truncation(&results, 2));
    }

    #[test]
    fn test_precedence_order() {
        let cases = [
            (
                vec![
                    Verdict::WrongAnswer,
                    Verdict::RuntimeError,
                    Verdict::CompilationError,
                ],
                Status::CompilationError,
            ),
            (
                vec![
                    Verdict::TimeLimitExceeded,
                    Verdict::RuntimeError,
                    Verdict::WrongAnswer,
                ],
                Status::RuntimeError,
            ),
            (
                vec![Verdict::WrongAnswer, Verdict::TimeLimitExceeded],
                Status::TimeLimitExceeded,
            ),
            (
                vec![Verdict::Passed, Verdict::WrongAnswer],
                Status::WrongAnswer,
            ),
        ];

        for (verdicts, expected) in cases {
            let results = results(&verdicts);
            assert_eq!(aggregate(&results, verdicts.len()), expected);
        }
    }

    #[test]
    fn test_order_independence_over_permutations() {
        let verdicts = [
            Verdict::Passed,
            Verdict::WrongAnswer,
            Verdict::TimeLimitExceeded,
            Verdict::Passed,
            Verdict::RuntimeError,
        ];
        let expected = aggregate(&results(&verdicts), verdicts.len());

        for permutation in verdicts.iter().copied().permutations(verdicts.len()) {
            assert_eq!(
                aggregate(&results(&permutation), verdicts.len()),
                expected,
                "permutation {:?}",
                permutation
            );
        }
        assert_eq!(expected, Status::RuntimeError);
    }

    #[test]
    fn test_unexplained_truncation_is_never_accepted() {
        let results = results(&[Verdict::Passed]);

        assert_eq!(aggregate(&results, 3), Status::RuntimeError);
        assert!(is_unexplained_truncation(&results, 3));
    }

    #[test]
    fn test_fail_fast_truncation_keeps_explaining_verdict() {
        let results = results(&[Verdict::Passed, Verdict::WrongAnswer]);

        assert_eq!(aggregate(&results, 5), Status::WrongAnswer);
        assert!(!is_unexplained_truncation(&results, 5));
    }

    #[test]
    fn test_empty_case_list_is_vacuously_accepted() {
        assert_eq!(aggregate(&[], 0), Status::Accepted);
        assert_eq!(aggregate(&[], 1), Status::RuntimeError);
    }
}
