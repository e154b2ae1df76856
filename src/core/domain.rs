use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type SubmissionId = Uuid;
pub type UserId = String;
pub type ProblemId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Cpp,
}

impl Language {
    pub fn all() -> &'static [Language] {
        &[
            Language::Python,
            Language::JavaScript,
            Language::Java,
            Language::Cpp,
        ]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "java" => Ok(Language::Java),
            "cpp" | "c++" => Ok(Language::Cpp),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub time_limit_ms: u64,
    pub compile_time_limit_ms: u64,
    pub memory_limit_mb: Option<u64>,
    pub stdout_limit_bytes: Option<u64>,
    pub stderr_limit_bytes: Option<u64>,
}

impl ExecutionLimits {
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.memory_limit_mb.map(|mb| mb * 1024 * 1024)
    }

    /// Longest a single sandbox call can legitimately take.
    pub fn per_case_ceiling(&self) -> Duration {
        Duration::from_millis(self.compile_time_limit_ms + self.time_limit_ms)
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            time_limit_ms: crate::constants::DEFAULT_TIME_LIMIT_MS,
            compile_time_limit_ms: crate::constants::DEFAULT_COMPILE_TIME_LIMIT_MS,
            memory_limit_mb: Some(crate::constants::DEFAULT_MEMORY_LIMIT_MB),
            stdout_limit_bytes: Some(crate::constants::DEFAULT_OUTPUT_LIMIT_BYTES),
            stderr_limit_bytes: Some(crate::constants::DEFAULT_OUTPUT_LIMIT_BYTES),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaseVisibility {
    Sample,
    Hidden,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    Passed,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompilationError,
}

impl Verdict {
    pub fn is_passed(self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Passed => "Passed",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::CompilationError => "Compilation Error",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseResult {
    pub index: usize,
    pub verdict: Verdict,
    pub actual_output: Option<String>,
    pub expected_output: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Status {
    #[default]
    Pending,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompilationError,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending | Status::Running)
    }
}

impl From<Verdict> for Status {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Passed => Status::Accepted,
            Verdict::WrongAnswer => Status::WrongAnswer,
            Verdict::TimeLimitExceeded => Status::TimeLimitExceeded,
            Verdict::RuntimeError => Status::RuntimeError,
            Verdict::CompilationError => Status::CompilationError,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Pending => "Pending",
            Status::Running => "Running",
            Status::Accepted => "Accepted",
            Status::WrongAnswer => "Wrong Answer",
            Status::TimeLimitExceeded => "Time Limit Exceeded",
            Status::RuntimeError => "Runtime Error",
            Status::CompilationError => "Compilation Error",
            Status::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// A formal judging of one source file against a problem's hidden cases.
///
/// Mutated only through `Submission::apply`; the
/// `failure` note is for operators and never shown to the submitting user.
#[derive(Clone, Debug)]
pub struct Submission {
    pub id: SubmissionId,
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub language: Language,
    pub source: String,
    pub status: Status,
    pub results: Vec<CaseResult>,
    pub case_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
}

impl Submission {
    pub fn new(
        user_id: UserId,
        problem_id: ProblemId,
        language: Language,
        source: String,
        case_count: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            problem_id,
            language,
            source,
            status: Status::Pending,
            results: Vec::new(),
            case_count,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure: None,
        }
    }
}

/// History entry, without the source code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionSummary {
    pub id: SubmissionId,
    pub problem_id: ProblemId,
    pub language: Language,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Submission> for SubmissionSummary {
    fn from(submission: &Submission) -> Self {
        Self {
            id: submission.id,
            problem_id: submission.problem_id.clone(),
            language: submission.language,
            status: submission.status,
            created_at: submission.created_at,
            completed_at: submission.completed_at,
        }
    }
}
