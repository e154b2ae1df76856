use std::sync::Arc;

use crate::constants::{
    INTERNAL_ERROR_MARKER, MEMORY_EXCEEDED_MARKER, STDERR_EXCEEDED_MARKER, STDOUT_EXCEEDED_MARKER,
    TIME_EXCEEDED_MARKER,
};
use crate::core::domain::{ExecutionLimits, Language};

/// One run of untrusted code. Built per call and never reused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: Language,
    pub source: Arc<str>,
    pub stdin: String,
    pub limits: ExecutionLimits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Time,
    Memory,
    StdoutSize,
    StderrSize,
}

impl LimitKind {
    pub fn marker(self) -> &'static str {
        match self {
            LimitKind::Time => TIME_EXCEEDED_MARKER,
            LimitKind::Memory => MEMORY_EXCEEDED_MARKER,
            LimitKind::StdoutSize => STDOUT_EXCEEDED_MARKER,
            LimitKind::StderrSize => STDERR_EXCEEDED_MARKER,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    CompileFailed,
    LimitExceeded(LimitKind),
    /// The judge itself failed; only produced when an infrastructure error is
    /// folded into an outcome for an ad-hoc run.
    Internal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub termination: Termination,
    pub elapsed_ms: u64,
}

impl ExecutionOutcome {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            termination: Termination::Exited(code),
            elapsed_ms: 0,
        }
    }

    pub fn compile_failed(diagnostics: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: diagnostics.into(),
            termination: Termination::CompileFailed,
            elapsed_ms: 0,
        }
    }

    pub fn limit_exceeded(kind: LimitKind) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            termination: Termination::LimitExceeded(kind),
            elapsed_ms: 0,
        }
    }

    pub fn internal(error: &SandboxError) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("{}: {}", INTERNAL_ERROR_MARKER, error),
            termination: Termination::Internal,
            elapsed_ms: 0,
        }
    }

    pub fn with_elapsed(self, elapsed_ms: u64) -> Self {
        Self { elapsed_ms, ..self }
    }

    pub fn is_timeout(&self) -> bool {
        self.termination == Termination::LimitExceeded(LimitKind::Time)
    }

    pub fn is_compile_failure(&self) -> bool {
        self.termination == Termination::CompileFailed
    }

    pub fn is_clean_exit(&self) -> bool {
        self.termination == Termination::Exited(0)
    }
}

/// Failures of the execution backend itself, never of the submitted code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox unavailable: {msg}")]
    Unavailable { msg: String },
    #[error("toolchain `{program}` could not be started: {msg}")]
    Toolchain { program: String, msg: String },
    #[error("sandbox workspace error: {msg}")]
    Workspace { msg: String },
}

impl SandboxError {
    /// Transient failures the pool may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SandboxError::Unavailable { .. })
    }
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait Sandbox: std::fmt::Debug + Send + Sync {
    /// Compiles (when the language needs it) and runs `request.source` once.
    ///
    /// Must return within the request's limits. Code-caused failures are
    /// reported through [`ExecutionOutcome::termination`]; `Err` is reserved
    /// for backend failures.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_flags() {
        assert!(ExecutionOutcome::limit_exceeded(LimitKind::Time).is_timeout());
        assert!(!ExecutionOutcome::limit_exceeded(LimitKind::Memory).is_timeout());
        assert!(ExecutionOutcome::compile_failed("boom").is_compile_failure());
        assert!(ExecutionOutcome::exited(0, "ok", "").is_clean_exit());
        assert!(!ExecutionOutcome::exited(1, "", "").is_clean_exit());
    }

    #[test]
    fn test_internal_outcome_carries_marker() {
        let error = SandboxError::Unavailable {
            msg: "no workers".to_string(),
        };
        let outcome = ExecutionOutcome::internal(&error);

        assert_eq!(outcome.termination, Termination::Internal);
        assert!(outcome.stderr.starts_with(INTERNAL_ERROR_MARKER));
        assert!(outcome.stderr.contains("no workers"));
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(SandboxError::Unavailable { msg: String::new() }.is_transient());
        assert!(
            !SandboxError::Toolchain {
                program: "g++".to_string(),
                msg: String::new()
            }
            .is_transient()
        );
    }
}
