use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ADMISSION_TIMEOUT_MS, DEFAULT_COMPILE_TIME_LIMIT_MS, DEFAULT_DEADLINE_OVERHEAD_MS,
    DEFAULT_MEMORY_LIMIT_MB, DEFAULT_OUTPUT_LIMIT_BYTES, DEFAULT_RESULT_OUTPUT_BYTES,
    DEFAULT_SANDBOX_RETRIES, DEFAULT_TIME_LIMIT_MS, RETRY_BACKOFF_MS,
};
use crate::core::domain::ExecutionLimits;
use crate::core::orchestrator::JudgeSettings;
use crate::core::pool::PoolSettings;
use crate::native::toolchain::Toolchain;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value {value:?} for {key}: expected {expected}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Judge configuration.
/// Provides defaults with `JUDGE_*` environment variable overrides.
/// A zero memory or output limit disables it; a zero admission timeout
/// waits for a sandbox slot indefinitely.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeConfig {
    pub pool_size: usize,
    pub admission_timeout_ms: u64,
    pub sandbox_retries: u32,
    pub time_limit_ms: u64,
    pub compile_time_limit_ms: u64,
    pub memory_limit_mb: u64,
    pub output_limit_bytes: u64,
    pub fail_fast: bool,
    pub case_parallelism: usize,
    pub reveal_hidden_output: bool,
    pub stderr_is_error: bool,
    pub result_output_bytes: usize,
    pub deadline_overhead_ms: u64,
    pub work_dir: PathBuf,
    pub toolchain: Toolchain,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            admission_timeout_ms: DEFAULT_ADMISSION_TIMEOUT_MS,
            sandbox_retries: DEFAULT_SANDBOX_RETRIES,
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            compile_time_limit_ms: DEFAULT_COMPILE_TIME_LIMIT_MS,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            fail_fast: false,
            case_parallelism: 1,
            reveal_hidden_output: false,
            stderr_is_error: true,
            result_output_bytes: DEFAULT_RESULT_OUTPUT_BYTES,
            deadline_overhead_ms: DEFAULT_DEADLINE_OVERHEAD_MS,
            work_dir: env::temp_dir().join("codejudge"),
            toolchain: Toolchain::default(),
        }
    }
}

impl JudgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);

        let config = Self {
            pool_size: parse(&lookup, "JUDGE_POOL_SIZE", defaults.pool_size)?,
            admission_timeout_ms: parse(
                &lookup,
                "JUDGE_ADMISSION_TIMEOUT_MS",
                defaults.admission_timeout_ms,
            )?,
            sandbox_retries: parse(&lookup, "JUDGE_SANDBOX_RETRIES", defaults.sandbox_retries)?,
            time_limit_ms: parse(&lookup, "JUDGE_TIME_LIMIT_MS", defaults.time_limit_ms)?,
            compile_time_limit_ms: parse(
                &lookup,
                "JUDGE_COMPILE_TIME_LIMIT_MS",
                defaults.compile_time_limit_ms,
            )?,
            memory_limit_mb: parse(&lookup, "JUDGE_MEMORY_LIMIT_MB", defaults.memory_limit_mb)?,
            output_limit_bytes: parse(
                &lookup,
                "JUDGE_OUTPUT_LIMIT_BYTES",
                defaults.output_limit_bytes,
            )?,
            fail_fast: flag(&lookup, "JUDGE_FAIL_FAST", defaults.fail_fast)?,
            case_parallelism: parse(
                &lookup,
                "JUDGE_CASE_PARALLELISM",
                defaults.case_parallelism,
            )?,
            reveal_hidden_output: flag(
                &lookup,
                "JUDGE_REVEAL_HIDDEN_OUTPUT",
                defaults.reveal_hidden_output,
            )?,
            stderr_is_error: flag(&lookup, "JUDGE_STDERR_IS_ERROR", defaults.stderr_is_error)?,
            result_output_bytes: parse(
                &lookup,
                "JUDGE_RESULT_OUTPUT_BYTES",
                defaults.result_output_bytes,
            )?,
            deadline_overhead_ms: parse(
                &lookup,
                "JUDGE_DEADLINE_OVERHEAD_MS",
                defaults.deadline_overhead_ms,
            )?,
            work_dir: path("JUDGE_WORK_DIR", defaults.work_dir),
            toolchain: Toolchain {
                python: path("JUDGE_PYTHON", defaults.toolchain.python),
                node: path("JUDGE_NODE", defaults.toolchain.node),
                javac: path("JUDGE_JAVAC", defaults.toolchain.javac),
                java: path("JUDGE_JAVA", defaults.toolchain.java),
                gxx: path("JUDGE_GXX", defaults.toolchain.gxx),
            },
        };

        if config.pool_size == 0 {
            return Err(ConfigError {
                key: "JUDGE_POOL_SIZE",
                value: "0".to_string(),
                expected: "a positive integer",
            });
        }
        Ok(config)
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            time_limit_ms: self.time_limit_ms,
            compile_time_limit_ms: self.compile_time_limit_ms,
            memory_limit_mb: non_zero(self.memory_limit_mb),
            stdout_limit_bytes: non_zero(self.output_limit_bytes),
            stderr_limit_bytes: non_zero(self.output_limit_bytes),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            capacity: self.pool_size,
            admission_timeout: non_zero(self.admission_timeout_ms).map(Duration::from_millis),
            sandbox_retries: self.sandbox_retries,
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_MS),
        }
    }

    pub fn judge_settings(&self) -> JudgeSettings {
        JudgeSettings {
            fail_fast: self.fail_fast,
            case_parallelism: self.case_parallelism,
            reveal_hidden_output: self.reveal_hidden_output,
            stderr_is_error: self.stderr_is_error,
            result_output_bytes: self.result_output_bytes,
            limits: self.limits(),
            deadline_overhead: Duration::from_millis(self.deadline_overhead_ms),
        }
    }
}

fn non_zero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError {
            key,
            value,
            expected: "a non-negative integer",
        }),
    }
}

fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError {
                key,
                value,
                expected: "a boolean",
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = JudgeConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, JudgeConfig::default());
        assert_eq!(config.time_limit_ms, 2000);
        assert_eq!(config.memory_limit_mb, 256);
        assert!(!config.fail_fast);
        assert!(config.stderr_is_error);
        assert_eq!(config.toolchain.gxx, PathBuf::from("g++"));
    }

    #[test]
    fn test_overrides() {
        let config = JudgeConfig::from_lookup(lookup(&[
            ("JUDGE_POOL_SIZE", "8"),
            ("JUDGE_FAIL_FAST", "true"),
            ("JUDGE_CASE_PARALLELISM", " 4 "),
            ("JUDGE_STDERR_IS_ERROR", "off"),
            ("JUDGE_WORK_DIR", "/var/lib/judge"),
            ("JUDGE_PYTHON", "/usr/bin/python3.12"),
        ]))
        .unwrap();

        assert_eq!(config.pool_size, 8);
        assert!(config.fail_fast);
        assert_eq!(config.case_parallelism, 4);
        assert!(!config.stderr_is_error);
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/judge"));
        assert_eq!(
            config.toolchain.python,
            PathBuf::from("/usr/bin/python3.12")
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let error = JudgeConfig::from_lookup(lookup(&[("JUDGE_TIME_LIMIT_MS", "fast")]))
            .unwrap_err();
        assert_eq!(error.key, "JUDGE_TIME_LIMIT_MS");
        assert_eq!(error.value, "fast");

        let error = JudgeConfig::from_lookup(lookup(&[("JUDGE_FAIL_FAST", "maybe")]))
            .unwrap_err();
        assert_eq!(error.expected, "a boolean");

        let error = JudgeConfig::from_lookup(lookup(&[("JUDGE_POOL_SIZE", "0")])).unwrap_err();
        assert_eq!(error.key, "JUDGE_POOL_SIZE");
    }

    #[test]
    fn test_zero_disables_limits() {
        let config = JudgeConfig::from_lookup(lookup(&[
            ("JUDGE_MEMORY_LIMIT_MB", "0"),
            ("JUDGE_OUTPUT_LIMIT_BYTES", "0"),
            ("JUDGE_ADMISSION_TIMEOUT_MS", "0"),
        ]))
        .unwrap();

        let limits = config.limits();
        assert_eq!(limits.memory_limit_mb, None);
        assert_eq!(limits.stdout_limit_bytes, None);
        assert_eq!(config.pool_settings().admission_timeout, None);
    }

    #[test]
    fn test_settings_carry_limits() {
        let config = JudgeConfig::from_lookup(lookup(&[
            ("JUDGE_TIME_LIMIT_MS", "1500"),
            ("JUDGE_SANDBOX_RETRIES", "3"),
        ]))
        .unwrap();

        assert_eq!(config.judge_settings().limits.time_limit_ms, 1500);
        assert_eq!(config.pool_settings().sandbox_retries, 3);
        assert_eq!(
            config.pool_settings().admission_timeout,
            Some(Duration::from_millis(DEFAULT_ADMISSION_TIMEOUT_MS))
        );
    }
}
