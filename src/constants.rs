pub const DEFAULT_TIME_LIMIT_MS: u64 = 2_000;
pub const DEFAULT_COMPILE_TIME_LIMIT_MS: u64 = 10_000;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_RESULT_OUTPUT_BYTES: usize = 64 * 1024;
pub const DEFAULT_ADMISSION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DEADLINE_OVERHEAD_MS: u64 = 5_000;
pub const DEFAULT_SANDBOX_RETRIES: u32 = 1;

pub const MEMORY_EXCEEDED_MARKER: &str = "Memory limit exceeded";
pub const TIME_EXCEEDED_MARKER: &str = "Time limit exceeded";
pub const STDOUT_EXCEEDED_MARKER: &str = "Output limit exceeded";
pub const STDERR_EXCEEDED_MARKER: &str = "Error output limit exceeded";
pub const INTERNAL_ERROR_MARKER: &str = "Internal judging error";

pub const RETRY_BACKOFF_MS: u64 = 100;
pub const UPDATES_CHANNEL_CAPACITY: usize = 16;
pub const MEMORY_POLL_INTERVAL_MS: u64 = 10;
pub const READ_CHUNK_BYTES: usize = 8 * 1024;
