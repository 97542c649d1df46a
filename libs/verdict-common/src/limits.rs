/// Safety limits applied to every request before any resource is acquired

/// Total bytes across all submitted files
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

/// Serialized size of a single test case input
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Wall-clock budget per test case when a language does not configure one
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Heap ceiling for the in-process sandbox
pub const DEFAULT_SANDBOX_MEMORY_MB: u32 = 32;
