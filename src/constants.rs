/// Maximum number of distinct failure reasons kept in a `RunResult`.
/// Failures past this point are only counted.
pub const FAILURE_RETENTION_CAP: usize = 32;

pub const DEFAULT_ITEMS: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 10;

pub const DEFAULT_CPU_ITERATIONS: u64 = 10_000_000;
pub const DEFAULT_MEMORY_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_DISK_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Stride used when committing freshly allocated buffers.
pub const PAGE_SIZE: usize = 4096;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;
