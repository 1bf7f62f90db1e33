use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc::Receiver;

use crate::{
    constants::{
        DEFAULT_CONCURRENCY, DEFAULT_CPU_ITERATIONS, DEFAULT_DISK_BYTES,
        DEFAULT_HTTP_TIMEOUT_MS, DEFAULT_ITEMS, DEFAULT_MEMORY_BYTES,
    },
    core::{
        domain::{CancelPolicy, RunConfig, RunEvent, RunResult},
        error::RunnerError,
        traits::operation::Operation,
    },
    native::{
        cpu::CpuBurn, disk::DiskIo, memory::MemoryHog, network::HttpFetch, timeout::WithTimeout,
    },
    stubs::operation::{OperationStub, ParityStub},
};

/// Saturate one resource with a bounded number of concurrent work items.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Total number of work items
    #[arg(short = 'n', long, global = true, default_value_t = DEFAULT_ITEMS)]
    pub items: usize,

    /// Maximum number of items in flight at once
    #[arg(short = 'k', long, global = true, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Fail any single item that runs longer than this
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Abort in-flight items on Ctrl-C instead of waiting for them
    #[arg(long, global = true)]
    pub abandon: bool,

    /// Log progress while the run is underway
    #[arg(long, global = true)]
    pub progress: bool,

    #[command(subcommand)]
    pub workload: Workload,
}

#[derive(Subcommand, Debug)]
pub enum Workload {
    /// Integer arithmetic on the blocking thread pool
    Cpu {
        /// Arithmetic rounds per item
        #[arg(long, default_value_t = DEFAULT_CPU_ITERATIONS)]
        iterations: u64,
    },
    /// Allocate and hold a buffer per item
    Memory {
        /// Bytes allocated per item
        #[arg(long, default_value_t = DEFAULT_MEMORY_BYTES)]
        bytes: usize,

        /// How long each buffer is held before release
        #[arg(long, default_value_t = 100)]
        hold_ms: u64,
    },
    /// Write, read back and delete a file per item
    Disk {
        /// Directory for the scratch files (default: system temp directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Bytes written per item
        #[arg(long, default_value_t = DEFAULT_DISK_BYTES)]
        bytes: usize,
    },
    /// One GET request per item
    Network {
        #[arg(long)]
        url: String,

        /// Client-side timeout of each request
        #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT_MS)]
        request_timeout_ms: u64,
    },
    /// Sleep per item, without touching any resource
    Sleep {
        #[arg(long, default_value_t = 10)]
        delay_ms: u64,

        /// Fail every odd item
        #[arg(long)]
        alternate: bool,
    },
}

impl Workload {
    fn operation(&self) -> Result<Arc<dyn Operation>, RunnerError> {
        let operation: Arc<dyn Operation> = match self {
            Workload::Cpu { iterations } => Arc::new(CpuBurn::new(*iterations)),
            Workload::Memory { bytes, hold_ms } => {
                Arc::new(MemoryHog::new(*bytes, Duration::from_millis(*hold_ms)))
            }
            Workload::Disk { dir, bytes } => {
                let dir = dir
                    .clone()
                    .unwrap_or_else(|| std::env::temp_dir().join("bottleneck-runner"));
                Arc::new(DiskIo::new(dir, *bytes))
            }
            Workload::Network {
                url,
                request_timeout_ms,
            } => Arc::new(HttpFetch::new(
                url,
                Duration::from_millis(*request_timeout_ms),
            )?),
            Workload::Sleep {
                delay_ms,
                alternate: false,
            } => Arc::new(OperationStub::new(Ok(()), Duration::from_millis(*delay_ms))),
            Workload::Sleep {
                delay_ms,
                alternate: true,
            } => Arc::new(ParityStub::new(Duration::from_millis(*delay_ms))),
        };

        Ok(operation)
    }
}

impl Args {
    pub fn run_config(&self) -> Result<RunConfig, RunnerError> {
        let mut operation = self.workload.operation()?;
        if let Some(timeout_ms) = self.timeout_ms {
            operation = Arc::new(WithTimeout::new(
                operation,
                Duration::from_millis(timeout_ms),
            ));
        }

        let cancel_policy = if self.abandon {
            CancelPolicy::Abandon
        } else {
            CancelPolicy::Drain
        };

        Ok(RunConfig::new(self.items, self.concurrency, operation).with_cancel_policy(cancel_policy))
    }
}

/// Logs completions from `events` about every tenth of `items`, until the
/// channel closes. Returns the number of completions seen.
pub async fn log_progress(mut events: Receiver<RunEvent>, items: usize) -> usize {
    let step = (items / 10).max(1);
    let mut completed = 0;
    let mut failed = 0;

    while let Some(event) = events.recv().await {
        let RunEvent::Completed { outcome, .. } = event else {
            continue;
        };
        completed += 1;
        if outcome.is_err() {
            failed += 1;
        }
        if completed % step == 0 || completed == items {
            tracing::info!(completed, failed, items, "Progress");
        }
    }

    completed
}

pub fn print_result(result: &RunResult) {
    println!("started:   {}", result.started_at.to_rfc3339());
    println!("succeeded: {}", result.succeeded);
    println!("failed:    {}", result.failed);
    println!("elapsed:   {:.3}s", result.elapsed.as_secs_f64());
    println!("cancelled: {}", result.cancelled);

    for entry in result.failures.entries() {
        match entry.first_item {
            Some(item) => println!("  {} x{} (first at {})", entry.reason, entry.occurrences, item),
            None => println!("  {} x{}", entry.reason, entry.occurrences),
        }
    }
    if result.failures.overflow() > 0 {
        println!("  ... {} more failures not retained", result.failures.overflow());
    }
}

pub fn exit_code(result: &RunResult) -> ExitCode {
    if result.cancelled {
        ExitCode::from(2)
    } else if result.failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
