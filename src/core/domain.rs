use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{failures::FailureLog, traits::operation::Operation};

/// One unit of dispatched work, identified by its position in the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem {
    pub index: usize,
}

impl WorkItem {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    Io,
    Allocation,
    Network,
    Status,
    Verification,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Io => "io",
            FailureKind::Allocation => "allocation",
            FailureKind::Network => "network",
            FailureKind::Status => "status",
            FailureKind::Verification => "verification",
            FailureKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Why a single work item did not succeed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct FailureReason {
    pub kind: FailureKind,
    pub detail: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, detail)
    }
}

impl From<std::io::Error> for FailureReason {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => FailureKind::Timeout,
            std::io::ErrorKind::OutOfMemory => FailureKind::Allocation,
            _ => FailureKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

pub type ItemOutcome = Result<(), FailureReason>;

/// What happens to in-flight items once cancellation is observed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Wait for in-flight items and record their outcomes.
    #[default]
    Drain,
    /// Abort in-flight items; they are not counted.
    Abandon,
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub items: usize,
    pub concurrency: usize,
    pub operation: Arc<dyn Operation>,
    pub cancel_policy: CancelPolicy,
}

impl RunConfig {
    pub fn new(items: usize, concurrency: usize, operation: Arc<dyn Operation>) -> Self {
        Self {
            items,
            concurrency,
            operation,
            cancel_policy: CancelPolicy::default(),
        }
    }

    pub fn with_cancel_policy(self, cancel_policy: CancelPolicy) -> Self {
        Self {
            cancel_policy,
            ..self
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunResult {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub failures: FailureLog,
    pub cancelled: bool,
}

impl RunResult {
    pub fn empty(started_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            started_at,
            succeeded: 0,
            failed: 0,
            elapsed: Duration::ZERO,
            failures: FailureLog::default(),
            cancelled: false,
        }
    }

    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed == 0
    }
}

/// Progress notifications emitted while a run is underway.
#[derive(Clone, Debug)]
pub enum RunEvent {
    Dispatched { item: WorkItem },
    Completed { item: WorkItem, outcome: ItemOutcome },
}
