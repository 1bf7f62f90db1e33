use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{
    domain::{FailureReason, ItemOutcome, WorkItem},
    traits::operation::Operation,
};

/// Returns the same outcome for every item after a fixed delay.
#[derive(Debug, Clone)]
pub struct OperationStub {
    result: ItemOutcome,
    delay: Duration,
}

impl OperationStub {
    pub fn new(result: ItemOutcome, delay: Duration) -> Self {
        Self { result, delay }
    }
}

#[async_trait::async_trait]
impl Operation for OperationStub {
    #[tracing::instrument]
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        tokio::time::sleep(self.delay).await;
        tracing::trace!("Stub result: {:?}", self.result);

        self.result.clone()
    }
}

/// Succeeds on even indices and fails on odd ones.
#[derive(Debug, Clone)]
pub struct ParityStub {
    delay: Duration,
}

impl ParityStub {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl Operation for ParityStub {
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        tokio::time::sleep(self.delay).await;
        if item.index % 2 == 0 {
            Ok(())
        } else {
            Err(FailureReason::internal("odd index"))
        }
    }
}

/// Records how many executions overlap and which items were executed.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<WorkItem>>,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Highest number of simultaneous executions observed so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Every executed item, in execution start order.
    pub fn seen(&self) -> Vec<WorkItem> {
        match self.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl Operation for ConcurrencyProbe {
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(item);
        }

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
