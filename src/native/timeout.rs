use std::time::Duration;

use crate::core::{
    domain::{FailureKind, FailureReason, ItemOutcome, WorkItem},
    traits::operation::Operation,
};

/// Fails an item with `FailureKind::Timeout` when `inner` takes longer
/// than `limit`.
#[derive(Clone, Debug)]
pub struct WithTimeout<O> {
    inner: O,
    limit: Duration,
}

impl<O> WithTimeout<O> {
    pub fn new(inner: O, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait::async_trait]
impl<O: Operation> Operation for WithTimeout<O> {
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        match tokio::time::timeout(self.limit, self.inner.execute(item)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FailureReason::new(
                FailureKind::Timeout,
                format!("exceeded {} ms", self.limit.as_millis()),
            )),
        }
    }
}
