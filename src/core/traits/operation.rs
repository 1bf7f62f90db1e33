use std::sync::Arc;

use crate::core::domain::{ItemOutcome, WorkItem};

/// The work performed for each item of a run.
///
/// Implementations must tolerate being called concurrently for different
/// items. The runner never retries, so an operation that wants retries has to
/// do them itself.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Operation: std::fmt::Debug + Send + Sync {
    async fn execute(&self, item: WorkItem) -> ItemOutcome;
}

#[async_trait::async_trait]
impl<T: Operation + ?Sized> Operation for Arc<T> {
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        (**self).execute(item).await
    }
}
