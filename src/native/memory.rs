use std::hint::black_box;
use std::time::Duration;

use crate::{
    constants::PAGE_SIZE,
    core::{
        domain::{FailureKind, FailureReason, ItemOutcome, WorkItem},
        traits::operation::Operation,
    },
};

/// Allocates `bytes_per_item` bytes per item, commits every page, keeps the
/// buffer alive for `hold` and then frees it.
#[derive(Clone, Debug)]
pub struct MemoryHog {
    bytes_per_item: usize,
    hold: Duration,
}

impl MemoryHog {
    pub fn new(bytes_per_item: usize, hold: Duration) -> Self {
        Self {
            bytes_per_item,
            hold,
        }
    }
}

// Touch pages so they are actually backed by physical memory
fn touch(buf: &mut [u8]) {
    for page in buf.chunks_mut(PAGE_SIZE) {
        page[0] = page[0].wrapping_add(0x5A);
    }
}

fn allocate(bytes: usize) -> Result<Vec<u8>, FailureReason> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes).map_err(|e| {
        FailureReason::new(
            FailureKind::Allocation,
            format!("cannot allocate {bytes} bytes: {e}"),
        )
    })?;
    buf.resize(bytes, 0);
    touch(&mut buf);
    Ok(buf)
}

#[async_trait::async_trait]
impl Operation for MemoryHog {
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        let bytes = self.bytes_per_item;
        let buf = tokio::task::spawn_blocking(move || allocate(bytes))
            .await
            .map_err(|e| FailureReason::internal(e.to_string()))??;

        tracing::trace!(%item, bytes = buf.len(), "Holding allocation");
        tokio::time::sleep(self.hold).await;
        black_box(&buf);

        Ok(())
    }
}
