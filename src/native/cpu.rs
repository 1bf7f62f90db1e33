use std::hint::black_box;

use crate::core::{
    domain::{FailureReason, ItemOutcome, WorkItem},
    traits::operation::Operation,
};

/// Burns `iterations` rounds of integer arithmetic per item on the blocking
/// thread pool.
#[derive(Clone, Debug)]
pub struct CpuBurn {
    iterations: u64,
}

impl CpuBurn {
    pub fn new(iterations: u64) -> Self {
        Self { iterations }
    }
}

fn burn(seed: u64, iterations: u64) -> u64 {
    let mut acc = seed;
    for i in 0..iterations {
        acc = acc.wrapping_add(i.wrapping_mul(i));
        acc = acc.wrapping_mul(31);
        acc = acc.rotate_left(7) ^ 0x0123_4567_89AB_CDEF;
    }
    acc
}

#[async_trait::async_trait]
impl Operation for CpuBurn {
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        let iterations = self.iterations;
        let acc = tokio::task::spawn_blocking(move || {
            black_box(burn(black_box(item.index as u64), iterations))
        })
        .await
        .map_err(|e| FailureReason::internal(e.to_string()))?;

        tracing::trace!(%item, acc, "Burn finished");
        Ok(())
    }
}
