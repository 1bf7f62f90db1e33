use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::{FutureExt, stream::FuturesUnordered};
use tokio::{
    sync::mpsc::{self, Receiver, Sender, error::TrySendError},
    task::JoinError,
};
use tokio_stream::StreamExt;
use tokio_util::{sync::CancellationToken, task::AbortOnDropHandle};

use crate::{
    constants::EVENT_CHANNEL_CAPACITY,
    core::{
        domain::{
            CancelPolicy, FailureReason, ItemOutcome, RunConfig, RunEvent, RunResult, WorkItem,
        },
        error::RunnerError,
        traits::operation::Operation,
    },
};

// Handles abort their task when dropped, so no item outlives the run future.
type InFlight = FuturesUnordered<AbortOnDropHandle<(WorkItem, ItemOutcome)>>;

/// Runs every item of a `RunConfig` exactly once, with at most
/// `concurrency` items in flight at any time.
///
/// Completions are aggregated by the dispatch loop itself, so no state is
/// shared between the items and the runner.
#[derive(Clone, Debug, Default)]
pub struct BoundedTaskRunner {
    events: Option<Sender<RunEvent>>,
}

impl BoundedTaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports every dispatch and completion on `events`. A dropped receiver
    /// does not affect the run. While the channel is full the runner waits
    /// for room, unless cancellation is requested, in which case the event is
    /// dropped.
    pub fn with_events(events: Sender<RunEvent>) -> Self {
        Self {
            events: Some(events),
        }
    }

    /// Same as `with_events`, over a fresh channel of
    /// `EVENT_CHANNEL_CAPACITY` events.
    pub fn with_event_channel() -> (Self, Receiver<RunEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self::with_events(events_tx), events_rx)
    }

    #[tracing::instrument(skip_all, fields(items = config.items, concurrency = config.concurrency))]
    pub async fn run(
        &self,
        config: RunConfig,
        cancel: &CancellationToken,
    ) -> Result<RunResult, RunnerError> {
        let RunConfig {
            items,
            concurrency,
            operation,
            cancel_policy,
        } = config;

        if items > 0 && concurrency == 0 {
            return Err(RunnerError::InvalidConfiguration { items, concurrency });
        }

        let mut result = RunResult::empty(chrono::Utc::now());
        if items == 0 {
            tracing::debug!("Nothing to dispatch");
            return Ok(result);
        }

        let concurrency = concurrency.min(items);
        let mut in_flight = InFlight::new();
        let mut next = 0;
        let started = Instant::now();
        let mut finished = started;

        loop {
            if !result.cancelled && cancel.is_cancelled() {
                tracing::info!(dispatched = next, "Cancellation requested");
                result.cancelled = true;
            }

            if result.cancelled && cancel_policy == CancelPolicy::Abandon {
                tracing::info!(abandoned = in_flight.len(), "Abandoning in-flight items");
                in_flight.clear();
                break;
            }

            while !result.cancelled
                && !cancel.is_cancelled()
                && in_flight.len() < concurrency
                && next < items
            {
                self.dispatch(&mut in_flight, &operation, WorkItem::new(next), cancel)
                    .await;
                next += 1;
            }

            if in_flight.is_empty() {
                // dispatch stopped early on a cancellation not yet recorded
                if next < items && !result.cancelled {
                    continue;
                }
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !result.cancelled => {}
                Some(joined) = in_flight.next() => {
                    finished = Instant::now();
                    self.record(&mut result, joined, cancel).await;
                }
                else => break,
            }
        }

        result.elapsed = finished.duration_since(started);
        tracing::info!(
            succeeded = result.succeeded,
            failed = result.failed,
            cancelled = result.cancelled,
            elapsed = ?result.elapsed,
            "Run finished"
        );

        Ok(result)
    }

    async fn dispatch(
        &self,
        in_flight: &mut InFlight,
        operation: &Arc<dyn Operation>,
        item: WorkItem,
        cancel: &CancellationToken,
    ) {
        tracing::debug!(%item, "Dispatching item");
        self.emit(RunEvent::Dispatched { item }, cancel).await;

        let operation = Arc::clone(operation);
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(operation.execute(item))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(FailureReason::internal(panic_message(panic.as_ref())))
                });
            (item, outcome)
        });
        in_flight.push(AbortOnDropHandle::new(handle));
    }

    async fn record(
        &self,
        result: &mut RunResult,
        joined: Result<(WorkItem, ItemOutcome), JoinError>,
        cancel: &CancellationToken,
    ) {
        match joined {
            Ok((item, outcome)) => {
                match &outcome {
                    Ok(()) => {
                        tracing::debug!(%item, "Item succeeded");
                        result.succeeded += 1;
                    }
                    Err(reason) => {
                        tracing::warn!(%item, %reason, "Item failed");
                        result.failed += 1;
                        result.failures.record(Some(item), reason.clone());
                    }
                }
                self.emit(RunEvent::Completed { item, outcome }, cancel)
                    .await;
            }
            Err(err) => {
                tracing::error!("Lost an in-flight item: {}", err);
                result.failed += 1;
                result
                    .failures
                    .record(None, FailureReason::internal(err.to_string()));
            }
        }
    }

    async fn emit(&self, event: RunEvent, cancel: &CancellationToken) {
        let Some(events) = &self.events else {
            return;
        };

        match events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => tracing::trace!("Event receiver dropped"),
            Err(TrySendError::Full(event)) => {
                tokio::select! {
                    sent = events.send(event) => {
                        if sent.is_err() {
                            tracing::trace!("Event receiver dropped");
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::trace!("Event channel full after cancellation, dropping event");
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let msg = if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown payload"
    };
    format!("operation panicked: {msg}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        domain::FailureKind,
        traits::operation::MockOperation,
    };
    use crate::stubs::operation::{ConcurrencyProbe, OperationStub, ParityStub};
    use itertools::Itertools;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Cancels `token` once `after` items have finished executing.
    #[derive(Debug)]
    struct CancelAfter {
        token: CancellationToken,
        after: usize,
        done: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Operation for CancelAfter {
        async fn execute(&self, _item: WorkItem) -> ItemOutcome {
            tokio::time::sleep(Duration::from_millis(2)).await;
            if self.done.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.token.cancel();
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct PanicsOn {
        index: usize,
    }

    #[async_trait::async_trait]
    impl Operation for PanicsOn {
        async fn execute(&self, item: WorkItem) -> ItemOutcome {
            if item.index == self.index {
                panic!("boom");
            }
            Ok(())
        }
    }

    /// Counts items whose execution ran to completion.
    #[derive(Debug)]
    struct FinishCounter {
        delay: Duration,
        finished: AtomicUsize,
    }

    impl FinishCounter {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                finished: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Operation for FinishCounter {
        async fn execute(&self, _item: WorkItem) -> ItemOutcome {
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn cancel_after(cancel: &CancellationToken, delay: Duration) {
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.cancel();
        });
    }

    async fn run(config: RunConfig) -> Result<RunResult, RunnerError> {
        BoundedTaskRunner::new()
            .run(config, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_all_items_succeed_within_cap() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::from_millis(5)));
        let operation: Arc<dyn Operation> = probe.clone();

        let result = run(RunConfig::new(10, 3, operation)).await.unwrap();

        assert_eq!(result.succeeded, 10);
        assert_eq!(result.failed, 0);
        assert!(!result.cancelled);
        assert!(result.is_success());
        assert!(result.failures.is_empty());
        assert_eq!(probe.peak(), 3);
    }

    #[tokio::test]
    async fn test_each_item_dispatched_exactly_once() {
        let mut operation = MockOperation::new();
        operation
            .expect_execute()
            .withf(|item| item.index < 7)
            .times(7)
            .returning(|_| Ok(()));

        let result = run(RunConfig::new(7, 2, Arc::new(operation))).await.unwrap();

        assert_eq!(result.succeeded, 7);
    }

    #[tokio::test]
    async fn test_dispatch_order_is_sequential() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::ZERO));
        let operation: Arc<dyn Operation> = probe.clone();

        run(RunConfig::new(12, 1, operation)).await.unwrap();

        let seen = probe.seen().into_iter().map(|item| item.index).collect_vec();
        assert_eq!(seen, (0..12).collect_vec());
    }

    #[tokio::test]
    async fn test_parity_outcomes() {
        let operation = Arc::new(ParityStub::new(Duration::from_millis(1)));

        let result = run(RunConfig::new(5, 2, operation)).await.unwrap();

        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 2);
        assert!(!result.is_success());
        let entries = result.failures.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].occurrences, 2);
        assert_eq!(entries[0].first_item.map(|item| item.index % 2), Some(1));
    }

    #[tokio::test]
    async fn test_all_items_fail() {
        let mut operation = MockOperation::new();
        operation
            .expect_execute()
            .times(8)
            .return_const(Err(FailureReason::new(FailureKind::Io, "disk full")));

        let result = run(RunConfig::new(8, 4, Arc::new(operation))).await.unwrap();

        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 8);
        assert_eq!(result.failures.total(), 8);
        assert_eq!(
            result.failures.entries()[0].reason,
            FailureReason::new(FailureKind::Io, "disk full")
        );
    }

    #[tokio::test]
    async fn test_zero_items_dispatch_nothing() {
        let mut operation = MockOperation::new();
        operation.expect_execute().never();

        let result = run(RunConfig::new(0, 0, Arc::new(operation))).await.unwrap();

        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 0);
        assert_eq!(result.elapsed, Duration::ZERO);
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let mut operation = MockOperation::new();
        operation.expect_execute().never();

        let err = run(RunConfig::new(3, 0, Arc::new(operation)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunnerError::InvalidConfiguration {
                items: 3,
                concurrency: 0
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrency_clamped_to_items() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::from_millis(5)));
        let operation: Arc<dyn Operation> = probe.clone();

        let result = run(RunConfig::new(2, 50, operation)).await.unwrap();

        assert_eq!(result.succeeded, 2);
        assert!(probe.peak() <= 2);
    }

    #[tokio::test]
    async fn test_panicking_item_is_recorded() {
        let result = run(RunConfig::new(5, 2, Arc::new(PanicsOn { index: 2 })))
            .await
            .unwrap();

        assert_eq!(result.succeeded, 4);
        assert_eq!(result.failed, 1);
        let entry = &result.failures.entries()[0];
        assert_eq!(entry.reason.kind, FailureKind::Internal);
        assert!(entry.reason.detail.contains("boom"));
        assert_eq!(entry.first_item, Some(WorkItem::new(2)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut operation = MockOperation::new();
        operation.expect_execute().never();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = BoundedTaskRunner::new()
            .run(RunConfig::new(4, 2, Arc::new(operation)), &cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.completed(), 0);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_cancel_after_completions_drains_in_flight() {
        let (after, concurrency) = (10, 4);
        let cancel = CancellationToken::new();
        let operation = Arc::new(CancelAfter {
            token: cancel.clone(),
            after,
            done: AtomicUsize::new(0),
        });

        let result = BoundedTaskRunner::new()
            .run(RunConfig::new(100, concurrency, operation), &cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert!(result.completed() >= after);
        assert!(result.completed() <= after + concurrency);
        assert_eq!(result.failed, 0);
    }

    #[tokio::test]
    async fn test_cancel_abandons_in_flight() {
        let cancel = CancellationToken::new();
        let operation = Arc::new(OperationStub::new(Ok(()), Duration::from_secs(3600)));
        let config = RunConfig::new(10, 3, operation).with_cancel_policy(CancelPolicy::Abandon);

        cancel_after(&cancel, Duration::from_millis(50));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            BoundedTaskRunner::new().run(config, &cancel),
        )
        .await
        .expect("Abandoning run should return promptly")
        .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.completed(), 0);
    }

    #[tokio::test]
    async fn test_events_are_reported() {
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let operation = Arc::new(ParityStub::new(Duration::from_millis(1)));

        let result = BoundedTaskRunner::with_events(events_tx)
            .run(RunConfig::new(6, 2, operation), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.completed(), 6);

        let mut events = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 12);

        let dispatched = events
            .iter()
            .filter_map(|event| match event {
                RunEvent::Dispatched { item } => Some(item.index),
                _ => None,
            })
            .collect_vec();
        assert_eq!(dispatched, (0..6).collect_vec());

        for index in 0..6 {
            let dispatched_at = events
                .iter()
                .position(|e| matches!(e, RunEvent::Dispatched { item } if item.index == index))
                .unwrap();
            let completed_at = events
                .iter()
                .position(|e| matches!(e, RunEvent::Completed { item, .. } if item.index == index))
                .unwrap();
            assert!(dispatched_at < completed_at);
        }

        let failed = events
            .iter()
            .filter(|e| matches!(e, RunEvent::Completed { outcome: Err(_), .. }))
            .count();
        assert_eq!(failed, 3);
    }

    #[tokio::test]
    async fn test_dropped_event_receiver_does_not_abort() {
        let (events_tx, events_rx) = mpsc::channel(1);
        drop(events_rx);
        let operation = Arc::new(OperationStub::new(Ok(()), Duration::ZERO));

        let result = BoundedTaskRunner::with_events(events_tx)
            .run(RunConfig::new(5, 5, operation), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.succeeded, 5);
    }

    #[tokio::test]
    async fn test_dropping_run_stops_in_flight_items() {
        let counter = Arc::new(FinishCounter::new(Duration::from_millis(200)));
        let operation: Arc<dyn Operation> = counter.clone();

        let cut_short = tokio::time::timeout(
            Duration::from_millis(20),
            run(RunConfig::new(10, 4, operation)),
        )
        .await;
        assert!(cut_short.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(counter.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_not_blocked_by_full_event_channel() {
        for policy in [CancelPolicy::Abandon, CancelPolicy::Drain] {
            // receiver stays alive but is never drained
            let (events_tx, _events_rx) = mpsc::channel(2);
            let cancel = CancellationToken::new();
            let operation = Arc::new(OperationStub::new(Ok(()), Duration::from_millis(10)));
            let config = RunConfig::new(100, 4, operation).with_cancel_policy(policy);
            cancel_after(&cancel, Duration::from_millis(50));

            let result = tokio::time::timeout(
                Duration::from_secs(2),
                BoundedTaskRunner::with_events(events_tx).run(config, &cancel),
            )
            .await
            .expect("Run should return after cancellation")
            .unwrap();

            assert!(result.cancelled);
            assert!(result.completed() < 100);
        }
    }

    #[tokio::test]
    async fn test_drain_counts_items_cancelled_mid_flight() {
        let (runner, mut events_rx) = BoundedTaskRunner::with_event_channel();
        let cancel = CancellationToken::new();
        let counter = Arc::new(FinishCounter::new(Duration::from_millis(100)));
        let operation: Arc<dyn Operation> = counter.clone();
        cancel_after(&cancel, Duration::from_millis(30));

        let result = runner
            .run(RunConfig::new(20, 4, operation), &cancel)
            .await
            .unwrap();

        let mut dispatched = 0;
        while let Ok(event) = events_rx.try_recv() {
            if matches!(event, RunEvent::Dispatched { .. }) {
                dispatched += 1;
            }
        }
        assert!(result.cancelled);
        assert_eq!(dispatched, 4);
        assert_eq!(result.completed(), dispatched);
        assert_eq!(result.succeeded, dispatched);
        assert_eq!(counter.finished.load(Ordering::SeqCst), dispatched);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_every_item_once_and_cap_respected(items in 0usize..40, concurrency in 1usize..8) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_time()
                .build()
                .unwrap();
            let probe = Arc::new(ConcurrencyProbe::new(Duration::ZERO));
            let operation: Arc<dyn Operation> = probe.clone();

            let result = runtime
                .block_on(run(RunConfig::new(items, concurrency, operation)))
                .unwrap();

            prop_assert_eq!(result.succeeded, items);
            prop_assert!(probe.peak() <= concurrency);
            let seen = probe.seen().into_iter().map(|item| item.index).sorted().collect_vec();
            prop_assert_eq!(seen, (0..items).collect_vec());
        }
    }
}
