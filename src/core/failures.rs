use crate::{
    constants::FAILURE_RETENTION_CAP,
    core::domain::{FailureReason, WorkItem},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureEntry {
    pub reason: FailureReason,
    pub occurrences: usize,
    /// First item that failed this way; `None` when the item could not be
    /// identified (the task running it was lost).
    pub first_item: Option<WorkItem>,
}

/// Bounded record of item failures.
///
/// Identical reasons are merged into one entry with an occurrence count.
/// Once `cap` distinct reasons are held, new ones only bump `overflow`, so
/// `occurrences` summed over all entries plus `overflow` always equals the
/// number of failures recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureLog {
    entries: Vec<FailureEntry>,
    overflow: usize,
    cap: usize,
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::with_cap(FAILURE_RETENTION_CAP)
    }
}

impl FailureLog {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            overflow: 0,
            cap,
        }
    }

    pub fn record(&mut self, item: Option<WorkItem>, reason: FailureReason) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.reason == reason) {
            entry.occurrences += 1;
            return;
        }

        if self.entries.len() < self.cap {
            self.entries.push(FailureEntry {
                reason,
                occurrences: 1,
                first_item: item,
            });
        } else {
            self.overflow += 1;
        }
    }

    pub fn entries(&self) -> &[FailureEntry] {
        &self.entries
    }

    /// Failures that were counted but not retained.
    pub fn overflow(&self) -> usize {
        self.overflow
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|e| e.occurrences).sum::<usize>() + self.overflow
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
