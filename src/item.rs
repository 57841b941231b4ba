//! Per-item and aggregate results of a batch run.

use crate::status::ItemStatus;
use serde::Serialize;
use std::time::Instant;

/// Maximum number of error strings carried by a [`BatchSummary`].
const SUMMARY_ERROR_LIMIT: usize = 10;

/// Final outcome of one input item.
#[derive(Debug, Clone)]
pub struct ProcessedItem<T, R> {
    pub item: T,
    pub status: ItemStatus,
    /// Present iff `status` is [`ItemStatus::Success`].
    pub result: Option<R>,
    /// Most recent error message, present iff `status` is [`ItemStatus::Failed`].
    pub error: Option<String>,
    /// Attempts made; 0 for skipped items.
    pub attempts: u32,
    pub duration_ms: u64,
}

impl<T, R> ProcessedItem<T, R> {
    pub(crate) fn skipped(item: T) -> Self {
        Self {
            item,
            status: ItemStatus::Skipped,
            result: None,
            error: None,
            attempts: 0,
            duration_ms: 0,
        }
    }

    pub(crate) fn success(item: T, result: R, attempts: u32, duration_ms: u64) -> Self {
        Self {
            item,
            status: ItemStatus::Success,
            result: Some(result),
            error: None,
            attempts,
            duration_ms,
        }
    }

    pub(crate) fn failed(item: T, error: String, attempts: u32, duration_ms: u64) -> Self {
        Self {
            item,
            status: ItemStatus::Failed,
            result: None,
            error: Some(error),
            attempts,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Success
    }
}

/// Aggregate result of [`BatchProcessor::process`](crate::BatchProcessor::process).
///
/// `total == succeeded + failed + skipped == items.len()` always holds.
#[derive(Debug, Clone)]
pub struct BatchResult<T, R> {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Chunk order, completion order within a chunk.
    pub items: Vec<ProcessedItem<T, R>>,
    pub duration_ms: u64,
    /// One `"Item failed: <error>"` entry per failed item.
    pub errors: Vec<String>,
}

impl<T, R> BatchResult<T, R> {
    pub(crate) fn from_items(
        items: Vec<ProcessedItem<T, R>>,
        errors: Vec<String>,
        duration_ms: u64,
    ) -> Self {
        let count = |status: ItemStatus| items.iter().filter(|i| i.status == status).count();
        Self {
            total: items.len(),
            succeeded: count(ItemStatus::Success),
            failed: count(ItemStatus::Failed),
            skipped: count(ItemStatus::Skipped),
            items,
            duration_ms,
            errors,
        }
    }

    /// Fraction of items that succeeded, `0.0` for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }

    /// Iterates over the successful results.
    pub fn results(&self) -> impl Iterator<Item = &R> {
        self.items.iter().filter_map(|i| i.result.as_ref())
    }

    /// Reporting view with a formatted rate and a truncated error list.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            success_rate: format!("{:.1}%", self.success_rate() * 100.0),
            duration_ms: self.duration_ms,
            errors: self
                .errors
                .iter()
                .take(SUMMARY_ERROR_LIMIT)
                .cloned()
                .collect(),
        }
    }
}

/// Serializable digest of a [`BatchResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: String,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
