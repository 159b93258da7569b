//! Bounded worker pool with cooperative cancellation.
//!
//! Work items are independent; workers never touch the progress UI.
//! Each worker returns a result value which the pool forwards to the
//! caller through a progress channel and the final outcome. On
//! cancellation no new work is submitted, in-flight workers run to
//! completion (their subprocesses bounded by their own timeouts), and
//! the remaining items are reported as cancelled so the caller can
//! flush a partial report.

use mc_common::RunContext;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

/// Progress event emitted once per finished work item.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Display label of the work item (usually a repo-relative path).
    pub label: String,
    /// Status keyword of the finished item ("ok", "error", ...).
    pub status: String,
    pub success: bool,
    /// First error/warning line, truncated by the producer.
    pub message: String,
}

/// Outcome of a pool run.
#[derive(Debug)]
pub struct PoolOutcome<T, R> {
    /// Results in worker-completion order, not input order.
    pub results: Vec<R>,
    /// Items never started because of cancellation.
    pub cancelled: Vec<T>,
    pub was_cancelled: bool,
}

impl<T, R> PoolOutcome<T, R> {
    /// After cancellation, results plus cancelled items partition the
    /// requested set.
    pub fn accounted(&self) -> usize {
        self.results.len() + self.cancelled.len()
    }
}

/// Run `worker` over `items` with at most `jobs` concurrent workers.
///
/// `jobs == 1` degrades to sequential execution. Every finished item
/// produces one [`ProgressEvent`] on `progress`; the channel is
/// best-effort (a dropped receiver does not fail the run).
pub async fn run_pool<T, R, F, Fut>(
    jobs: usize,
    items: Vec<T>,
    ctx: &RunContext,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    worker: F,
) -> PoolOutcome<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = (R, ProgressEvent)> + Send + 'static,
{
    let jobs = jobs.max(1);
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut join_set: JoinSet<(R, ProgressEvent)> = JoinSet::new();
    let mut results = Vec::new();
    let mut cancelled = Vec::new();

    for item in items {
        if ctx.is_cancelled() {
            cancelled.push(item);
            continue;
        }

        // Wait for a free worker slot, watching for cancellation; an
        // in-flight completion is drained opportunistically so results
        // stream while we wait.
        let permit = loop {
            tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    break Some(permit.expect("semaphore never closed"));
                }
                Some(done) = join_set.join_next() => {
                    record(done, &mut results, &progress);
                }
                _ = ctx.cancellation.cancelled() => {
                    break None;
                }
            }
        };

        let Some(permit) = permit else {
            cancelled.push(item);
            continue;
        };

        let worker = worker.clone();
        join_set.spawn(async move {
            let output = worker(item).await;
            drop(permit);
            output
        });
    }

    // In-flight workers run to completion even when cancelled.
    while let Some(done) = join_set.join_next().await {
        record(done, &mut results, &progress);
    }

    let was_cancelled = ctx.is_cancelled();
    if was_cancelled {
        warn!(
            "cancelled: {} items finished, {} never started",
            results.len(),
            cancelled.len()
        );
    }

    PoolOutcome {
        results,
        cancelled,
        was_cancelled,
    }
}

fn record<R>(
    joined: Result<(R, ProgressEvent), tokio::task::JoinError>,
    results: &mut Vec<R>,
    progress: &Option<mpsc::UnboundedSender<ProgressEvent>>,
) {
    match joined {
        Ok((result, event)) => {
            if let Some(tx) = progress {
                let _ = tx.send(event);
            }
            results.push(result);
        }
        Err(e) => warn!("worker task failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_common::context::Verbosity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(label: &str) -> ProgressEvent {
        ProgressEvent {
            label: label.to_string(),
            status: "ok".to_string(),
            success: true,
            message: String::new(),
        }
    }

    #[tokio::test]
    async fn all_items_complete_without_cancellation() {
        let ctx = RunContext::new(Verbosity::Normal, false);
        let items: Vec<u32> = (0..20).collect();
        let outcome = run_pool(4, items, &ctx, None, |n: u32| async move {
            (n * 2, event("item"))
        })
        .await;

        assert_eq!(outcome.results.len(), 20);
        assert!(outcome.cancelled.is_empty());
        assert!(!outcome.was_cancelled);
        let sum: u32 = outcome.results.iter().sum();
        assert_eq!(sum, (0..20).map(|n| n * 2).sum::<u32>());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let ctx = RunContext::new(Verbosity::Normal, false);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<u32> = (0..16).collect();
        let (active_c, peak_c) = (active.clone(), peak.clone());
        let outcome = run_pool(3, items, &ctx, None, move |_n: u32| {
            let active = active_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                ((), event("item"))
            }
        })
        .await;

        assert_eq!(outcome.results.len(), 16);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn cancellation_partitions_requested_set() {
        let ctx = RunContext::new(Verbosity::Normal, false);
        let total = 50usize;
        let items: Vec<usize> = (0..total).collect();

        let cancel = ctx.cancellation.clone();
        let outcome = run_pool(2, items, &ctx, None, move |n: usize| {
            let cancel = cancel.clone();
            async move {
                if n == 3 {
                    cancel.cancel();
                }
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                (n, event("item"))
            }
        })
        .await;

        assert!(outcome.was_cancelled);
        assert!(!outcome.cancelled.is_empty());
        assert_eq!(outcome.accounted(), total);
    }

    #[tokio::test]
    async fn progress_events_arrive_per_item() {
        let ctx = RunContext::new(Verbosity::Normal, false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let items: Vec<u32> = (0..5).collect();
        let outcome = run_pool(2, items, &ctx, Some(tx), |n: u32| async move {
            (n, event(&format!("file-{n}")))
        })
        .await;

        assert_eq!(outcome.results.len(), 5);
        let mut events = 0;
        while rx.try_recv().is_ok() {
            events += 1;
        }
        assert_eq!(events, 5);
    }
}
