//! Batch Scheduler
//!
//! Drives the catalog through the fetcher in fixed-size waves. A wave only
//! starts once every task of the previous wave has resolved, so at most
//! `batch_size` catalog requests are in flight. Slots freed early in a wave
//! stay idle until the wave completes; in exchange the load on the controller
//! and the log output are easy to follow.
//!
//! Exception: a resource that falls back to pagination fetches its pages in
//! nested waves of `batch_size`, so a wave that paginates can reach
//! `batch_size * batch_size` requests in flight.

use super::fetcher::{fetch_resource, paginate};
use super::registry::ResourceDescriptor;
use crate::apic::ApicClient;
use crate::archive::ArchiveSink;
use crate::config::RunConfig;
use crate::error::CollectError;
use futures::future::join_all;
use std::future::Future;
use std::time::Instant;

/// Run `task` over `items`, `batch_size` at a time, with a barrier between
/// waves. Results come back in input order.
pub async fn run_in_waves<'a, T, F, Fut, R>(items: &'a [T], batch_size: usize, mut task: F) -> Vec<R>
where
    F: FnMut(&'a T) -> Fut,
    Fut: Future<Output = R>,
{
    let mut results = Vec::with_capacity(items.len());

    for (wave, chunk) in items.chunks(batch_size.max(1)).enumerate() {
        tracing::debug!(wave = wave + 1, size = chunk.len(), "starting wave");
        let tasks: Vec<Fut> = chunk.iter().map(&mut task).collect();
        results.extend(join_all(tasks).await);
    }

    results
}

/// How one resource was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collected {
    /// One `<alias>.json` entry
    Whole,
    /// `<alias>-<page>.json` entries
    Paged(u64),
}

/// A resource that could not be collected
#[derive(Debug)]
pub struct ResourceFailure {
    pub resource: String,
    pub error: CollectError,
}

/// Result of one pass over a catalog
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Resources stored as a single entry
    pub fetched: usize,
    /// Resources stored page by page
    pub paginated: usize,
    /// Failures in catalog order
    pub failures: Vec<ResourceFailure>,
}

impl BatchReport {
    /// The "some data could not be fetched" signal
    pub fn first_error(&self) -> Option<&ResourceFailure> {
        self.failures.first()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.fetched + self.paginated
    }
}

/// Fetch one resource and write it to the sink
pub async fn collect_resource(
    client: &ApicClient,
    desc: &ResourceDescriptor,
    run: &RunConfig,
    sink: &dyn ArchiveSink,
) -> Result<Collected, CollectError> {
    let start = Instant::now();
    tracing::info!("fetching {}...", desc.alias());

    let collected = match fetch_resource(client, desc, run).await {
        Ok(body) => {
            sink.add(&desc.file_name(), &body)?;
            Collected::Whole
        }
        Err(err) if err.is_oversized() && run.paginate_oversized => {
            tracing::info!("{} result too big, switching to pagination", desc.alias());
            Collected::Paged(paginate(client, desc, run, sink).await?)
        }
        Err(err) => return Err(err),
    };

    tracing::info!("{} complete", desc.alias());
    tracing::debug!(
        resource = desc.alias(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "done"
    );
    Ok(collected)
}

/// Collect every catalog entry into `sink`.
///
/// Failures never stop the run; they are logged and returned in the report.
pub async fn collect_catalog(
    client: &ApicClient,
    catalog: &[ResourceDescriptor],
    run: &RunConfig,
    sink: &dyn ArchiveSink,
) -> BatchReport {
    let results = run_in_waves(catalog, run.batch_size, move |desc| async move {
        (desc, collect_resource(client, desc, run, sink).await)
    })
    .await;

    let mut report = BatchReport::default();
    for (desc, result) in results {
        match result {
            Ok(Collected::Whole) => report.fetched += 1,
            Ok(Collected::Paged(_)) => report.paginated += 1,
            Err(error) => {
                tracing::error!(resource = desc.alias(), "{}", error);
                report.failures.push(ResourceFailure {
                    resource: desc.alias().to_string(),
                    error,
                });
            }
        }
    }

    if let Some(first) = report.first_error() {
        tracing::warn!(
            failed = report.failures.len(),
            "some data could not be fetched: {}",
            first.error
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_waves_bound_in_flight_tasks() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..23).collect();

        let results = run_in_waves(&items, 5, |&i| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5 + (i % 3) as u64)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 5);
        assert_eq!(results, items.iter().map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_nested_waves_bounded_by_product() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let outer: Vec<usize> = (0..6).collect();
        let inner: Vec<usize> = (0..9).collect();

        run_in_waves(&outer, 3, |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let inner = &inner;
            async move {
                run_in_waves(inner, 3, |_| {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                })
                .await;
            }
        })
        .await;

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak > 3, "nested waves overlap across outer tasks");
        assert!(peak <= 9);
    }

    #[tokio::test]
    async fn test_next_wave_waits_for_previous() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let items: Vec<usize> = (0..6).collect();

        run_in_waves(&items, 3, |&i| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(("start", i));
                // The first task of each wave is the slowest
                let delay = if i % 3 == 0 { 30 } else { 1 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.lock().unwrap().push(("end", i));
            }
        })
        .await;

        let log = log.lock().unwrap();
        let last_end_wave_one = log
            .iter()
            .rposition(|(kind, i)| *kind == "end" && *i < 3)
            .unwrap();
        let first_start_wave_two = log
            .iter()
            .position(|(kind, i)| *kind == "start" && *i >= 3)
            .unwrap();
        assert!(last_end_wave_one < first_start_wave_two);
    }

    #[tokio::test]
    async fn test_zero_batch_size_still_runs() {
        let items = vec![1, 2, 3];
        let results = run_in_waves(&items, 0, |&i| async move { i }).await;
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[test]
    fn test_report_first_error() {
        let mut report = BatchReport::default();
        assert!(report.is_complete());

        report.failures.push(ResourceFailure {
            resource: "fvBD".to_string(),
            error: CollectError::Decode("x".to_string()),
        });
        report.failures.push(ResourceFailure {
            resource: "fvCtx".to_string(),
            error: CollectError::Decode("y".to_string()),
        });
        assert!(!report.is_complete());
        assert_eq!(report.first_error().unwrap().resource, "fvBD");
    }
}
