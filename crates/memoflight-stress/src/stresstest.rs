use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::task::JoinError;
use tokio::time::Instant;

use memoflight_service::caching::{CacheConfig, CacheContents};
use memoflight_service::metric;

use crate::workloads::{SlowFibonacci, Strategy, Workload, WorkloadsConfig};

/// The outcome of running a single workload.
pub struct WorkloadReport {
    pub name: String,
    pub requests: usize,
    pub computations: usize,
    pub failures: usize,
    pub entries: u64,
    latencies: DDSketch,
}

impl WorkloadReport {
    fn new(name: String) -> Self {
        Self {
            name,
            requests: 0,
            computations: 0,
            failures: 0,
            entries: 0,
            latencies: DDSketch::default(),
        }
    }

    /// Records the outcome of a single request task.
    ///
    /// A task that panicked counts as a failed request without a latency.
    fn record(&mut self, task: Result<(CacheContents<u128>, Duration), JoinError>) {
        self.requests += 1;
        match task {
            Ok((result, latency)) => {
                self.latencies.add(latency.as_secs_f64());
                if let Err(error) = result {
                    tracing::debug!(workload = %self.name, %error, "Request failed");
                    self.failures += 1;
                }
            }
            Err(error) => {
                tracing::error!(workload = %self.name, %error, "Request task failed");
                self.failures += 1;
            }
        }
    }

    /// Latency statistics over all requests, or `None` if there were no requests.
    pub fn latencies(&self) -> Option<LatencySummary> {
        let count = self.latencies.count();
        if count == 0 {
            return None;
        }

        let quantile = |q| {
            let value = self.latencies.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(value)
        };
        Some(LatencySummary {
            avg: Duration::from_secs_f64(self.latencies.sum().unwrap_or_default() / count as f64),
            p50: quantile(0.5),
            p90: quantile(0.9),
            p99: quantile(0.99),
        })
    }
}

impl fmt::Debug for WorkloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadReport")
            .field("name", &self.name)
            .field("requests", &self.requests)
            .field("computations", &self.computations)
            .field("failures", &self.failures)
            .field("entries", &self.entries)
            .field("latencies", &self.latencies())
            .finish()
    }
}

impl fmt::Display for WorkloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            name,
            requests,
            computations,
            failures,
            entries,
            ..
        } = self;
        write!(
            f,
            "Workload {name}: {requests} requests, {computations} computations, \
             {failures} failures, {entries} cached values"
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LatencySummary {
    pub avg: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { avg, p50, p90, p99 } = self;
        write!(f, "  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}")
    }
}

/// Runs all workloads concurrently, each against its own
/// [`Coordinator`](memoflight_service::caching::Coordinator).
pub async fn perform_stresstest(
    cache_config: CacheConfig,
    workloads: WorkloadsConfig,
) -> Result<Vec<WorkloadReport>> {
    let tasks = workloads.workloads.into_iter().map(|workload| {
        let config = CacheConfig {
            name: workload.name.clone(),
            ..cache_config.clone()
        };
        tokio::spawn(run_workload(config, workload))
    });

    let mut reports = Vec::new();
    for task in join_all(tasks).await {
        reports.push(task?);
    }
    Ok(reports)
}

async fn run_workload(config: CacheConfig, workload: Workload) -> WorkloadReport {
    let coordinator = SlowFibonacci::coordinator(&workload, config);

    let mut report = WorkloadReport::new(workload.name.clone());

    for round in 0..workload.rounds {
        let start = Instant::now();

        // every key of a round is requested at the same time
        let tasks = workload.keys.iter().map(|&key| {
            let coordinator = Arc::clone(&coordinator);

            let hub = sentry::Hub::new_from_top(sentry::Hub::current());
            let ctx = sentry::TransactionContext::new("stresstest", "stresstest");
            let transaction = hub.start_transaction(ctx);

            let future = async move {
                let request_start = Instant::now();
                let result = coordinator.get(key).await;
                transaction.finish();
                (result, request_start.elapsed())
            };
            tokio::spawn(future.bind_hub(hub))
        });

        for task in join_all(tasks).await {
            report.record(task);
        }

        metric!(
            gauge("stresstest.cached_values") = coordinator.entry_count(),
            "workload" => &workload.name
        );
        tracing::info!(
            workload = %workload.name,
            round,
            elapsed = ?start.elapsed(),
            "Finished round"
        );
    }

    report.computations = coordinator.computation().invocations();
    report.entries = coordinator.entry_count();
    report
}
