use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use memoflight_service::caching::{CacheError, Coordinator, KeyState};

use crate::{EXERCISE_JOBS, REPEATED_JOBS, Squares, coordinator};

/// Requests all `jobs` concurrently, each from its own task.
async fn run_jobs(
    coordinator: &Arc<Coordinator<u64, Squares>>,
    jobs: &[u64],
) -> Vec<(u64, Result<u64, CacheError>)> {
    let tasks = jobs.iter().map(|&job| {
        let coordinator = Arc::clone(coordinator);
        tokio::spawn(async move { (job, coordinator.get(job).await) })
    });

    join_all(tasks)
        .await
        .into_iter()
        .map(|task| task.unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exercise_jobs() {
    memoflight_test::setup();

    let squares = Squares::new(Duration::from_millis(200));
    let coordinator = coordinator(&squares);
    let distinct: BTreeSet<_> = EXERCISE_JOBS.iter().copied().collect();
    assert_eq!(distinct.len(), 18);

    // the first round computes every distinct job exactly once
    for (job, result) in run_jobs(&coordinator, &EXERCISE_JOBS).await {
        assert_eq!(result, Ok(job * job));
    }
    assert_eq!(squares.counter.total(), distinct.len());
    assert_eq!(coordinator.entry_count(), distinct.len() as u64);
    assert_eq!(coordinator.in_flight(), 0);

    // the second round is served from the store
    for job in &distinct {
        assert_eq!(coordinator.state(job), KeyState::Cached);
    }
    for (job, result) in run_jobs(&coordinator, &EXERCISE_JOBS).await {
        assert_eq!(result, Ok(job * job));
    }
    assert_eq!(squares.counter.total(), distinct.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_jobs() {
    memoflight_test::setup();

    let squares = Squares::new(Duration::from_millis(50));
    let coordinator = coordinator(&squares);

    let jobs: Vec<_> = REPEATED_JOBS.iter().copied().cycle().take(60).collect();
    for (job, result) in run_jobs(&coordinator, &jobs).await {
        assert_eq!(result, Ok(job * job));
    }

    assert_eq!(
        squares.counter.all_calls(),
        vec![(0, 1), (1, 1), (2, 1), (3, 1), (4, 1), (5, 1)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sequential_requests() {
    memoflight_test::setup();

    let squares = Squares::new(Duration::from_secs(5));
    let coordinator = coordinator(&squares);

    assert_eq!(coordinator.get(7).await, Ok(49));

    // no waiting on the second call, paused time would not advance otherwise
    let start = tokio::time::Instant::now();
    assert_eq!(coordinator.get(7).await, Ok(49));
    assert_eq!(start.elapsed(), Duration::ZERO);

    assert_eq!(squares.counter.total(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiters_share_the_leaders_duration() {
    memoflight_test::setup();

    let squares = Squares::new(Duration::from_secs(5));
    let coordinator = coordinator(&squares);

    let start = tokio::time::Instant::now();
    let results = join_all((0..10).map(|_| coordinator.get(3))).await;

    // ten callers, but only one computation worth of time
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    assert!(results.into_iter().all(|result| result == Ok(9)));
    assert_eq!(squares.counter.total(), 1);
}
