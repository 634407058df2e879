use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use memoflight_service::caching::{CacheConfig, Computation, Coordinator};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn get(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).context("failed to open workloads file")?;
        serde_yaml::from_reader(file).context("failed to parse workloads YAML")
    }
}

impl Default for WorkloadsConfig {
    /// Replays the job lists of the classic concurrency exercises.
    fn default() -> Self {
        let workload = |name: &str, keys: &[u64], rounds| Workload {
            name: name.into(),
            keys: keys.to_vec(),
            rounds,
            strategy: Strategy::Iterative,
            compute_delay: Duration::from_millis(500),
            failing_keys: Vec::new(),
        };

        Self {
            workloads: vec![
                workload(
                    "exercise",
                    &[
                        44, 46, 47, 49, 44, 34, 47, 41, 41, 33, 43, 40, 46, 43, 45, 49, 34, 47, 36,
                        43, 48, 41, 35, 46, 33, 42, 49, 47, 32, 30, 50, 50, 30, 40, 44, 30, 49, 34,
                        48, 43, 50, 42, 48, 31, 35, 30, 33, 40, 40, 50, 49, 47, 36, 43, 48, 41, 35,
                        46,
                    ],
                    2,
                ),
                workload("massive", &[3, 4, 5, 5, 4, 3, 2, 1, 0], 1),
                // 1000 does not fit into a u128
                Workload {
                    strategy: Strategy::Recursive,
                    compute_delay: Duration::from_millis(10),
                    ..workload("memo", &[42, 40, 41, 42, 38, 1000], 1)
                },
            ],
        }
    }
}

/// How a workload computes its Fibonacci numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Every number is computed from scratch.
    #[default]
    Iterative,
    /// `n` is the sum of `n - 1` and `n - 2`, both requested through the same coordinator.
    Recursive,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Workload {
    pub name: String,
    pub keys: Vec<u64>,
    /// How often the whole list of keys is requested. Rounds run one after the other.
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default)]
    pub strategy: Strategy,
    /// How long each computation takes, on top of actually computing the value.
    #[serde(default, with = "humantime_serde")]
    pub compute_delay: Duration,
    /// Keys for which the computation fails.
    #[serde(default)]
    pub failing_keys: Vec<u64>,
}

fn default_rounds() -> usize {
    1
}

/// The largest `n` for which the `n`th Fibonacci number fits into a `u128`.
const MAX_FIBONACCI: u64 = 186;

/// The `n`th Fibonacci number, or `None` if it overflows.
pub fn fibonacci(n: u64) -> Option<u128> {
    if n == 0 {
        return Some(0);
    }

    let (mut previous, mut current) = (0u128, 1u128);
    for _ in 1..n {
        let next = previous.checked_add(current)?;
        previous = current;
        current = next;
    }
    Some(current)
}

/// Computes Fibonacci numbers, slowly.
///
/// With [`Strategy::Recursive`], a computation requests its two predecessors from the coordinator
/// that runs it. Keys only ever depend on smaller keys, so no computation ends up waiting for
/// itself.
#[derive(Debug)]
pub struct SlowFibonacci {
    strategy: Strategy,
    delay: Duration,
    failing: BTreeSet<u64>,
    invocations: AtomicUsize,
    coordinator: Weak<Coordinator<u64, SlowFibonacci>>,
}

impl SlowFibonacci {
    /// Creates a coordinator computing the Fibonacci numbers of `workload`.
    pub fn coordinator(workload: &Workload, config: CacheConfig) -> Arc<Coordinator<u64, Self>> {
        Arc::new_cyclic(|coordinator| {
            let computation = Self {
                strategy: workload.strategy,
                delay: workload.compute_delay,
                failing: workload.failing_keys.iter().copied().collect(),
                invocations: AtomicUsize::new(0),
                coordinator: Weak::clone(coordinator),
            };
            Coordinator::with_config(computation, config)
        })
    }

    /// How often a value was actually computed.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl Computation<u64> for SlowFibonacci {
    type Value = u128;

    fn compute(&self, n: u64) -> BoxFuture<'static, Result<u128>> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let strategy = self.strategy;
        let delay = self.delay;
        let fails = self.failing.contains(&n);
        let coordinator = Weak::clone(&self.coordinator);

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fails {
                anyhow::bail!("refusing to compute fibonacci({n})");
            }

            match strategy {
                Strategy::Iterative => {
                    fibonacci(n).with_context(|| format!("fibonacci({n}) overflows"))
                }
                // bounds the recursion depth
                Strategy::Recursive if n > MAX_FIBONACCI => {
                    anyhow::bail!("fibonacci({n}) overflows")
                }
                Strategy::Recursive if n < 2 => Ok(n.into()),
                Strategy::Recursive => {
                    let coordinator = coordinator.upgrade().context("coordinator is gone")?;
                    let previous = coordinator.get(n - 1).await?;
                    let before = coordinator.get(n - 2).await?;
                    previous
                        .checked_add(before)
                        .with_context(|| format!("fibonacci({n}) overflows"))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use memoflight_service::caching::KeyState;

    use super::*;

    #[test]
    fn test_fibonacci() {
        assert_eq!(fibonacci(0), Some(0));
        assert_eq!(fibonacci(1), Some(1));
        assert_eq!(fibonacci(2), Some(1));
        assert_eq!(fibonacci(10), Some(55));
        assert_eq!(fibonacci(42), Some(267_914_296));
        assert_eq!(fibonacci(186), Some(332_825_110_087_067_562_321_196_029_789_634_457_848));
        assert_eq!(fibonacci(187), None);
        assert_eq!(fibonacci(1000), None);
    }

    #[test]
    fn test_parse_workloads() {
        let yaml = r#"
workloads:
  - name: fibonacci
    keys: [44, 46, 47]
    rounds: 2
    compute_delay: 50ms
    failing_keys: [13]
    strategy: recursive
  - name: minimal
    keys: [1]
"#;
        let config: WorkloadsConfig = serde_yaml::from_str(yaml).unwrap();

        let [full, minimal] = &config.workloads[..] else {
            panic!("expected two workloads");
        };
        assert_eq!(full.keys, [44, 46, 47]);
        assert_eq!(full.rounds, 2);
        assert_eq!(full.compute_delay, Duration::from_millis(50));
        assert_eq!(full.failing_keys, [13]);
        assert_eq!(full.strategy, Strategy::Recursive);

        assert_eq!(minimal.rounds, 1);
        assert_eq!(minimal.compute_delay, Duration::ZERO);
        assert!(minimal.failing_keys.is_empty());
        assert_eq!(minimal.strategy, Strategy::Iterative);
    }

    #[test]
    fn test_default_workloads() {
        let config = WorkloadsConfig::default();
        let sizes: Vec<_> = config
            .workloads
            .iter()
            .map(|workload| (workload.name.as_str(), workload.keys.len(), workload.rounds))
            .collect();
        assert_eq!(sizes, [("exercise", 58, 2), ("massive", 9, 1), ("memo", 6, 1)]);
    }

    fn workload(strategy: Strategy, failing_keys: &[u64]) -> Workload {
        Workload {
            name: "test".into(),
            keys: vec![],
            rounds: 1,
            strategy,
            compute_delay: Duration::from_secs(1),
            failing_keys: failing_keys.to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fibonacci() {
        let workload = workload(Strategy::Iterative, &[13]);
        let coordinator = SlowFibonacci::coordinator(&workload, CacheConfig::default());
        let computation = coordinator.computation();

        assert_eq!(computation.compute(10).await.unwrap(), 55);
        let err = computation.compute(13).await.unwrap_err();
        assert_eq!(err.to_string(), "refusing to compute fibonacci(13)");
        let err = computation.compute(1000).await.unwrap_err();
        assert_eq!(err.to_string(), "fibonacci(1000) overflows");
        assert_eq!(computation.invocations(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recursive_fibonacci() {
        let workload = workload(Strategy::Recursive, &[]);
        let coordinator = SlowFibonacci::coordinator(&workload, CacheConfig::default());

        assert_eq!(coordinator.get(50).await, Ok(12_586_269_025));
        // every number up to 50 was computed once, and is stored now
        assert_eq!(coordinator.computation().invocations(), 51);
        assert_eq!(coordinator.entry_count(), 51);

        // smaller numbers are served from the store
        assert_eq!(coordinator.get(42).await, Ok(267_914_296));
        assert_eq!(coordinator.computation().invocations(), 51);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recursive_fibonacci_limits() {
        let workload = workload(Strategy::Recursive, &[13]);
        let coordinator = SlowFibonacci::coordinator(&workload, CacheConfig::default());

        let err = coordinator.get(1000).await.unwrap_err();
        assert_eq!(err.to_string(), "computation failed: fibonacci(1000) overflows");
        assert_eq!(coordinator.computation().invocations(), 1);

        // the failure of 13 propagates to everything built on top of it
        let err = coordinator.get(15).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "computation failed: computation failed: computation failed: \
             refusing to compute fibonacci(13)"
        );
        assert_eq!(coordinator.state(&15), KeyState::Idle);
        assert_eq!(coordinator.get(12).await, Ok(144));
    }
}
