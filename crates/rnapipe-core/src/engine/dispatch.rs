use crate::core::models::result::{ToolInvocationResult, keys};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// One partition of a homogeneous batch, bound to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTask<T> {
    pub partition_index: usize,
    pub device: Option<String>,
    pub items: Vec<T>,
}

/// The raw outcome of one partition, before merging.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionResult {
    pub partition_index: usize,
    pub device: Option<String>,
    pub result: ToolInvocationResult,
}

/// Diagnostic record of a partition that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionFailure {
    pub partition_index: usize,
    pub device: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// The merged result; successful iff at least one partition succeeded.
    pub result: ToolInvocationResult,
    /// Every partition that failed, in partition order.
    pub failures: Vec<PartitionFailure>,
}

/// Splits `items` across `devices` round-robin: item `i` goes to device `i mod M`.
///
/// Order is preserved within each partition. With zero or one device a single partition
/// holds every item and is bound to the first device, if any. With `M > 1` devices exactly
/// `M` partitions are returned, some of which may be empty.
pub fn partition<T: Clone>(items: &[T], devices: &[String]) -> Vec<DispatchTask<T>> {
    if devices.len() <= 1 {
        return vec![DispatchTask {
            partition_index: 0,
            device: devices.first().cloned(),
            items: items.to_vec(),
        }];
    }

    let mut tasks: Vec<DispatchTask<T>> = devices
        .iter()
        .enumerate()
        .map(|(k, device)| DispatchTask {
            partition_index: k,
            device: Some(device.clone()),
            items: Vec::new(),
        })
        .collect();
    for (i, item) in items.iter().enumerate() {
        tasks[i % devices.len()].items.push(item.clone());
    }
    tasks
}

/// Runs a batch across devices and merges the partition results.
///
/// Non-empty partitions run concurrently on a dedicated thread pool with one worker per
/// partition; the call blocks until all of them have finished. A partition that panics is
/// recorded as a failure of that partition only.
///
/// # Arguments
///
/// * `items` - The independent units of work (e.g. seeds).
/// * `devices` - The available devices; may be empty.
/// * `execute` - Runs one partition and reports its result.
pub fn dispatch<T, F>(items: &[T], devices: &[String], execute: F) -> DispatchOutcome
where
    T: Clone + Send + Sync,
    F: Fn(&DispatchTask<T>) -> ToolInvocationResult + Send + Sync,
{
    let tasks: Vec<DispatchTask<T>> = partition(items, devices)
        .into_iter()
        .filter(|task| !task.items.is_empty())
        .collect();

    if tasks.is_empty() {
        return DispatchOutcome {
            result: ToolInvocationResult::failure("No work items to dispatch", 0.0),
            failures: Vec::new(),
        };
    }

    info!(
        items = items.len(),
        partitions = tasks.len(),
        "Dispatching batch across devices."
    );

    let results = if tasks.len() == 1 {
        vec![run_guarded(&tasks[0], &execute)]
    } else {
        run_concurrently(&tasks, &execute)
    };

    let partition_results = tasks
        .iter()
        .zip(results)
        .map(|(task, result)| PartitionResult {
            partition_index: task.partition_index,
            device: task.device.clone(),
            result,
        })
        .collect();

    merge_partitions(partition_results)
}

fn run_concurrently<T, F>(tasks: &[DispatchTask<T>], execute: &F) -> Vec<ToolInvocationResult>
where
    T: Clone + Send + Sync,
    F: Fn(&DispatchTask<T>) -> ToolInvocationResult + Send + Sync,
{
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(tasks.len())
        .thread_name(|i| format!("rnapipe-dispatch-{}", i))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            warn!("Could not start dispatch pool ({}); running partitions sequentially.", e);
            return tasks.iter().map(|task| run_guarded(task, execute)).collect();
        }
    };

    let mut slots: Vec<Option<ToolInvocationResult>> = vec![None; tasks.len()];
    pool.scope(|scope| {
        for (slot, task) in slots.iter_mut().zip(tasks) {
            scope.spawn(move |_| {
                *slot = Some(run_guarded(task, execute));
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| ToolInvocationResult::failure("Partition produced no result", 0.0))
        })
        .collect()
}

fn run_guarded<T, F>(task: &DispatchTask<T>, execute: &F) -> ToolInvocationResult
where
    F: Fn(&DispatchTask<T>) -> ToolInvocationResult,
{
    debug!(
        partition = task.partition_index,
        device = task.device.as_deref().unwrap_or("default"),
        items = task.items.len(),
        "Starting partition."
    );
    match panic::catch_unwind(AssertUnwindSafe(|| execute(task))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ToolInvocationResult::failure(format!("Partition panicked: {}", message), 0.0)
        }
    }
}

/// Combines ordered partition results into one aggregate result.
///
/// The merge succeeds iff at least one partition succeeded. Artifact lists are
/// concatenated in partition order. Metric lists whose key ends in `_per_run` are
/// concatenated and the matching `_mean` metric is recomputed over all items; any other
/// metric is taken from the first successful partition that reports it. Elapsed time is
/// the sum over all partitions, failed ones included.
pub fn merge_partitions(results: Vec<PartitionResult>) -> DispatchOutcome {
    let elapsed: f64 = results.iter().map(|r| r.result.elapsed_secs()).sum();

    let failures: Vec<PartitionFailure> = results
        .iter()
        .filter(|r| !r.result.is_success())
        .map(|r| PartitionFailure {
            partition_index: r.partition_index,
            device: r.device.clone(),
            error: r
                .result
                .error_message()
                .unwrap_or("unknown error")
                .to_string(),
        })
        .collect();

    for failure in &failures {
        warn!(
            partition = failure.partition_index,
            device = failure.device.as_deref().unwrap_or("default"),
            "Partition failed: {}",
            failure.error
        );
    }

    let successes: Vec<&ToolInvocationResult> = results
        .iter()
        .map(|r| &r.result)
        .filter(|r| r.is_success())
        .collect();

    if successes.is_empty() {
        let detail = failures
            .iter()
            .map(|f| {
                format!(
                    "partition {} ({}): {}",
                    f.partition_index,
                    f.device.as_deref().unwrap_or("default device"),
                    f.error
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        return DispatchOutcome {
            result: ToolInvocationResult::failure(
                format!("All {} partitions failed: {}", failures.len(), detail),
                elapsed,
            ),
            failures,
        };
    }

    let mut artifacts: BTreeMap<&str, Vec<PathBuf>> = BTreeMap::new();
    let mut per_run: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut scalars: BTreeMap<String, Value> = BTreeMap::new();

    for result in &successes {
        for (name, paths) in result.artifact_map() {
            artifacts
                .entry(name.as_str())
                .or_default()
                .extend(paths.iter().cloned());
        }
        for (name, value) in result.metrics() {
            match value {
                Value::Array(items) if name.ends_with(keys::PER_RUN_SUFFIX) => {
                    per_run
                        .entry(name.clone())
                        .or_default()
                        .extend(items.iter().cloned());
                }
                _ => {
                    scalars.entry(name.clone()).or_insert_with(|| value.clone());
                }
            }
        }
    }

    for (name, items) in &per_run {
        let values: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
        if values.is_empty() {
            continue;
        }
        let base = &name[..name.len() - keys::PER_RUN_SUFFIX.len()];
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        scalars.insert(format!("{}{}", base, keys::MEAN_SUFFIX), Value::from(mean));
    }

    let mut merged = ToolInvocationResult::success(elapsed);
    for (name, paths) in artifacts {
        merged = merged.with_artifacts(name, paths);
    }
    for (name, value) in scalars {
        merged = merged.with_metric(&name, value);
    }
    for (name, items) in per_run {
        merged = merged.with_metric(&name, Value::Array(items));
    }

    info!(
        succeeded = successes.len(),
        failed = failures.len(),
        "Merged partition results."
    );
    DispatchOutcome {
        result: merged,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn devices(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("cuda:{}", i)).collect()
    }

    fn part(index: usize, result: ToolInvocationResult) -> PartitionResult {
        PartitionResult {
            partition_index: index,
            device: Some(format!("cuda:{}", index)),
            result,
        }
    }

    #[test]
    fn partition_is_round_robin_and_fair() {
        let items: Vec<u32> = (0..10).collect();
        let tasks = partition(&items, &devices(3));
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].items, vec![0, 3, 6, 9]);
        assert_eq!(tasks[1].items, vec![1, 4, 7]);
        assert_eq!(tasks[2].items, vec![2, 5, 8]);
        for (k, task) in tasks.iter().enumerate() {
            assert_eq!(task.partition_index, k);
            assert_eq!(task.device.as_deref(), Some(format!("cuda:{}", k).as_str()));
            assert!(task.items.len() == 3 || task.items.len() == 4);
        }

        let mut all: Vec<u32> = tasks.into_iter().flat_map(|t| t.items).collect();
        all.sort();
        assert_eq!(all, items);
    }

    #[test]
    fn partition_with_single_or_no_device_is_one_partition() {
        let items = [1, 2, 3];
        let single = partition(&items, &devices(1));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].device.as_deref(), Some("cuda:0"));
        assert_eq!(single[0].items, vec![1, 2, 3]);

        let none = partition(&items, &[]);
        assert_eq!(none.len(), 1);
        assert!(none[0].device.is_none());
    }

    #[test]
    fn partition_with_more_devices_than_items_leaves_empty_partitions() {
        let tasks = partition(&[7], &devices(3));
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].items, vec![7]);
        assert!(tasks[1].items.is_empty() && tasks[2].items.is_empty());
    }

    #[test]
    fn merge_with_one_failed_partition_still_succeeds() {
        let outcome = merge_partitions(vec![
            part(0, ToolInvocationResult::success(1.0).with_artifact(keys::STRUCTURES, "a.pdb")),
            part(1, ToolInvocationResult::failure("out of memory", 2.0).with_artifact(keys::STRUCTURES, "partial.pdb")),
            part(2, ToolInvocationResult::success(3.0).with_artifact(keys::STRUCTURES, "c.pdb")),
        ]);

        assert!(outcome.result.is_success());
        assert_eq!(
            outcome.result.artifacts(keys::STRUCTURES),
            &[PathBuf::from("a.pdb"), PathBuf::from("c.pdb")]
        );
        assert_eq!(outcome.result.elapsed_secs(), 6.0);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].partition_index, 1);
        assert_eq!(outcome.failures[0].error, "out of memory");
    }

    #[test]
    fn merge_recomputes_means_from_per_run_lists() {
        let outcome = merge_partitions(vec![
            part(
                0,
                ToolInvocationResult::success(0.0)
                    .with_metric("plddt_per_run", json!([0.5, 0.7]))
                    .with_metric("plddt_mean", 0.6)
                    .with_metric("model", "first"),
            ),
            part(
                1,
                ToolInvocationResult::success(0.0)
                    .with_metric("plddt_per_run", json!([0.9]))
                    .with_metric("plddt_mean", 0.9)
                    .with_metric("model", "second"),
            ),
        ]);

        let result = outcome.result;
        assert_eq!(result.metric("plddt_per_run"), Some(&json!([0.5, 0.7, 0.9])));
        assert!((result.metric_f64("plddt_mean").unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(result.metric_str("model"), Some("first"));
    }

    #[test]
    fn merge_with_all_partitions_failed_lists_every_device() {
        let outcome = merge_partitions(vec![
            part(0, ToolInvocationResult::failure("boom", 1.0)),
            part(1, ToolInvocationResult::failure("crash", 1.0)),
        ]);
        assert!(!outcome.result.is_success());
        let message = outcome.result.error_message().unwrap();
        assert!(message.contains("cuda:0") && message.contains("boom"));
        assert!(message.contains("cuda:1") && message.contains("crash"));
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.result.elapsed_secs(), 2.0);
    }

    #[test]
    fn dispatch_runs_partitions_concurrently() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u64> = (0..6).collect();

        let outcome = dispatch(&items, &devices(3), |task| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
            running.fetch_sub(1, Ordering::SeqCst);
            let device = task.device.clone().unwrap_or_default();
            ToolInvocationResult::success(1.0)
                .with_artifacts(
                    keys::STRUCTURES,
                    task.items.iter().map(|i| PathBuf::from(format!("{}/{}.pdb", device, i))),
                )
        });

        assert!(outcome.result.is_success());
        assert!(outcome.failures.is_empty());
        assert!(peak.load(Ordering::SeqCst) >= 2);
        let structures = outcome.result.artifacts(keys::STRUCTURES);
        assert_eq!(structures.len(), 6);
        assert_eq!(structures[0], PathBuf::from("cuda:0/0.pdb"));
        assert_eq!(structures[2], PathBuf::from("cuda:1/1.pdb"));
    }

    #[test]
    fn dispatch_converts_panics_into_partition_failures() {
        let items = [0u64, 1, 2];
        let outcome = dispatch(&items, &devices(3), |task| {
            if task.partition_index == 1 {
                panic!("device lost");
            }
            ToolInvocationResult::success(0.0).with_artifact(keys::STRUCTURES, "ok.pdb")
        });
        assert!(outcome.result.is_success());
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].error.contains("device lost"));
        assert_eq!(outcome.result.artifacts(keys::STRUCTURES).len(), 2);
    }

    #[test]
    fn dispatch_skips_empty_partitions() {
        let calls = AtomicUsize::new(0);
        let outcome = dispatch(&[1u64], &devices(4), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            ToolInvocationResult::success(0.0)
        });
        assert!(outcome.result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_of_nothing_is_a_failure() {
        let outcome = dispatch::<u64, _>(&[], &devices(2), |_| ToolInvocationResult::success(0.0));
        assert!(!outcome.result.is_success());
    }
}
