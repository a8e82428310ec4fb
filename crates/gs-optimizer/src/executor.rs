//! Execution substrate for trials.
//!
//! A [`TrialExecutor`] runs a batch of independent tasks and hands back their
//! results in submission order, however the work was actually scheduled.

use crossbeam_channel::{bounded, unbounded};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use gs_types::{config_error, internal_error, GsError, GsResult};

/// Caps how many trials are dispatched to the pool at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreDispatch {
    /// Dispatch every trial immediately.
    All,
    /// At most this many trials in flight.
    Count(usize),
    /// At most `factor * workers` trials in flight.
    PerJob(usize),
}

impl PreDispatch {
    /// Maximum number of in-flight trials for a pool of `workers`, or `None`
    /// when unbounded.
    pub fn window(&self, workers: usize) -> Option<usize> {
        match self {
            Self::All => None,
            Self::Count(n) => Some((*n).max(1)),
            Self::PerJob(factor) => Some(factor.saturating_mul(workers).max(1)),
        }
    }
}

impl Default for PreDispatch {
    fn default() -> Self {
        Self::PerJob(2)
    }
}

impl FromStr for PreDispatch {
    type Err = GsError;

    /// Accepts `all`, a plain count such as `16`, or `2*n_jobs`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        if s == "n_jobs" {
            return Ok(Self::PerJob(1));
        }
        let parse = |v: &str| -> GsResult<usize> {
            match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(config_error!("invalid pre_dispatch expression '{s}'")),
            }
        };
        match s.split_once('*') {
            Some((factor, rest)) if rest.trim() == "n_jobs" => Ok(Self::PerJob(parse(factor)?)),
            Some(_) => Err(config_error!("invalid pre_dispatch expression '{s}'")),
            None => Ok(Self::Count(parse(s)?)),
        }
    }
}

impl fmt::Display for PreDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Count(n) => write!(f, "{n}"),
            Self::PerJob(factor) => write!(f, "{factor}*n_jobs"),
        }
    }
}

/// Resolve an `n_jobs` setting into a worker count.
///
/// `-1` means every CPU; values below `-1` leave `|n_jobs| - 1` CPUs idle.
pub fn resolve_n_jobs(n_jobs: i32) -> GsResult<usize> {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match n_jobs {
        0 => Err(config_error!("n_jobs == 0 has no meaning")),
        n if n > 0 => Ok(n as usize),
        n => {
            let workers = cpus as i64 + i64::from(n) + 1;
            Ok(workers.max(1) as usize)
        }
    }
}

/// Runs independent tasks and returns their results in submission order.
///
/// A failing task aborts the batch; the lowest-indexed failure is returned.
pub trait TrialExecutor: Send + Sync {
    fn execute<T, F>(&self, tasks: Vec<F>) -> GsResult<Vec<T>>
    where
        T: Send,
        F: FnOnce() -> GsResult<T> + Send;

    /// Upper bound on concurrently running tasks.
    fn workers(&self) -> usize;

    /// Human-readable executor name.
    fn name(&self) -> &str;
}

/// Runs every task on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequentialExecutor;

impl TrialExecutor for SequentialExecutor {
    fn execute<T, F>(&self, tasks: Vec<F>) -> GsResult<Vec<T>>
    where
        T: Send,
        F: FnOnce() -> GsResult<T> + Send,
    {
        tasks.into_iter().map(|task| task()).collect()
    }

    fn workers(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "sequential"
    }
}

/// Runs tasks on a dedicated rayon pool built for each batch and dropped
/// when the batch completes. `pre_dispatch` bounds how many tasks are in
/// flight at any moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayonExecutor {
    n_workers: usize,
    pre_dispatch: PreDispatch,
}

impl RayonExecutor {
    pub fn new(n_workers: usize) -> Self {
        Self {
            n_workers: n_workers.max(1),
            pre_dispatch: PreDispatch::default(),
        }
    }

    pub fn with_pre_dispatch(mut self, pre_dispatch: PreDispatch) -> Self {
        self.pre_dispatch = pre_dispatch;
        self
    }

    pub fn pre_dispatch(&self) -> PreDispatch {
        self.pre_dispatch
    }
}

impl TrialExecutor for RayonExecutor {
    fn execute<T, F>(&self, tasks: Vec<F>) -> GsResult<Vec<T>>
    where
        T: Send,
        F: FnOnce() -> GsResult<T> + Send,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        // Never spin up more threads than there are tasks.
        let threads = self.n_workers.min(total);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gs-trial-{i}"))
            .build()
            .map_err(|e| GsError::Executor(format!("failed to build worker pool: {e}")))?;

        let window = self.pre_dispatch.window(threads).unwrap_or(total).min(total);
        debug!(
            "Dispatching {} tasks on {} threads, at most {} in flight",
            total, threads, window
        );

        // One permit per in-flight slot. A finished task hands its permit
        // back, so the next task starts as soon as any slot frees up.
        let (permit_tx, permit_rx) = bounded::<()>(window);
        for _ in 0..window {
            permit_tx
                .send(())
                .map_err(|_| internal_error!("dispatch permits closed"))?;
        }
        let (result_tx, result_rx) = unbounded::<(usize, GsResult<T>)>();
        let failed = AtomicBool::new(false);

        pool.in_place_scope(|scope| -> GsResult<()> {
            for (index, task) in tasks.into_iter().enumerate() {
                permit_rx
                    .recv()
                    .map_err(|_| internal_error!("dispatch permits closed"))?;
                if failed.load(Ordering::Acquire) {
                    break;
                }
                let permit_tx = permit_tx.clone();
                let result_tx = result_tx.clone();
                let failed = &failed;
                scope.spawn(move |_| {
                    let outcome = task();
                    if outcome.is_err() {
                        failed.store(true, Ordering::Release);
                    }
                    // Both receivers outlive the scope.
                    let _ = result_tx.send((index, outcome));
                    let _ = permit_tx.send(());
                });
            }
            Ok(())
        })?;
        drop(result_tx);

        let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
        let mut first_error: Option<(usize, GsError)> = None;
        for (index, outcome) in result_rx.iter() {
            match outcome {
                Ok(value) => slots[index] = Some(value),
                Err(e) => {
                    if first_error.as_ref().map_or(true, |(first, _)| index < *first) {
                        first_error = Some((index, e));
                    }
                }
            }
        }
        if let Some((_, e)) = first_error {
            return Err(e);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.ok_or_else(|| internal_error!("task {i} produced no result")))
            .collect()
    }

    fn workers(&self) -> usize {
        self.n_workers
    }

    fn name(&self) -> &str {
        "rayon"
    }
}

/// The executor selected from `n_jobs` / `pre_dispatch` settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Executor {
    Sequential(SequentialExecutor),
    Rayon(RayonExecutor),
}

impl Executor {
    /// `n_jobs == 1` runs on the calling thread with no pool at all.
    pub fn from_config(n_jobs: i32, pre_dispatch: PreDispatch) -> GsResult<Self> {
        let workers = resolve_n_jobs(n_jobs)?;
        if workers == 1 {
            Ok(Self::Sequential(SequentialExecutor))
        } else {
            Ok(Self::Rayon(
                RayonExecutor::new(workers).with_pre_dispatch(pre_dispatch),
            ))
        }
    }
}

impl TrialExecutor for Executor {
    fn execute<T, F>(&self, tasks: Vec<F>) -> GsResult<Vec<T>>
    where
        T: Send,
        F: FnOnce() -> GsResult<T> + Send,
    {
        match self {
            Self::Sequential(inner) => inner.execute(tasks),
            Self::Rayon(inner) => inner.execute(tasks),
        }
    }

    fn workers(&self) -> usize {
        match self {
            Self::Sequential(inner) => inner.workers(),
            Self::Rayon(inner) => inner.workers(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Sequential(inner) => inner.name(),
            Self::Rayon(inner) => inner.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pre_dispatch_parsing() {
        assert_eq!("all".parse::<PreDispatch>().unwrap(), PreDispatch::All);
        assert_eq!("2*n_jobs".parse::<PreDispatch>().unwrap(), PreDispatch::PerJob(2));
        assert_eq!("3 * n_jobs".parse::<PreDispatch>().unwrap(), PreDispatch::PerJob(3));
        assert_eq!("n_jobs".parse::<PreDispatch>().unwrap(), PreDispatch::PerJob(1));
        assert_eq!("16".parse::<PreDispatch>().unwrap(), PreDispatch::Count(16));
        assert!("0".parse::<PreDispatch>().is_err());
        assert!("2*cpus".parse::<PreDispatch>().is_err());
        assert_eq!(PreDispatch::PerJob(2).to_string(), "2*n_jobs");
    }

    #[test]
    fn pre_dispatch_window() {
        assert_eq!(PreDispatch::All.window(4), None);
        assert_eq!(PreDispatch::Count(3).window(4), Some(3));
        assert_eq!(PreDispatch::PerJob(2).window(4), Some(8));
    }

    #[test]
    fn n_jobs_resolution() {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(resolve_n_jobs(3).unwrap(), 3);
        assert_eq!(resolve_n_jobs(-1).unwrap(), cpus);
        assert_eq!(resolve_n_jobs(-2).unwrap(), cpus.saturating_sub(1).max(1));
        assert_eq!(resolve_n_jobs(-10_000).unwrap(), 1);
        assert!(resolve_n_jobs(0).is_err());
    }

    #[test]
    fn executor_from_config() {
        assert_eq!(
            Executor::from_config(1, PreDispatch::All).unwrap(),
            Executor::Sequential(SequentialExecutor)
        );
        let executor = Executor::from_config(4, PreDispatch::Count(2)).unwrap();
        assert_eq!(executor.workers(), 4);
        assert_eq!(executor.name(), "rayon");
    }

    #[test]
    fn rayon_results_follow_submission_order() {
        // Earlier tasks sleep longer so they finish last.
        let tasks: Vec<_> = (0..12u64)
            .map(|i| {
                move || -> GsResult<u64> {
                    thread::sleep(Duration::from_millis(12 - i));
                    Ok(i * 10)
                }
            })
            .collect();

        let executor = RayonExecutor::new(4).with_pre_dispatch(PreDispatch::Count(5));
        let results = executor.execute(tasks).unwrap();
        assert_eq!(results, (0..12u64).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn in_flight_cap_slides() {
        // Task 0 waits for task 3. With two slots, task 3 can only start
        // once tasks 1 and 2 have each released theirs.
        let (started_tx, started_rx) = bounded::<()>(1);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let tasks: Vec<_> = (0..6usize)
            .map(|i| {
                let started_tx = started_tx.clone();
                let started_rx = started_rx.clone();
                let in_flight = &in_flight;
                let peak = &peak;
                move || -> GsResult<usize> {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let result = match i {
                        0 => started_rx
                            .recv_timeout(Duration::from_secs(5))
                            .map(|_| i)
                            .map_err(|_| GsError::Executor("task 3 never started".into())),
                        3 => started_tx
                            .send(())
                            .map(|_| i)
                            .map_err(|_| GsError::Executor("signal closed".into())),
                        _ => Ok(i),
                    };
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    result
                }
            })
            .collect();

        let executor = RayonExecutor::new(2).with_pre_dispatch(PreDispatch::Count(2));
        assert_eq!(executor.execute(tasks).unwrap(), (0..6).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn failure_aborts_batch() {
        let tasks: Vec<_> = (0..6)
            .map(|i| {
                move || -> GsResult<i32> {
                    if i == 4 {
                        Err(GsError::Scoring(format!("task {i} failed")))
                    } else {
                        Ok(i)
                    }
                }
            })
            .collect();

        let err = RayonExecutor::new(2).execute(tasks).unwrap_err();
        assert!(matches!(err, GsError::Scoring(ref m) if m == "task 4 failed"));
    }

    #[test]
    fn sequential_and_empty_batches() {
        let tasks: Vec<_> = (0..3).map(|i| move || -> GsResult<i32> { Ok(i + 1) }).collect();
        assert_eq!(SequentialExecutor.execute(tasks).unwrap(), vec![1, 2, 3]);

        let none: Vec<fn() -> GsResult<i32>> = Vec::new();
        assert!(RayonExecutor::new(3).execute(none).unwrap().is_empty());
    }
}
