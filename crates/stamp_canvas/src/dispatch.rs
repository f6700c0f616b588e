//! Batch dispatcher for running units of work serially or across a worker pool.
//!
//! A request for `count` units is split into contiguous chunks. Each chunk becomes
//! one [`Job`] that a worker processes completely before reporting a single
//! [`JobResult`]. Results are written back by [`Job::sequence_tag`], so the output
//! order is the logical order no matter which worker finishes first.
//!
//! The same dispatcher serves whole images and the stamps inside one image.
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// What to build: `count` units starting at `start_index`, whose first unit begins
/// at object `start_object_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildRequest {
    pub count: usize,
    pub start_index: usize,
    pub start_object_index: usize,
    pub worker_count: usize,
}

impl BuildRequest {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            start_index: 0,
            start_object_index: 0,
            worker_count: 1,
        }
    }

    pub fn with_start(mut self, start_index: usize, start_object_index: usize) -> Self {
        self.start_index = start_index;
        self.start_object_index = start_object_index;
        self
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }
}

/// One chunk of contiguous units handed to a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Job {
    /// Absolute index of the first unit.
    pub unit_index: usize,
    /// Object index at which the first unit starts.
    pub object_index: usize,
    /// Number of units in the chunk.
    pub unit_count: usize,
    /// Zero-based position of the first unit within the request.
    pub sequence_tag: usize,
}

/// A built unit with the wall time it took.
#[derive(Clone, Debug)]
pub struct Built<T> {
    pub value: T,
    pub elapsed: Duration,
}

/// Message sent by a worker after finishing (or failing) a chunk.
#[derive(Debug)]
pub enum JobResult<T> {
    Success {
        sequence_tag: usize,
        items: Vec<Built<T>>,
    },
    Failure {
        sequence_tag: usize,
        worker: usize,
        start: usize,
        error: Error,
    },
}

enum Task {
    Run(Job),
    Stop,
}

/// Builds one unit at a time. Returns the unit's output and how many objects it
/// consumed, which advances the object index for the next unit of the chunk.
pub trait UnitBuilder {
    type Output;

    fn build_unit(
        &mut self,
        unit_index: usize,
        object_index: usize,
    ) -> Result<(Self::Output, usize)>;
}

impl<T, F> UnitBuilder for F
where
    F: FnMut(usize, usize) -> Result<(T, usize)>,
{
    type Output = T;

    #[inline]
    fn build_unit(&mut self, unit_index: usize, object_index: usize) -> Result<(T, usize)> {
        self(unit_index, object_index)
    }
}

/// Shared stop flag raised on the first failure.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolves a configured worker count: `<= 0` means one per available CPU.
pub fn resolve_worker_count(requested: i64) -> usize {
    if requested > 0 {
        return requested as usize;
    }
    let n = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    debug!("Worker count {requested} resolved to {n} available CPUs.");
    n
}

/// Chunk size for `count` units over `workers`: at most `ceil(count / workers)`,
/// a multiple of `atomic`, near the geometric mean of the two bounds.
pub fn chunk_size(count: usize, workers: usize, atomic: usize) -> usize {
    let atomic = atomic.max(1);
    let max_chunk = count.div_ceil(workers.max(1));
    if max_chunk < atomic {
        return atomic;
    }
    let groups = (max_chunk as f64 / atomic as f64).sqrt().round() as usize;
    atomic * groups.max(1)
}

/// Splits a request into jobs. Object offsets come from cumulative per-unit object
/// counts, never from a running counter shared with workers.
pub fn plan_jobs<N>(
    request: &BuildRequest,
    chunk: usize,
    mut objects_in_unit: N,
) -> Result<Vec<Job>>
where
    N: FnMut(usize) -> Result<usize>,
{
    let chunk = chunk.max(1);
    let mut jobs = Vec::with_capacity(request.count.div_ceil(chunk));
    let mut object_index = request.start_object_index;
    for k in (0..request.count).step_by(chunk) {
        let unit_count = chunk.min(request.count - k);
        let unit_index = request.start_index + k;
        jobs.push(Job {
            unit_index,
            object_index,
            unit_count,
            sequence_tag: k,
        });
        for i in 0..unit_count {
            object_index += objects_in_unit(unit_index + i)?;
        }
    }
    Ok(jobs)
}

/// Runs requests serially or over a fixed pool of scoped worker threads.
#[derive(Clone, Debug)]
pub struct BatchDispatcher {
    atomic_size: usize,
    label: &'static str,
}

impl Default for BatchDispatcher {
    fn default() -> Self {
        Self {
            atomic_size: 1,
            label: "unit",
        }
    }
}

impl BatchDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units are grouped so a group of `atomic_size` is never split across workers.
    pub fn with_atomic_size(mut self, atomic_size: usize) -> Self {
        self.atomic_size = atomic_size.max(1);
        self
    }

    /// Name used for units in log messages.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn atomic_size(&self) -> usize {
        self.atomic_size
    }

    /// Builds every unit of `request` and returns them in logical order.
    ///
    /// `objects_in_unit` is only consulted when the request is split into chunks.
    /// `make_builder` is called once per worker, on that worker's thread, so each
    /// worker owns its builder state outright.
    pub fn run<B, N, F>(
        &self,
        request: &BuildRequest,
        objects_in_unit: N,
        make_builder: F,
    ) -> Result<Vec<Built<B::Output>>>
    where
        B: UnitBuilder,
        B::Output: Send,
        N: FnMut(usize) -> Result<usize>,
        F: Fn(usize) -> B + Sync,
    {
        let count = request.count;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut workers = request.worker_count.max(1);
        if workers > count {
            debug!(
                "There are only {count} {}s. Reducing worker count to {count}.",
                self.label
            );
            workers = count;
        }

        if workers == 1 {
            let job = Job {
                unit_index: request.start_index,
                object_index: request.start_object_index,
                unit_count: count,
                sequence_tag: 0,
            };
            let mut builder = make_builder(0);
            return run_chunk(&mut builder, &job, None, self.label);
        }

        warn!("Using {workers} workers for {} processing.", self.label);
        let chunk = chunk_size(count, workers, self.atomic_size);
        debug!("{}s per task = {chunk}", self.label);
        let jobs = plan_jobs(request, chunk, objects_in_unit)?;
        self.run_pool(count, workers, jobs, &make_builder)
    }

    fn run_pool<B, F>(
        &self,
        count: usize,
        workers: usize,
        jobs: Vec<Job>,
        make_builder: &F,
    ) -> Result<Vec<Built<B::Output>>>
    where
        B: UnitBuilder,
        B::Output: Send,
        F: Fn(usize) -> B + Sync,
    {
        let (task_tx, task_rx) = unbounded::<Task>();
        let (result_tx, result_rx) = unbounded::<JobResult<B::Output>>();
        let n_jobs = jobs.len();
        for job in jobs {
            task_tx.send(Task::Run(job)).map_err(|_| Error::Disconnected)?;
        }

        let cancel = CancelToken::new();
        let mut slots: Vec<Option<Built<B::Output>>> = (0..count).map(|_| None).collect();
        let label = self.label;

        let drained = thread::scope(|scope| {
            for worker in 0..workers {
                let tasks = task_rx.clone();
                let results = result_tx.clone();
                let cancel = cancel.clone();
                scope.spawn(move || {
                    worker_loop(worker, make_builder, &tasks, &results, &cancel, label)
                });
            }
            drop(result_tx);

            let drained = drain_results(&result_rx, n_jobs, &mut slots, label);
            if drained.is_err() {
                cancel.cancel();
            }
            for _ in 0..workers {
                let _ = task_tx.send(Task::Stop);
            }
            drained
        });
        drained?;

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Other(format!("missing {label} result after drain")))
    }
}

fn drain_results<T>(
    results: &Receiver<JobResult<T>>,
    n_jobs: usize,
    slots: &mut [Option<Built<T>>],
    label: &str,
) -> Result<()> {
    for _ in 0..n_jobs {
        match results.recv() {
            Ok(JobResult::Success {
                sequence_tag,
                items,
            }) => {
                let n = items.len();
                for (k, item) in items.into_iter().enumerate() {
                    slots[sequence_tag + k] = Some(item);
                }
                debug!(
                    "Successfully returned results for {label}s {}--{}.",
                    sequence_tag,
                    sequence_tag + n.saturating_sub(1)
                );
            }
            Ok(JobResult::Failure {
                sequence_tag,
                worker,
                start,
                error,
            }) => {
                error!(
                    "Exception caught during job starting with {label} {start} \
                     (slot {sequence_tag}): {error}"
                );
                error!("Aborting the rest of this batch.");
                return Err(Error::Worker {
                    worker,
                    start,
                    source: Box::new(error),
                });
            }
            Err(_) => return Err(Error::Disconnected),
        }
    }
    Ok(())
}

fn worker_loop<B, F>(
    worker: usize,
    make_builder: &F,
    tasks: &Receiver<Task>,
    results: &Sender<JobResult<B::Output>>,
    cancel: &CancelToken,
    label: &str,
) where
    B: UnitBuilder,
    F: Fn(usize) -> B,
{
    let mut builder = make_builder(worker);
    for task in tasks.iter() {
        let job = match task {
            Task::Stop => break,
            Task::Run(job) => job,
        };
        if cancel.is_cancelled() {
            break;
        }
        debug!(
            "worker {worker}: received job to do {} {label}s, starting with {}",
            job.unit_count, job.unit_index
        );
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_chunk(&mut builder, &job, Some(cancel), label)
        }))
        .unwrap_or_else(|payload| Err(Error::Other(panic_message(payload.as_ref()))));

        let message = match outcome {
            Ok(items) => JobResult::Success {
                sequence_tag: job.sequence_tag,
                items,
            },
            Err(error) => {
                debug!("worker {worker}: caught error {error}");
                JobResult::Failure {
                    sequence_tag: job.sequence_tag,
                    worker,
                    start: job.unit_index,
                    error,
                }
            }
        };
        if results.send(message).is_err() {
            break;
        }
        debug!(
            "worker {worker}: finished job {} -- {}",
            job.unit_index,
            job.unit_index + job.unit_count - 1
        );
    }
}

fn run_chunk<B: UnitBuilder>(
    builder: &mut B,
    job: &Job,
    cancel: Option<&CancelToken>,
    label: &str,
) -> Result<Vec<Built<B::Output>>> {
    let mut object_index = job.object_index;
    let mut items = Vec::with_capacity(job.unit_count);
    for k in 0..job.unit_count {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Other("batch cancelled".into()));
        }
        let unit_index = job.unit_index + k;
        let t0 = Instant::now();
        let (value, consumed) = builder.build_unit(unit_index, object_index)?;
        let elapsed = t0.elapsed();
        info!(
            "{label} {unit_index}: time = {:.6} sec",
            elapsed.as_secs_f64()
        );
        object_index += consumed;
        items.push(Built { value, elapsed });
    }
    Ok(items)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    fn objects_for(unit: usize) -> usize {
        unit % 3 + 1
    }

    fn run_with(workers: usize, count: usize) -> Vec<(usize, usize)> {
        let request = BuildRequest::new(count)
            .with_start(5, 100)
            .with_workers(workers);
        BatchDispatcher::new()
            .run(
                &request,
                |unit| Ok(objects_for(unit)),
                |_worker| {
                    |unit: usize, object: usize| -> Result<((usize, usize), usize)> {
                        // Later units finish first to scramble completion order.
                        std::thread::sleep(Duration::from_micros(((40 - unit % 40) * 20) as u64));
                        Ok(((unit, object), objects_for(unit)))
                    }
                },
            )
            .unwrap()
            .into_iter()
            .map(|b| b.value)
            .collect()
    }

    #[test]
    fn chunk_size_respects_bounds() {
        assert_eq!(chunk_size(100, 4, 1), 5);
        assert_eq!(chunk_size(10, 4, 1), 2);
        assert_eq!(chunk_size(3, 4, 1), 1);
        assert_eq!(chunk_size(4, 4, 6), 6);
        for (count, workers, atomic) in [(100, 3, 4), (37, 2, 3), (64, 8, 2), (1000, 7, 5)] {
            let c = chunk_size(count, workers, atomic);
            assert_eq!(c % atomic, 0);
            assert!(c >= atomic);
            assert!(c <= count.div_ceil(workers).max(atomic));
        }
    }

    #[test]
    fn plan_jobs_partitions_request() {
        let request = BuildRequest::new(10).with_start(3, 50);
        let jobs = plan_jobs(&request, 4, |unit| Ok(objects_for(unit))).unwrap();
        let tags: Vec<_> = jobs.iter().map(|j| (j.sequence_tag, j.unit_count)).collect();
        assert_eq!(tags, vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(jobs[1].unit_index, 7);

        let serial: usize = (3..7).map(objects_for).sum();
        assert_eq!(jobs[1].object_index, 50 + serial);
    }

    #[test]
    fn atomic_groups_are_never_split() {
        let request = BuildRequest::new(24).with_workers(4);
        let c = chunk_size(24, 4, 3);
        let jobs = plan_jobs(&request, c, |_| Ok(1)).unwrap();
        for job in &jobs[..jobs.len() - 1] {
            assert_eq!(job.unit_count % 3, 0);
            assert_eq!(job.sequence_tag % 3, 0);
        }
    }

    #[test]
    fn parallel_output_matches_serial() {
        let serial = run_with(1, 40);
        assert_eq!(serial.len(), 40);
        assert_eq!(serial[0], (5, 100));
        for workers in [2, 4] {
            assert_eq!(run_with(workers, 40), serial);
        }
    }

    #[test]
    fn workers_reduced_to_unit_count() {
        assert_eq!(run_with(8, 3), run_with(1, 3));
        assert!(run_with(4, 0).is_empty());
    }

    #[test]
    fn first_failure_aborts_batch() {
        let built = AtomicUsize::new(0);
        let built = &built;
        let request = BuildRequest::new(50).with_workers(3);
        let err = BatchDispatcher::new()
            .with_label("image")
            .run(
                &request,
                |_| Ok(1),
                move |_worker| {
                    move |unit: usize, _object: usize| -> Result<(usize, usize)> {
                        built.fetch_add(1, Ordering::SeqCst);
                        if unit == 7 {
                            Err(Error::Other("bad unit".into()))
                        } else {
                            std::thread::sleep(Duration::from_millis(1));
                            Ok((unit, 1))
                        }
                    }
                },
            )
            .unwrap_err();
        match err {
            Error::Worker { start, source, .. } => {
                assert!(start <= 7);
                assert!(matches!(*source, Error::Other(ref m) if m == "bad unit"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn serial_failure_is_returned_unwrapped() {
        let request = BuildRequest::new(5);
        let err = BatchDispatcher::new()
            .run(&request, |_| Ok(1), |_| {
                |unit: usize, _object: usize| -> Result<(usize, usize)> {
                    if unit == 2 {
                        Err(Error::config("size", "bad"))
                    } else {
                        Ok((unit, 1))
                    }
                }
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn panicking_worker_reports_failure() {
        let request = BuildRequest::new(8).with_workers(2);
        let err = BatchDispatcher::new()
            .run(&request, |_| Ok(1), |_| {
                |unit: usize, _object: usize| -> Result<(usize, usize)> {
                    if unit == 5 {
                        panic!("stamp exploded");
                    }
                    Ok((unit, 1))
                }
            })
            .unwrap_err();
        assert!(err.to_string().contains("stamp exploded"));
    }

    #[test]
    fn resolve_worker_count_uses_cpus_for_non_positive() {
        assert_eq!(resolve_worker_count(3), 3);
        assert!(resolve_worker_count(0) >= 1);
        assert!(resolve_worker_count(-1) >= 1);
    }
}
