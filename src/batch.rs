//! Batch execution of a per-file transform over a bounded worker pool.
//!
//! Small inputs (or a single effective worker) run sequentially in input
//! order. Larger inputs are split into contiguous chunks, each chunk runs on a
//! pool thread with its own clone of the transform, and chunk reports are
//! folded into the result in completion order.
//!
//! A failing item never aborts the batch: returned errors and panics alike
//! become `"<path>: <message>"` strings in [`BatchResult::errors`]. The only
//! failure that escapes [`BatchExecutor::process`] is the pool itself.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::memory::MemorySampler;
use crate::parallel::{WorkerPool, available_parallelism};
use crate::terminal::ProgressBar;

/// Default number of items per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default upper bound on worker threads.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Knobs for one [`BatchExecutor`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_workers: usize,
    /// Render a progress bar (only on a terminal).
    pub progress: bool,
    /// Label printed in front of the progress bar.
    pub label: String,
    /// Advisory resident-memory ceiling checked after each chunk while
    /// progress reporting is active.
    pub memory_limit_mb: Option<u64>,
    /// Spawn `max_workers` threads even when fewer CPUs are available.
    pub pin_workers: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            progress: false,
            label: String::from("Processing"),
            memory_limit_mb: None,
            pin_workers: false,
        }
    }
}

/// Aggregate outcome of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult<T> {
    pub successful: usize,
    pub total: usize,
    /// One `"<path>: <message>"` line per failed item, or one line per chunk
    /// that failed as a whole.
    pub errors: Vec<String>,
    /// Values returned by successful transforms.
    pub outputs: Vec<T>,
    /// Advisory notices that do not affect the counts.
    pub warnings: Vec<String>,
}

impl<T> BatchResult<T> {
    pub fn empty() -> Self {
        Self {
            successful: 0,
            total: 0,
            errors: Vec::new(),
            outputs: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failed(&self) -> usize {
        self.total.saturating_sub(self.successful)
    }

    pub fn all_succeeded(&self) -> bool {
        self.successful == self.total
    }

    /// Fold another run's counts, messages and outputs into this one.
    pub fn merge(&mut self, other: BatchResult<T>) {
        self.successful += other.successful;
        self.total += other.total;
        self.errors.extend(other.errors);
        self.outputs.extend(other.outputs);
        self.warnings.extend(other.warnings);
    }

    fn record(&mut self, outcome: std::result::Result<T, String>) {
        match outcome {
            Ok(output) => {
                self.successful += 1;
                self.outputs.push(output);
            }
            Err(message) => {
                warn!("{message}");
                self.errors.push(message);
            }
        }
    }
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Runs a transform over many files.
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    options: BatchOptions,
}

/// What a pool thread sends back for one chunk.
struct ChunkReport<T> {
    index: usize,
    size: usize,
    outcomes: std::result::Result<Vec<std::result::Result<T, String>>, String>,
}

impl BatchExecutor {
    pub fn new(options: BatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Apply `transform` to every item.
    ///
    /// Fails only with [`Error::BatchProcessing`](crate::Error::BatchProcessing)
    /// when the worker pool cannot be built or fed.
    pub fn process<T, E, F>(&self, items: Vec<PathBuf>, transform: F) -> Result<BatchResult<T>>
    where
        F: Fn(&Path) -> std::result::Result<T, E> + Clone + Send + 'static,
        E: Display,
        T: Send + 'static,
    {
        if items.is_empty() {
            return Ok(BatchResult::empty());
        }

        let workers = if self.options.pin_workers {
            self.options.max_workers.min(items.len())
        } else {
            effective_workers(self.options.max_workers, items.len())
        };
        debug!(items = items.len(), workers, "starting batch");
        if workers <= 1 {
            Ok(self.process_sequential(items, &transform))
        } else {
            self.process_parallel(items, transform, workers)
        }
    }

    fn process_sequential<T, E, F>(&self, items: Vec<PathBuf>, transform: &F) -> BatchResult<T>
    where
        F: Fn(&Path) -> std::result::Result<T, E>,
        E: Display,
    {
        let mut result = BatchResult::empty();
        result.total = items.len();
        let mut progress = ProgressBar::new(&self.options.label, items.len(), self.options.progress);

        for item in &items {
            result.record(run_item(transform, item));
            progress.inc_by(1);
        }

        progress.finish();
        result
    }

    fn process_parallel<T, E, F>(
        &self,
        items: Vec<PathBuf>,
        transform: F,
        workers: usize,
    ) -> Result<BatchResult<T>>
    where
        F: Fn(&Path) -> std::result::Result<T, E> + Clone + Send + 'static,
        E: Display,
        T: Send + 'static,
    {
        let mut result = BatchResult::empty();
        result.total = items.len();

        let chunks: Vec<Vec<PathBuf>> = items
            .chunks(self.options.batch_size.max(1))
            .map(<[PathBuf]>::to_vec)
            .collect();
        let chunk_count = chunks.len();

        let pool = WorkerPool::new(workers)?;
        let (sender, receiver) = mpsc::channel::<ChunkReport<T>>();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let sender = sender.clone();
            let transform = transform.clone();
            pool.execute(move || {
                let size = chunk.len();
                let outcomes = panic::catch_unwind(AssertUnwindSafe(|| {
                    chunk
                        .iter()
                        .map(|item| run_item(&transform, item))
                        .collect::<Vec<_>>()
                }))
                .map_err(|payload| panic_message(payload.as_ref()));
                let _ = sender.send(ChunkReport {
                    index,
                    size,
                    outcomes,
                });
            })?;
        }
        drop(sender);

        let mut progress = ProgressBar::new(&self.options.label, result.total, self.options.progress);
        let mut sampler = self.memory_sampler();
        let mut reported = BTreeSet::new();

        for report in receiver {
            reported.insert(report.index);
            match report.outcomes {
                Ok(outcomes) => outcomes.into_iter().for_each(|o| result.record(o)),
                Err(message) => result.record(Err(format!("batch {}: {message}", report.index))),
            }
            progress.inc_by(report.size);

            if let (Some(sampler), Some(limit)) = (sampler.as_mut(), self.options.memory_limit_mb) {
                if let Some(warning) = sampler.check_limit(limit) {
                    warn!("{warning}");
                    result.warnings.push(warning);
                }
            }
        }
        progress.finish();
        drop(pool);

        for index in (0..chunk_count).filter(|index| !reported.contains(index)) {
            result.record(Err(format!("batch {index}: worker exited without reporting")));
        }

        debug!(
            successful = result.successful,
            total = result.total,
            "batch finished"
        );
        Ok(result)
    }

    fn memory_sampler(&self) -> Option<MemorySampler> {
        (self.options.progress && self.options.memory_limit_mb.is_some()).then(MemorySampler::new)
    }
}

/// Run one item, turning both returned errors and panics into a message.
fn run_item<T, E, F>(transform: &F, item: &Path) -> std::result::Result<T, String>
where
    F: Fn(&Path) -> std::result::Result<T, E>,
    E: Display,
{
    match panic::catch_unwind(AssertUnwindSafe(|| transform(item))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(format!("{}: {err}", item.display())),
        Err(payload) => Err(format!("{}: {}", item.display(), panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        String::from("panicked")
    }
}

/// `min(max_workers, available CPUs, items)`.
pub fn effective_workers(max_workers: usize, items: usize) -> usize {
    max_workers.min(available_parallelism()).min(items)
}

/// Suggested chunk size for `total` items over `workers` threads.
pub fn optimal_batch_size(total: usize, workers: usize) -> usize {
    let workers = workers.max(1);
    if total <= 10 {
        1
    } else if total <= 100 {
        (total / workers).max(1)
    } else {
        (total / (workers * 4)).max(10)
    }
}
