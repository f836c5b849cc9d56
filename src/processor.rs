//! The worker side of training: the task queue, per-op completion
//! tracking, and the per-batch E-step kernel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::args::{ProcessBatchesArgs, ThetaMatrixType};
use crate::batch::{Batch, BatchRef, BatchStore};
use crate::cache::{CacheManager, ThetaSlice};
use crate::error::Result;
use crate::phi::PhiMatrix;
use crate::registry::MatrixRegistry;
use crate::score::{ScoreCalculator, ScoreManager};

/// Poll interval of orchestrator waits and worker dequeues.
pub(crate) const IDLE_LOOP_MS: u64 = 1;

/// Process-wide task id source.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// Allocates a fresh task id, unique for the process lifetime.
#[must_use]
pub fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Outstanding task ids of one logical operation.
///
/// The orchestrator registers every task before enqueueing it; workers
/// remove their task id after processing, success or failure, so the
/// operation always drains.
#[derive(Debug, Default)]
pub struct BatchManager {
    tasks: Mutex<HashSet<u64>>,
}

impl BatchManager {
    /// Creates a manager with no outstanding tasks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an outstanding task.
    pub fn add(&self, task_id: u64) {
        self.tasks.lock().insert(task_id);
    }

    /// Marks a task complete.
    pub fn remove(&self, task_id: u64) {
        self.tasks.lock().remove(&task_id);
    }

    /// True once every registered task has completed.
    #[must_use]
    pub fn is_everything_processed(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Blocks until every registered task has completed, polling at the
    /// idle interval.
    pub fn wait(&self) {
        while !self.is_everything_processed() {
            thread::sleep(Duration::from_millis(IDLE_LOOP_MS));
        }
    }
}

/// One work unit: a batch reference plus the handles the worker needs to
/// deposit its results.
pub struct ProcessorInput {
    /// Task id, registered with `batch_manager` before enqueue.
    pub task_id: u64,
    /// Registry name of the Φ to read.
    pub pwt_source_name: String,
    /// Registry name of the counter target, when the op accumulates one.
    pub nwt_target_name: Option<String>,
    /// The batch to process.
    pub batch: BatchRef,
    /// Weight of this batch's contribution.
    pub batch_weight: f32,
    /// Completion tracker of the owning operation.
    pub batch_manager: Arc<BatchManager>,
    /// Destination for per-batch score contributions.
    pub score_manager: Option<Arc<ScoreManager>>,
    /// Destination for the Θ slice.
    pub cache_manager: Option<Arc<CacheManager>>,
    /// Destination for per-(document, word) posterior rows.
    pub ptdw_cache_manager: Option<Arc<CacheManager>>,
    /// Source of previously computed Θ rows for warm starts.
    pub reuse_theta_cache: Option<Arc<CacheManager>>,
    /// Run-time argument snapshot of the owning operation.
    pub args: Arc<ProcessBatchesArgs>,
}

/// Unbounded multi-producer/multi-consumer FIFO of processor inputs.
#[derive(Default)]
pub struct ProcessorQueue {
    queue: Mutex<VecDeque<ProcessorInput>>,
    condvar: Condvar,
}

impl ProcessorQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues one input and wakes a worker.
    pub fn push(&self, input: ProcessorInput) {
        self.queue.lock().push_back(input);
        self.condvar.notify_one();
    }

    /// Dequeues the next input, waiting up to the idle interval.
    #[must_use]
    pub fn pop(&self) -> Option<ProcessorInput> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            let _ = self
                .condvar
                .wait_for(&mut queue, Duration::from_millis(IDLE_LOOP_MS));
        }
        queue.pop_front()
    }

    /// Number of queued inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// State shared between the orchestrator and the worker threads.
pub(crate) struct WorkerState {
    pub queue: ProcessorQueue,
    pub registry: MatrixRegistry,
    pub batches: BatchStore,
    pub score_calculators: RwLock<Vec<Arc<dyn ScoreCalculator>>>,
    pub shutdown: AtomicBool,
}

/// Spawns `count` worker threads draining the shared queue.
pub(crate) fn spawn_workers(state: &Arc<WorkerState>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|index| {
            let state = Arc::clone(state);
            thread::Builder::new()
                .name(format!("processor-{index}"))
                .spawn(move || worker_loop(&state))
                .expect("spawning a worker thread")
        })
        .collect()
}

fn worker_loop(state: &Arc<WorkerState>) {
    while !state.shutdown.load(Ordering::Acquire) {
        let Some(input) = state.queue.pop() else {
            continue;
        };
        if let Err(err) = process_input(state, &input) {
            log::warn!(
                "batch processing failed, dropping contribution (task {}): {err}",
                input.task_id
            );
        }
        input.batch_manager.remove(input.task_id);
    }
}

/// Processes one input end to end: resolve the batch, run the E-step,
/// deposit N contributions, Θ slices and score contributions.
fn process_input(state: &Arc<WorkerState>, input: &ProcessorInput) -> Result<()> {
    let batch = resolve_batch(state, &input.batch)?;
    let phi = state.registry.get_or_fail(&input.pwt_source_name)?;

    let reused = input
        .reuse_theta_cache
        .as_ref()
        .and_then(|cache| cache.get(&batch.id));
    let outcome = infer_batch(
        &batch,
        phi.as_ref(),
        &input.args,
        input.batch_weight,
        reused.as_ref(),
    );

    // The target may have been disposed mid-op (cooperative cancellation):
    // the contribution is silently dropped.
    if let Some(target_name) = &input.nwt_target_name {
        if let Some(n_wt) = state.registry.get(target_name) {
            for (token_id, increment) in &outcome.contributions {
                let token = phi.token(*token_id);
                if let Some(row) = n_wt.token_index(token) {
                    n_wt.increase_row(row, increment);
                }
            }
        }
    }

    if let Some(scores) = &input.score_manager {
        for calculator in state.score_calculators.read().iter() {
            if !calculator.is_cumulative() {
                continue;
            }
            if let Some(value) =
                calculator.score_batch(&batch, phi.as_ref(), &outcome.theta, &input.args)
            {
                scores.append(calculator.name(), &value);
            }
        }
    }

    if let Some(cache) = &input.cache_manager {
        cache.insert(outcome.theta);
    }
    if let Some(cache) = &input.ptdw_cache_manager {
        cache.insert(outcome.ptdw);
    }
    Ok(())
}

fn resolve_batch(state: &Arc<WorkerState>, batch: &BatchRef) -> Result<Arc<Batch>> {
    match batch {
        BatchRef::InMemory(batch) => Ok(Arc::clone(batch)),
        BatchRef::Name(name) => match state.batches.get(name) {
            Some(batch) => Ok(batch),
            None => Batch::load(Path::new(name)).map(Arc::new),
        },
    }
}

/// Results of one batch inference.
struct BatchOutcome {
    /// Per-document topic distributions.
    theta: ThetaSlice,
    /// Per-(document, word) posteriors.
    ptdw: ThetaSlice,
    /// Additive counter contributions keyed by the source Φ row.
    contributions: HashMap<usize, Vec<f32>>,
}

/// One token occurrence of a document, resolved against the model.
struct Occurrence {
    phi_row_id: usize,
    phi_row: Vec<f32>,
    weighted_count: f32,
}

/// Runs the E-step over every document of a batch against a fixed Φ.
fn infer_batch(
    batch: &Batch,
    phi: &dyn PhiMatrix,
    args: &ProcessBatchesArgs,
    batch_weight: f32,
    reused: Option<&ThetaSlice>,
) -> BatchOutcome {
    let topic_size = phi.topic_size();
    let inner_iterations = args.inner_iterations_count.unwrap_or(10).max(1);
    let uniform = 1.0 / topic_size.max(1) as f32;
    let want_ptdw = matches!(
        args.theta_matrix_type,
        ThetaMatrixType::DensePtdw | ThetaMatrixType::SparsePtdw
    );

    let mut theta = ThetaSlice {
        batch_id: batch.id.clone(),
        topic_names: phi.topic_names().to_vec(),
        item_ids: Vec::with_capacity(batch.items.len()),
        item_titles: Vec::with_capacity(batch.items.len()),
        weights: Vec::with_capacity(batch.items.len()),
    };
    let mut ptdw = ThetaSlice {
        batch_id: batch.id.clone(),
        topic_names: phi.topic_names().to_vec(),
        item_ids: Vec::new(),
        item_titles: Vec::new(),
        weights: Vec::new(),
    };
    let mut contributions: HashMap<usize, Vec<f32>> = HashMap::new();

    for (item_index, item) in batch.items.iter().enumerate() {
        let occurrences = resolve_occurrences(batch, item_index, phi, args);

        let mut item_theta: Vec<f32> = reused
            .and_then(|slice| slice.weights.get(item_index).cloned())
            .filter(|row| row.len() == topic_size)
            .unwrap_or_else(|| vec![uniform; topic_size]);

        let mut posterior = vec![0.0f32; topic_size];
        let mut n_td = vec![0.0f32; topic_size];
        for _ in 0..inner_iterations {
            n_td.iter_mut().for_each(|v| *v = 0.0);
            for occurrence in &occurrences {
                let z = posterior_into(&occurrence.phi_row, &item_theta, args.opt_for_avx, &mut posterior);
                if z <= 0.0 {
                    continue;
                }
                for (acc, &p) in n_td.iter_mut().zip(&posterior) {
                    *acc += occurrence.weighted_count * p / z;
                }
            }
            let total: f32 = n_td.iter().sum();
            if total > 0.0 {
                for (t, &n) in item_theta.iter_mut().zip(&n_td) {
                    *t = n / total;
                }
            }
        }

        // Final posteriors feed the counter contributions and, on request,
        // the ptdw rows.
        for occurrence in &occurrences {
            let z = posterior_into(&occurrence.phi_row, &item_theta, args.opt_for_avx, &mut posterior);
            if z <= 0.0 {
                continue;
            }
            let row = contributions
                .entry(occurrence.phi_row_id)
                .or_insert_with(|| vec![0.0; topic_size]);
            for topic_id in 0..topic_size {
                row[topic_id] +=
                    batch_weight * occurrence.weighted_count * posterior[topic_id] / z;
            }
            if want_ptdw {
                ptdw.item_ids.push(item.id);
                ptdw.item_titles.push(item.title.clone());
                ptdw.weights
                    .push(posterior.iter().map(|&p| p / z).collect());
            }
        }

        theta.item_ids.push(item.id);
        theta.item_titles.push(item.title.clone());
        theta.weights.push(item_theta);
    }

    BatchOutcome {
        theta,
        ptdw,
        contributions,
    }
}

/// Resolves an item's token occurrences against the model, applying the
/// class filter and class weights.
fn resolve_occurrences(
    batch: &Batch,
    item_index: usize,
    phi: &dyn PhiMatrix,
    args: &ProcessBatchesArgs,
) -> Vec<Occurrence> {
    let item = &batch.items[item_index];
    let mut occurrences = Vec::with_capacity(item.token_ids.len());
    for (&token_id, &count) in item.token_ids.iter().zip(&item.token_counts) {
        let Some(token) = batch.tokens.get(token_id as usize) else {
            continue;
        };
        if !args.class_enabled(&token.class_id) {
            continue;
        }
        let Some(phi_row_id) = phi.token_index(token) else {
            continue;
        };
        occurrences.push(Occurrence {
            phi_row_id,
            phi_row: phi.row_copy(phi_row_id),
            weighted_count: count * args.class_weight(&token.class_id),
        });
    }
    occurrences
}

/// Writes the unnormalized posterior `phi_row[t] * theta[t]` into `out`,
/// returning its sum. The fused path is a single zip chain the
/// auto-vectorizer handles well; both paths produce identical values.
fn posterior_into(phi_row: &[f32], theta: &[f32], fused: bool, out: &mut [f32]) -> f32 {
    if fused {
        out.iter_mut()
            .zip(phi_row.iter().zip(theta))
            .map(|(slot, (&p, &t))| {
                *slot = p * t;
                *slot
            })
            .sum()
    } else {
        let mut z = 0.0;
        for topic_id in 0..out.len() {
            out[topic_id] = phi_row[topic_id] * theta[topic_id];
            z += out[topic_id];
        }
        z
    }
}
