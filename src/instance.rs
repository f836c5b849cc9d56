//! The instance: owner of the registry, caches, score state, queue and
//! worker pool. Every master operation runs against one instance.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::batch::BatchStore;
use crate::cache::CacheManager;
use crate::config::MasterConfig;
use crate::dictionary::DictionaryStore;
use crate::processor::{spawn_workers, ProcessorQueue, WorkerState};
use crate::regularizer::{build_regularizers, PhiRegularizer};
use crate::registry::MatrixRegistry;
use crate::score::{build_calculators, ScoreCalculator, ScoreManager, ScoreTracker};

pub(crate) struct Instance {
    state: Arc<WorkerState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cache_manager: Arc<CacheManager>,
    score_manager: Arc<ScoreManager>,
    score_tracker: ScoreTracker,
    dictionaries: DictionaryStore,
    config: RwLock<MasterConfig>,
    regularizers: RwLock<Vec<Arc<dyn PhiRegularizer>>>,
}

impl Instance {
    pub(crate) fn new(config: MasterConfig) -> Self {
        let state = Arc::new(WorkerState {
            queue: ProcessorQueue::new(),
            registry: MatrixRegistry::new(),
            batches: BatchStore::new(),
            score_calculators: RwLock::new(build_calculators(&config.scores)),
            shutdown: std::sync::atomic::AtomicBool::new(false),
        });
        let workers = Mutex::new(spawn_workers(&state, config.threads));
        let regularizers = RwLock::new(build_regularizers(&config.regularizers));
        Self {
            state,
            workers,
            cache_manager: Arc::new(CacheManager::new()),
            score_manager: Arc::new(ScoreManager::new()),
            score_tracker: ScoreTracker::new(),
            dictionaries: DictionaryStore::new(),
            config: RwLock::new(config),
            regularizers,
        }
    }

    /// Replaces the config, recreating regularizers, score calculators and
    /// the worker pool.
    pub(crate) fn reconfigure(&self, config: MasterConfig) {
        *self.state.score_calculators.write() = build_calculators(&config.scores);
        *self.regularizers.write() = build_regularizers(&config.regularizers);

        let thread_count = config.threads;
        *self.config.write() = config;

        // Drain the old pool, then restart with the new size.
        self.stop_workers();
        self.state.shutdown.store(false, Ordering::Release);
        *self.workers.lock() = spawn_workers(&self.state, thread_count);
    }

    fn stop_workers(&self) {
        self.state.shutdown.store(true, Ordering::Release);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub(crate) fn processor_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub(crate) fn registry(&self) -> &MatrixRegistry {
        &self.state.registry
    }

    pub(crate) fn batches(&self) -> &BatchStore {
        &self.state.batches
    }

    pub(crate) fn queue(&self) -> &ProcessorQueue {
        &self.state.queue
    }

    pub(crate) fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.cache_manager
    }

    pub(crate) fn score_manager(&self) -> &Arc<ScoreManager> {
        &self.score_manager
    }

    pub(crate) fn score_tracker(&self) -> &ScoreTracker {
        &self.score_tracker
    }

    pub(crate) fn dictionaries(&self) -> &DictionaryStore {
        &self.dictionaries
    }

    pub(crate) fn config(&self) -> MasterConfig {
        self.config.read().clone()
    }

    pub(crate) fn regularizer(&self, name: &str) -> Option<Arc<dyn PhiRegularizer>> {
        self.regularizers
            .read()
            .iter()
            .find(|r| r.name() == name)
            .cloned()
    }

    pub(crate) fn score_calculators(&self) -> Vec<Arc<dyn ScoreCalculator>> {
        self.state.score_calculators.read().clone()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.stop_workers();
    }
}
