//! The master API: model lifecycle, single-shot requests, and the training
//! schedules.
//!
//! # Quick Start
//!
//! ```
//! use tematica::batch::{Batch, Token};
//! use tematica::{FitOfflineArgs, InitializeModelArgs, MasterConfig, Master};
//!
//! let master = Master::new(
//!     MasterConfig::new().with_topic_count(2).with_threads(1),
//! );
//!
//! let mut batch = Batch::new("b0", vec![Token::new("cat"), Token::new("dog")]);
//! batch.add_item(vec![0, 1], vec![3.0, 1.0]);
//! master.import_batches(vec![batch]);
//!
//! master.gather_dictionary("main", &[]).expect("batches registered");
//! master
//!     .initialize_model(&InitializeModelArgs::from_dictionary("main"))
//!     .expect("dictionary is not empty");
//! master
//!     .fit_offline(&FitOfflineArgs::with_passes(2))
//!     .expect("training succeeds");
//!
//! let model = master.get_topic_model(&Default::default()).expect("model exists");
//! assert_eq!(model.topic_size(), 2);
//! ```

mod executor;
mod iterators;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::args::{
    ExportModelArgs, FitOfflineArgs, FitOnlineArgs, GetThetaMatrixArgs, GetTopicModelArgs,
    ImportModelArgs, InitializeModelArgs, MatrixLayout, MergeModelArgs, NormalizeModelArgs,
    ProcessBatchesArgs, RegularizeModelArgs, ThetaMatrixType, TransformArgs,
};
use crate::batch::{Batch, BatchRef, Token};
use crate::cache::{CacheManager, ThetaMatrix};
use crate::config::MasterConfig;
use crate::dictionary::Dictionary;
use crate::error::{Result, TematicaError};
use crate::instance::Instance;
use crate::io;
use crate::phi::{ops, AttachedBuffer, AttachedPhiMatrix, DensePhiMatrix, PhiMatrix, TopicModel};
use crate::processor::{next_task_id, BatchManager, ProcessorInput};
use crate::score::{ScoreManager, ScoreValue};

use executor::Executor;
use iterators::{OfflineBatchesIterator, OnlineBatchesIterator};

/// Result of a synchronous processing request.
#[derive(Debug, Default)]
pub struct ProcessBatchesResult {
    /// The assembled Θ, when the request asked for one.
    pub theta_matrix: Option<ThetaMatrix>,
    /// Accumulated scores of the instance, in first-appended order.
    pub score_data: Vec<(String, ScoreValue)>,
}

/// Handle to an asynchronous processing operation.
#[derive(Debug)]
pub struct OpHandle {
    batch_manager: Arc<BatchManager>,
}

impl OpHandle {
    /// True once every task of the operation has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.batch_manager.is_everything_processed()
    }

    /// Blocks until the operation drains.
    pub fn wait(&self) {
        self.batch_manager.wait();
    }
}

/// Shape summary of one registered matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Registry name.
    pub name: String,
    /// Token rows.
    pub token_size: usize,
    /// Topic columns.
    pub topic_size: usize,
}

/// Snapshot of the instance state for diagnostics.
#[derive(Debug, Clone)]
pub struct MasterInfo {
    /// Current configuration.
    pub config: MasterConfig,
    /// Registered matrices.
    pub models: Vec<ModelInfo>,
    /// Registered in-memory batches.
    pub batch_count: usize,
    /// Registered dictionaries.
    pub dictionary_count: usize,
    /// Inputs waiting in the processor queue.
    pub queue_size: usize,
    /// Live worker threads.
    pub processor_count: usize,
    /// Slices held by the instance Θ cache.
    pub theta_cache_size: usize,
}

/// The training orchestrator.
///
/// Owns the named matrix registry and the worker pool, sequences the
/// Process → Merge → Regularize → Normalize phases, and serves the model
/// lifecycle and request operations.
pub struct Master {
    instance: Instance,
}

impl Master {
    /// Creates a master with its worker pool and empty registries.
    #[must_use]
    pub fn new(config: MasterConfig) -> Self {
        Self {
            instance: Instance::new(config),
        }
    }

    /// Replaces the configuration, recreating the regularizers, score
    /// calculators and worker pool.
    pub fn reconfigure(&self, config: MasterConfig) {
        self.instance.reconfigure(config);
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> MasterConfig {
        self.instance.config()
    }

    pub(crate) fn instance(&self) -> &Instance {
        &self.instance
    }

    // ------------------------------------------------------------------
    // Batches and dictionaries
    // ------------------------------------------------------------------

    /// Registers batches in the in-memory store.
    pub fn import_batches(&self, batches: Vec<Batch>) {
        for batch in batches {
            self.instance.batches().set(batch);
        }
    }

    /// Removes a batch from the in-memory store.
    pub fn dispose_batch(&self, id: &str) {
        self.instance.batches().erase(id);
    }

    /// Registers a dictionary, replacing any with the same name.
    pub fn create_dictionary(&self, dictionary: Dictionary) {
        self.instance.dictionaries().set(dictionary);
    }

    /// Removes a dictionary; removes all when `name` is empty.
    pub fn dispose_dictionary(&self, name: &str) {
        self.instance.dictionaries().erase(name);
    }

    /// Builds a dictionary by scanning registered batches; `batch_ids`
    /// empty means every registered batch.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] when a named batch is
    /// not registered.
    pub fn gather_dictionary(&self, name: &str, batch_ids: &[String]) -> Result<()> {
        let ids: Vec<String> = if batch_ids.is_empty() {
            self.instance.batches().keys()
        } else {
            batch_ids.to_vec()
        };
        let mut batches = Vec::with_capacity(ids.len());
        for id in &ids {
            let batch = self.instance.batches().get(id).ok_or_else(|| {
                TematicaError::InvalidOperation(format!("Batch '{id}' is not registered"))
            })?;
            batches.push(batch);
        }
        let dictionary = Dictionary::gather(name, batches.iter().map(AsRef::as_ref));
        self.instance.dictionaries().set(dictionary);
        Ok(())
    }

    /// Returns a copy of a registered dictionary.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] when the dictionary does
    /// not exist.
    pub fn get_dictionary(&self, name: &str) -> Result<Dictionary> {
        self.instance
            .dictionaries()
            .get(name)
            .map(|d| (*d).clone())
            .ok_or_else(|| {
                TematicaError::InvalidOperation(format!("Dictionary '{name}' does not exist"))
            })
    }

    // ------------------------------------------------------------------
    // Model lifecycle
    // ------------------------------------------------------------------

    /// Allocates a Φ over a dictionary's tokens, fills rows with a
    /// deterministic PRNG seeded by (seed, token), and normalizes.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] when the dictionary is
    /// missing or empty, or when no topic names are available.
    pub fn initialize_model(&self, args: &InitializeModelArgs) -> Result<()> {
        let config = self.instance.config();
        let model_name = args
            .model_name
            .clone()
            .unwrap_or_else(|| config.pwt_name.clone());
        let topic_names = if args.topic_names.is_empty() {
            config.topic_names.clone()
        } else {
            args.topic_names.clone()
        };
        if topic_names.is_empty() {
            return Err(TematicaError::InvalidOperation(
                "topic names are required: set them in the args or the config".to_string(),
            ));
        }

        let dictionary = self
            .instance
            .dictionaries()
            .get(&args.dictionary_name)
            .ok_or_else(|| {
                TematicaError::InvalidOperation(format!(
                    "Dictionary '{}' does not exist",
                    args.dictionary_name
                ))
            })?;
        if dictionary.is_empty() {
            return Err(TematicaError::InvalidOperation(format!(
                "Dictionary '{}' has no entries",
                args.dictionary_name
            )));
        }

        log::info!(
            "initialize model '{model_name}' with {} topics and {} tokens",
            topic_names.len(),
            dictionary.len()
        );

        let mut counters = DensePhiMatrix::new(&model_name, topic_names);
        for entry in &dictionary.entries {
            let row = generate_random_vector(counters.topic_size(), &entry.token, args.seed);
            let token_id = counters.add_token(entry.token.clone());
            counters.set_row(token_id, row);
        }

        let mut model = DensePhiMatrix::reshape(&model_name, &counters);
        ops::find_pwt(&counters, &mut model);
        self.instance.registry().set(model_name, Arc::new(model));
        Ok(())
    }

    /// Replaces a model from a caller-supplied topic model, applied at
    /// weight 1.0 onto a fresh matrix.
    pub fn overwrite_model(&self, model: &TopicModel) {
        let config = self.instance.config();
        let name = if model.name.is_empty() {
            config.pwt_name.clone()
        } else {
            model.name.clone()
        };
        let mut target = DensePhiMatrix::new(&name, model.topic_names.clone());
        ops::apply_topic_model_operation(model, 1.0, &mut target);
        self.instance.registry().set(name, Arc::new(target));
    }

    /// Rebinds a model's storage to a caller-shared buffer of exactly
    /// `token_size * topic_size` floats, copying the current contents in.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::MissingModel`] for an unknown name and
    /// [`TematicaError::InvalidOperation`] when the model is already
    /// attached or the buffer length does not match.
    pub fn attach_model(&self, model_name: &str, buffer: AttachedBuffer) -> Result<()> {
        let phi = self.instance.registry().get_or_fail(model_name)?;
        if phi.is_attached() {
            return Err(TematicaError::InvalidOperation(format!(
                "Unable to attach to model {model_name}: already attached"
            )));
        }
        log::info!(
            "attaching model {model_name} ({} x {})",
            phi.token_size(),
            phi.topic_size()
        );
        let attached = AttachedPhiMatrix::from_frame(phi.as_ref(), buffer).ok_or_else(|| {
            TematicaError::InvalidOperation(format!(
                "Unable to attach to model {model_name}: buffer length must equal \
                 token_size * topic_size"
            ))
        })?;
        self.instance
            .registry()
            .set(model_name, Arc::new(attached));
        Ok(())
    }

    /// Exports a model to a file.
    ///
    /// # Errors
    ///
    /// See [`crate::io::export_model`]; additionally fails with
    /// [`TematicaError::MissingModel`] for an unknown model name.
    pub fn export_model(&self, args: &ExportModelArgs) -> Result<()> {
        let config = self.instance.config();
        let model_name = args
            .model_name
            .clone()
            .unwrap_or_else(|| config.pwt_name.clone());
        let phi = self.instance.registry().get_or_fail(&model_name)?;
        log::info!("exporting model {model_name} to {}", args.file_name.display());
        io::export_model(phi.as_ref(), &args.file_name)
    }

    /// Imports a model from a file and registers it. The registry is left
    /// untouched when the import fails.
    ///
    /// # Errors
    ///
    /// See [`crate::io::import_model`].
    pub fn import_model(&self, args: &ImportModelArgs) -> Result<()> {
        let config = self.instance.config();
        let model_name = args
            .model_name
            .clone()
            .unwrap_or_else(|| config.pwt_name.clone());
        log::info!(
            "importing model {model_name} from {}",
            args.file_name.display()
        );
        let matrix = io::import_model(&model_name, &args.file_name)?;
        self.instance.registry().set(model_name, Arc::new(matrix));
        Ok(())
    }

    /// Removes a model from the registry. Unknown names are ignored.
    pub fn dispose_model(&self, name: &str) {
        self.instance.registry().dispose(name);
    }

    // ------------------------------------------------------------------
    // Cache controls
    // ------------------------------------------------------------------

    /// Drops every slice of the instance Θ cache.
    pub fn clear_theta_cache(&self) {
        self.instance.cache_manager().clear();
    }

    /// Drops the accumulated score values.
    pub fn clear_score_cache(&self) {
        self.instance.score_manager().clear();
    }

    /// Drops the archived score history.
    pub fn clear_score_array_cache(&self) {
        self.instance.score_tracker().clear();
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Processes batches against a source Φ, optionally accumulating a
    /// counter matrix and returning an assembled Θ.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] for a zero-worker pool
    /// or matching source/target names, and
    /// [`TematicaError::MissingModel`] for an unknown source.
    pub fn process_batches(&self, args: &ProcessBatchesArgs) -> Result<ProcessBatchesResult> {
        let batch_manager = Arc::new(BatchManager::new());
        let theta_matrix = self.process_batches_impl(
            args,
            &batch_manager,
            false,
            Some(Arc::clone(self.instance.score_manager())),
        )?;
        Ok(ProcessBatchesResult {
            theta_matrix,
            score_data: self.instance.score_manager().request_all_scores(),
        })
    }

    /// Like [`Master::process_batches`] with a dense Θ request, also
    /// serializing the Θ into `external` as row-major little-endian `f32`
    /// (one row per document) and clearing the in-message rows.
    ///
    /// # Errors
    ///
    /// Additionally returns [`TematicaError::InvalidOperation`] when the
    /// requested Θ type is not dense.
    pub fn process_batches_external(
        &self,
        args: &ProcessBatchesArgs,
        external: &mut Vec<u8>,
    ) -> Result<ProcessBatchesResult> {
        if !matches!(
            args.theta_matrix_type,
            ThetaMatrixType::Dense | ThetaMatrixType::DensePtdw
        ) {
            return Err(TematicaError::InvalidOperation(
                "Dense matrix format is required for an external request".to_string(),
            ));
        }
        let mut result = self.process_batches(args)?;
        if let Some(theta) = &mut result.theta_matrix {
            theta_to_external(theta, external);
        }
        Ok(result)
    }

    /// Launches an asynchronous processing operation and returns after
    /// enqueueing its tasks.
    ///
    /// # Errors
    ///
    /// As [`Master::process_batches`], plus
    /// [`TematicaError::InvalidOperation`] when the Θ type is not `None`.
    pub fn process_batches_async(&self, args: &ProcessBatchesArgs) -> Result<OpHandle> {
        let batch_manager = Arc::new(BatchManager::new());
        self.process_batches_impl(args, &batch_manager, true, None)?;
        Ok(OpHandle { batch_manager })
    }

    /// Computes Θ for the given batches against the config's Φ. Score
    /// accumulators are cleared first; the Θ cache as well in `Cache` mode,
    /// which is also the only mode that leaves results cached.
    ///
    /// # Errors
    ///
    /// As [`Master::process_batches`].
    pub fn transform(&self, args: &TransformArgs) -> Result<ThetaMatrix> {
        let config = self.instance.config();
        if args.theta_matrix_type == ThetaMatrixType::Cache {
            self.clear_theta_cache();
        }
        self.clear_score_cache();

        let mut process_args = ProcessBatchesArgs::from_source(&config.pwt_name);
        process_args.batch_filenames = args.batch_filenames.clone();
        process_args.batches = args.batches.clone();
        process_args.batch_weights = Vec::new();
        process_args.inner_iterations_count = Some(config.inner_iterations_count);
        process_args.class_ids = config.class_ids.clone();
        process_args.class_weights = config.class_weights.clone();
        process_args.reuse_theta = config.reuse_theta;
        process_args.opt_for_avx = config.opt_for_avx;
        process_args.theta_matrix_type = args.theta_matrix_type;

        let batch_manager = Arc::new(BatchManager::new());
        let theta = self.process_batches_impl(&process_args, &batch_manager, false, None)?;
        Ok(theta.unwrap_or_default())
    }

    /// Like [`Master::transform`] requiring a dense Θ type, serializing the
    /// result into `external` and clearing the in-message rows.
    ///
    /// # Errors
    ///
    /// Additionally returns [`TematicaError::InvalidOperation`] when the
    /// requested Θ type is not dense.
    pub fn transform_external(
        &self,
        args: &TransformArgs,
        external: &mut Vec<u8>,
    ) -> Result<ThetaMatrix> {
        if !matches!(
            args.theta_matrix_type,
            ThetaMatrixType::Dense | ThetaMatrixType::DensePtdw
        ) {
            return Err(TematicaError::InvalidOperation(
                "Dense matrix format is required for an external request".to_string(),
            ));
        }
        let mut theta = self.transform(args)?;
        theta_to_external(&mut theta, external);
        Ok(theta)
    }

    /// Retrieves a model in caller-visible form.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::MissingModel`] for an unknown name.
    pub fn get_topic_model(&self, args: &GetTopicModelArgs) -> Result<TopicModel> {
        let config = self.instance.config();
        let model_name = args
            .model_name
            .clone()
            .unwrap_or_else(|| config.pwt_name.clone());
        let phi = self.instance.registry().get_or_fail(&model_name)?;
        Ok(ops::retrieve_external(phi.as_ref(), args))
    }

    /// Like [`Master::get_topic_model`] requiring dense layout, serializing
    /// the weights into `external` as row-major little-endian `f32` (one
    /// row per token) and clearing the in-message rows.
    ///
    /// # Errors
    ///
    /// Additionally returns [`TematicaError::InvalidOperation`] for a
    /// non-dense layout.
    pub fn get_topic_model_external(
        &self,
        args: &GetTopicModelArgs,
        external: &mut Vec<u8>,
    ) -> Result<TopicModel> {
        if args.layout != MatrixLayout::Dense {
            return Err(TematicaError::InvalidOperation(
                "Dense matrix format is required for an external request".to_string(),
            ));
        }
        let mut model = self.get_topic_model(args)?;
        topic_model_to_external(&mut model, external);
        Ok(model)
    }

    /// Assembles the instance-level Θ cache.
    #[must_use]
    pub fn get_theta_matrix(&self, args: &GetThetaMatrixArgs) -> ThetaMatrix {
        self.instance.cache_manager().request_theta(args)
    }

    /// Like [`Master::get_theta_matrix`] requiring dense layout,
    /// serializing the rows into `external` and clearing them in the
    /// returned message.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] for a non-dense layout.
    pub fn get_theta_matrix_external(
        &self,
        args: &GetThetaMatrixArgs,
        external: &mut Vec<u8>,
    ) -> Result<ThetaMatrix> {
        if args.layout != MatrixLayout::Dense {
            return Err(TematicaError::InvalidOperation(
                "Dense matrix format is required for an external request".to_string(),
            ));
        }
        let mut theta = self.get_theta_matrix(args);
        theta_to_external(&mut theta, external);
        Ok(theta)
    }

    /// Current value of a configured score.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] for an unconfigured
    /// score or one with no value yet.
    pub fn get_score_value(&self, score_name: &str) -> Result<ScoreValue> {
        let calculators = self.instance.score_calculators();
        let calculator = calculators
            .iter()
            .find(|c| c.name() == score_name)
            .ok_or_else(|| {
                TematicaError::InvalidOperation(format!("Score '{score_name}' is not configured"))
            })?;
        if calculator.is_cumulative() {
            self.instance
                .score_manager()
                .request_score(score_name)
                .ok_or_else(|| {
                    TematicaError::InvalidOperation(format!(
                        "Score '{score_name}' has no accumulated value"
                    ))
                })
        } else {
            let config = self.instance.config();
            let phi = self.instance.registry().get_or_fail(&config.pwt_name)?;
            calculator.score_model(phi.as_ref()).ok_or_else(|| {
                TematicaError::InvalidOperation(format!(
                    "Score '{score_name}' produced no value"
                ))
            })
        }
    }

    /// Archived per-pass values of a score, oldest first.
    #[must_use]
    pub fn get_score_array(&self, score_name: &str) -> Vec<ScoreValue> {
        self.instance.score_tracker().request_score_array(score_name)
    }

    /// Diagnostics snapshot.
    #[must_use]
    pub fn get_master_info(&self) -> MasterInfo {
        let mut models: Vec<ModelInfo> = self
            .instance
            .registry()
            .describe()
            .into_iter()
            .map(|(name, token_size, topic_size)| ModelInfo {
                name,
                token_size,
                topic_size,
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        MasterInfo {
            config: self.instance.config(),
            models,
            batch_count: self.instance.batches().len(),
            dictionary_count: self.instance.dictionaries().len(),
            queue_size: self.instance.queue().len(),
            processor_count: self.instance.processor_count(),
            theta_cache_size: self.instance.cache_manager().len(),
        }
    }

    // ------------------------------------------------------------------
    // Matrix algebra
    // ------------------------------------------------------------------

    /// Weighted merge of counter matrices into a target name. Missing
    /// sources are skipped with a warning; the output topic axis comes
    /// from the first found source unless overridden.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] when sources are empty,
    /// weights mismatch, or no source exists.
    pub fn merge_models(&self, args: &MergeModelArgs) -> Result<()> {
        if args.nwt_source_names.is_empty() {
            return Err(TematicaError::InvalidOperation(
                "merge requires at least one source name".to_string(),
            ));
        }
        if args.nwt_source_names.len() != args.source_weights.len() {
            return Err(TematicaError::InvalidOperation(format!(
                "merge source count ({}) differs from weight count ({})",
                args.nwt_source_names.len(),
                args.source_weights.len()
            )));
        }

        let mut target: Option<DensePhiMatrix> = None;
        for (name, &weight) in args.nwt_source_names.iter().zip(&args.source_weights) {
            let Some(source) = self.instance.registry().get(name) else {
                log::warn!("model {name} does not exist, skipped in merge");
                continue;
            };
            let target = target.get_or_insert_with(|| {
                let topic_names = if args.topic_names.is_empty() {
                    source.topic_names().to_vec()
                } else {
                    args.topic_names.clone()
                };
                DensePhiMatrix::new(&args.nwt_target_name, topic_names)
            });
            if source.token_size() > 0 {
                let model =
                    ops::retrieve_external(source.as_ref(), &GetTopicModelArgs::default());
                ops::apply_topic_model_operation(&model, weight, target);
            }
        }

        let target = target.ok_or_else(|| {
            TematicaError::InvalidOperation(format!(
                "merge found no models; verify that at least one of [{}] exists",
                args.nwt_source_names.join(", ")
            ))
        })?;
        self.instance
            .registry()
            .set(&args.nwt_target_name, Arc::new(target));
        Ok(())
    }

    /// Builds the R matrix for a (Φ, N) pair by invoking the configured
    /// regularizers named in the settings.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] for missing argument
    /// names and [`TematicaError::MissingModel`] for unknown matrices.
    pub fn regularize_model(&self, args: &RegularizeModelArgs) -> Result<()> {
        if args.pwt_source_name.is_empty() {
            return Err(TematicaError::InvalidOperation(
                "regularize requires pwt_source_name".to_string(),
            ));
        }
        if args.nwt_source_name.is_empty() {
            return Err(TematicaError::InvalidOperation(
                "regularize requires nwt_source_name".to_string(),
            ));
        }
        if args.rwt_target_name.is_empty() {
            return Err(TematicaError::InvalidOperation(
                "regularize requires rwt_target_name".to_string(),
            ));
        }

        let n_wt = self.instance.registry().get_or_fail(&args.nwt_source_name)?;
        let p_wt = self.instance.registry().get_or_fail(&args.pwt_source_name)?;

        let mut r_wt = DensePhiMatrix::reshape(&args.rwt_target_name, n_wt.as_ref());
        for setting in &args.settings {
            match self.instance.regularizer(&setting.name) {
                Some(regularizer) => {
                    regularizer.apply(setting.tau, p_wt.as_ref(), n_wt.as_ref(), &mut r_wt);
                }
                None => log::warn!("regularizer {} is not configured, skipped", setting.name),
            }
        }
        self.instance
            .registry()
            .set(&args.rwt_target_name, Arc::new(r_wt));
        Ok(())
    }

    /// Normalizes a counter matrix into a fresh Φ, combining it with an R
    /// matrix when one is named.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] for missing argument
    /// names and [`TematicaError::MissingModel`] for unknown matrices.
    pub fn normalize_model(&self, args: &NormalizeModelArgs) -> Result<()> {
        if args.pwt_target_name.is_empty() {
            return Err(TematicaError::InvalidOperation(
                "normalize requires pwt_target_name".to_string(),
            ));
        }
        if args.nwt_source_name.is_empty() {
            return Err(TematicaError::InvalidOperation(
                "normalize requires nwt_source_name".to_string(),
            ));
        }

        let n_wt = self.instance.registry().get_or_fail(&args.nwt_source_name)?;
        let r_wt = match &args.rwt_source_name {
            Some(name) => Some(self.instance.registry().get_or_fail(name)?),
            None => None,
        };

        let mut p_wt = DensePhiMatrix::reshape(&args.pwt_target_name, n_wt.as_ref());
        match r_wt {
            Some(r_wt) => ops::find_pwt_regularized(n_wt.as_ref(), r_wt.as_ref(), &mut p_wt),
            None => ops::find_pwt(n_wt.as_ref(), &mut p_wt),
        }
        self.instance
            .registry()
            .set(&args.pwt_target_name, Arc::new(p_wt));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Training schedules
    // ------------------------------------------------------------------

    /// Multi-pass offline fit over a batch list, a folder of batch files,
    /// or every registered in-memory batch.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] when no batches can be
    /// resolved and propagates processing-phase errors.
    pub fn fit_offline(&self, args: &FitOfflineArgs) -> Result<()> {
        let mut batch_filenames = args.batch_filenames.clone();
        let mut batch_weights = args.batch_weights.clone();
        if batch_filenames.is_empty() {
            batch_weights.clear();
            batch_filenames = match &args.batch_folder {
                Some(folder) => {
                    let listed = list_batch_files(folder)?;
                    if listed.is_empty() {
                        return Err(TematicaError::InvalidOperation(format!(
                            "No batches found in {}",
                            folder.display()
                        )));
                    }
                    listed
                }
                None => {
                    let registered = self.instance.batches().keys();
                    if registered.is_empty() {
                        return Err(TematicaError::InvalidOperation(
                            "batch_filenames is empty; register batches or set batch_folder"
                                .to_string(),
                        ));
                    }
                    registered
                }
            };
        }

        let mut iter = OfflineBatchesIterator::new(batch_filenames, batch_weights);
        Executor::new(self).execute_offline(args.passes, &mut iter)
    }

    /// Online fit: processes update groups in order, folding each group's
    /// counters into the model with the configured decay/apply weights,
    /// synchronously or with pipelined asynchronous processing.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] for an invalid group
    /// structure and propagates processing-phase errors.
    pub fn fit_online(&self, args: &FitOnlineArgs) -> Result<()> {
        let mut iter = OnlineBatchesIterator::new(
            args.batch_filenames.clone(),
            args.batch_weights.clone(),
            args.update_after.clone(),
            args.apply_weight.clone(),
            args.decay_weight.clone(),
        )?;
        let mut executor = Executor::new(self);
        if args.asynchronous {
            executor.execute_online_async(&mut iter)
        } else {
            executor.execute_online_sync(&mut iter)
        }
    }

    // ------------------------------------------------------------------
    // Processing core
    // ------------------------------------------------------------------

    /// The shared processing path behind every request and fit phase:
    /// validates, installs the counter target, enqueues one task per batch
    /// and, in the synchronous case, waits for the drain and assembles Θ.
    pub(crate) fn process_batches_impl(
        &self,
        args: &ProcessBatchesArgs,
        batch_manager: &Arc<BatchManager>,
        async_mode: bool,
        score_manager: Option<Arc<ScoreManager>>,
    ) -> Result<Option<ThetaMatrix>> {
        if self.instance.processor_count() == 0 {
            return Err(TematicaError::InvalidOperation(
                "no processors: check the threads setting of the master config".to_string(),
            ));
        }

        let phi = self
            .instance
            .registry()
            .get_or_fail(&args.pwt_source_name)?;

        if let Some(target_name) = &args.nwt_target_name {
            if *target_name == args.pwt_source_name {
                return Err(TematicaError::InvalidOperation(format!(
                    "pwt_source_name and nwt_target_name are both '{target_name}'"
                )));
            }
            let target = DensePhiMatrix::reshape(target_name, phi.as_ref());
            self.instance
                .registry()
                .set(target_name, Arc::new(target));
        }

        if async_mode && args.theta_matrix_type != ThetaMatrixType::None {
            return Err(TematicaError::InvalidOperation(
                "asynchronous processing requires theta_matrix_type to be None".to_string(),
            ));
        }

        // The local cache must only be referenced by synchronous tasks: it
        // dies with this call, and the drain below guarantees the workers
        // are done with it first.
        let local_cache = Arc::new(CacheManager::new());
        let config = self.instance.config();
        let mut return_theta = false;
        let mut theta_cache: Option<Arc<CacheManager>> = None;
        let mut ptdw_cache: Option<Arc<CacheManager>> = None;
        match args.theta_matrix_type {
            ThetaMatrixType::None => {}
            ThetaMatrixType::Cache => {
                if config.cache_theta {
                    theta_cache = Some(Arc::clone(self.instance.cache_manager()));
                }
            }
            ThetaMatrixType::Dense | ThetaMatrixType::Sparse => {
                theta_cache = Some(Arc::clone(&local_cache));
                return_theta = true;
            }
            ThetaMatrixType::DensePtdw | ThetaMatrixType::SparsePtdw => {
                ptdw_cache = Some(Arc::clone(&local_cache));
                return_theta = true;
            }
        }

        let batch_count = args.batch_filenames.len() + args.batches.len();
        if batch_count < self.instance.processor_count() {
            log::info!(
                "batch count ({batch_count}) is smaller than the worker count ({}), \
                 which may cause suboptimal performance",
                self.instance.processor_count()
            );
        }

        let reuse_cache = args
            .reuse_theta
            .then(|| Arc::clone(self.instance.cache_manager()));
        let snapshot = Arc::new(args.clone());

        let enqueue = |batch: BatchRef, weight: f32| {
            let task_id = next_task_id();
            batch_manager.add(task_id);
            self.instance.queue().push(ProcessorInput {
                task_id,
                pwt_source_name: args.pwt_source_name.clone(),
                nwt_target_name: args.nwt_target_name.clone(),
                batch,
                batch_weight: weight,
                batch_manager: Arc::clone(batch_manager),
                score_manager: score_manager.clone(),
                cache_manager: theta_cache.clone(),
                ptdw_cache_manager: ptdw_cache.clone(),
                reuse_theta_cache: reuse_cache.clone(),
                args: Arc::clone(&snapshot),
            });
        };

        for (index, filename) in args.batch_filenames.iter().enumerate() {
            enqueue(BatchRef::Name(filename.clone()), args.batch_weight(index));
        }
        for (offset, batch) in args.batches.iter().enumerate() {
            let index = args.batch_filenames.len() + offset;
            enqueue(BatchRef::InMemory(Arc::clone(batch)), args.batch_weight(index));
        }

        if async_mode {
            return Ok(None);
        }

        batch_manager.wait();

        if return_theta {
            let theta_args = GetThetaMatrixArgs {
                layout: args.theta_matrix_type.layout(),
                ..GetThetaMatrixArgs::default()
            };
            return Ok(Some(local_cache.request_theta(&theta_args)));
        }
        Ok(None)
    }
}

/// Deterministic nonnegative row for (seed, token): the token hash and the
/// seed pin the generator, so initialization is reproducible across runs.
fn generate_random_vector(topic_size: usize, token: &Token, seed: u64) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(seed ^ hasher.finish());
    (0..topic_size).map(|_| rng.gen::<f32>()).collect()
}

/// Serializes dense token rows as row-major little-endian `f32` and clears
/// the in-message payload.
fn topic_model_to_external(model: &mut TopicModel, external: &mut Vec<u8>) {
    let topic_size = model.topic_size();
    external.clear();
    external.reserve(model.token_size() * topic_size * 4);
    for weights in &model.token_weights {
        for topic_id in 0..topic_size {
            external.extend_from_slice(&weights.value(topic_id).to_le_bytes());
        }
    }
    model.token_weights.clear();
}

/// Serializes dense item rows as row-major little-endian `f32` and clears
/// the in-message payload.
fn theta_to_external(theta: &mut ThetaMatrix, external: &mut Vec<u8>) {
    let topic_size = theta.topic_size();
    external.clear();
    external.reserve(theta.item_size() * topic_size * 4);
    for weights in &theta.item_weights {
        for topic_id in 0..topic_size {
            external.extend_from_slice(&weights.value(topic_id).to_le_bytes());
        }
    }
    theta.item_weights.clear();
}

/// Lists `*.batch` files of a folder, sorted by path.
fn list_batch_files(folder: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(folder)
        .map_err(|e| TematicaError::DiskRead(format!("{}: {e}", folder.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TematicaError::DiskRead(format!("{}: {e}", folder.display())))?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "batch") {
            files.push(path.to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests;
