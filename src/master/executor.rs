//! Phase sequencing for the training schedules.
//!
//! One executor drives one fit call. The asynchronous online schedule
//! pipelines each step's processing with the previous step's
//! Merge/Regularize/Normalize; the matrices the two sides touch are kept
//! disjoint by rotating the `pwt_i` / `nwt_hat_i` names:
//!
//! ```text
//! i = 0: process(g1, pwt,  nwt_hat0)
//! i = 1: process(g2, pwt,  nwt_hat1) await(0) merge(nwt, nwt_hat0) regularize(pwt,  nwt) normalize -> pwt2
//! i = 2: process(g3, pwt2, nwt_hat2) await(1) merge(nwt, nwt_hat1) regularize(pwt2, nwt) normalize -> pwt3
//! ...
//! last:                              await(n) merge(nwt, nwt_hatn) regularize(...) normalize -> pwt
//! ```
//!
//! Workers of op `i+1` keep reading the old Φ snapshot until their op
//! drains; stale snapshots are disposed one step later.

use std::sync::Arc;

use crate::args::{MergeModelArgs, ProcessBatchesArgs, RegularizerSettings, ThetaMatrixType};
use crate::config::MasterConfig;
use crate::error::Result;
use crate::processor::BatchManager;
use crate::score::ScoreManager;

use super::iterators::{BatchesIterator, OfflineBatchesIterator, OnlineBatchesIterator};
use super::Master;

/// Conventional name of the regularizer matrix during fits.
const RWT_NAME: &str = "rwt";

pub(crate) struct Executor<'a> {
    master: &'a Master,
    config: MasterConfig,
    template: ProcessBatchesArgs,
    regularize_settings: Vec<RegularizerSettings>,
    async_ops: Vec<Arc<BatchManager>>,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(master: &'a Master) -> Self {
        let config = master.instance().config();
        let mut template = ProcessBatchesArgs::from_source(&config.pwt_name);
        template.inner_iterations_count = Some(config.inner_iterations_count);
        template.class_ids = config.class_ids.clone();
        template.class_weights = config.class_weights.clone();
        template.reuse_theta = config.reuse_theta;
        template.opt_for_avx = config.opt_for_avx;
        // Fit passes keep Θ only through the instance cache, when enabled.
        template.theta_matrix_type = ThetaMatrixType::Cache;

        let regularize_settings = config
            .regularizers
            .iter()
            .map(|r| RegularizerSettings {
                name: r.name.clone(),
                tau: r.tau,
            })
            .collect();

        Self {
            master,
            config,
            template,
            regularize_settings,
            async_ops: Vec::new(),
        }
    }

    /// Multi-pass full-corpus schedule.
    pub(crate) fn execute_offline(
        &mut self,
        passes: usize,
        iter: &mut OfflineBatchesIterator,
    ) -> Result<()> {
        let pwt = self.config.pwt_name.clone();
        let nwt = self.config.nwt_name.clone();

        self.master.clear_score_cache();
        for pass in 0..passes {
            log::debug!("offline pass {pass}");
            let score_manager = Arc::new(ScoreManager::new());
            self.process(&pwt, &nwt, iter, &score_manager)?;
            self.regularize(&pwt, &nwt)?;
            self.normalize(&pwt, &nwt)?;
            self.store_scores(&score_manager);
        }

        self.dispose(RWT_NAME);
        Ok(())
    }

    /// Online schedule: process a group, fold it into the counters, rebuild
    /// Φ, then move to the next group.
    pub(crate) fn execute_online_sync(&mut self, iter: &mut OnlineBatchesIterator) -> Result<()> {
        let pwt = self.config.pwt_name.clone();
        let nwt = self.config.nwt_name.clone();

        self.master.clear_score_cache();
        let mut nwt_hat_index = 0usize;
        while iter.more() {
            let apply_weight = iter.apply_weight_current();
            let decay_weight = iter.decay_weight_current();
            let nwt_hat = format!("nwt_hat{nwt_hat_index}");

            let score_manager = Arc::new(ScoreManager::new());
            self.process(&pwt, &nwt_hat, iter, &score_manager)?;
            self.merge(&nwt, decay_weight, &nwt_hat, apply_weight)?;
            self.dispose(&nwt_hat);
            self.regularize(&pwt, &nwt)?;
            self.normalize(&pwt, &nwt)?;
            self.store_scores(&score_manager);

            nwt_hat_index += 1;
        }

        iter.reset();
        Ok(())
    }

    /// Online schedule with the model update overlapped against the next
    /// group's processing. Mixing weights are addressed by op id, which
    /// stays aligned with the iterator's update-group index.
    pub(crate) fn execute_online_async(&mut self, iter: &mut OnlineBatchesIterator) -> Result<()> {
        let pwt = self.config.pwt_name.clone();
        let nwt = self.config.nwt_name.clone();
        let mut pwt_active = pwt.clone();
        let mut pwt_index = 0usize;
        let mut nwt_hat_index = 0usize;

        self.master.clear_score_cache();
        let mut op_id = self.process_async(&pwt_active, &format!("nwt_hat{nwt_hat_index}"), iter)?;

        loop {
            let is_last = !iter.more();
            pwt_index += 1;
            nwt_hat_index += 1;

            let apply_weight = iter.apply_weight(op_id);
            let decay_weight = iter.decay_weight(op_id);

            let awaited_op = op_id;
            if !is_last {
                op_id = self.process_async(&pwt_active, &format!("nwt_hat{nwt_hat_index}"), iter)?;
            }
            self.await_op(awaited_op);

            let merged = format!("nwt_hat{}", nwt_hat_index - 1);
            self.merge(&nwt, decay_weight, &merged, apply_weight)?;
            self.dispose(&merged);
            self.regularize(&pwt_active, &nwt)?;

            pwt_active = if is_last {
                pwt.clone()
            } else {
                format!("pwt{}", pwt_index + 1)
            };
            self.normalize(&pwt_active, &nwt)?;

            self.dispose(&format!("pwt{}", pwt_index - 1));
            if is_last {
                self.dispose(&format!("pwt{pwt_index}"));
                break;
            }
        }

        iter.reset();
        Ok(())
    }

    fn process(
        &mut self,
        pwt: &str,
        nwt: &str,
        iter: &mut dyn BatchesIterator,
        score_manager: &Arc<ScoreManager>,
    ) -> Result<()> {
        let mut args = self.template.clone();
        args.pwt_source_name = pwt.to_string();
        args.nwt_target_name = Some(nwt.to_string());
        iter.move_to(&mut args);

        let batch_manager = Arc::new(BatchManager::new());
        self.master
            .process_batches_impl(&args, &batch_manager, false, Some(Arc::clone(score_manager)))
            .map(|_| ())
    }

    fn process_async(
        &mut self,
        pwt: &str,
        nwt: &str,
        iter: &mut dyn BatchesIterator,
    ) -> Result<usize> {
        let mut args = self.template.clone();
        args.pwt_source_name = pwt.to_string();
        args.nwt_target_name = Some(nwt.to_string());
        args.theta_matrix_type = ThetaMatrixType::None;
        iter.move_to(&mut args);

        let batch_manager = Arc::new(BatchManager::new());
        let op_id = self.async_ops.len();
        self.async_ops.push(Arc::clone(&batch_manager));
        self.master
            .process_batches_impl(&args, &batch_manager, true, None)?;
        Ok(op_id)
    }

    fn await_op(&self, op_id: usize) {
        self.async_ops[op_id].wait();
    }

    fn merge(&self, nwt: &str, decay_weight: f32, nwt_hat: &str, apply_weight: f32) -> Result<()> {
        let args = MergeModelArgs::into_target(nwt)
            .with_source(nwt, decay_weight)
            .with_source(nwt_hat, apply_weight);
        self.master.merge_models(&args)
    }

    fn regularize(&self, pwt: &str, nwt: &str) -> Result<()> {
        if self.regularize_settings.is_empty() {
            return Ok(());
        }
        self.master.regularize_model(&crate::args::RegularizeModelArgs {
            pwt_source_name: pwt.to_string(),
            nwt_source_name: nwt.to_string(),
            rwt_target_name: RWT_NAME.to_string(),
            settings: self.regularize_settings.clone(),
        })
    }

    fn normalize(&self, pwt_target: &str, nwt: &str) -> Result<()> {
        self.master.normalize_model(&crate::args::NormalizeModelArgs {
            pwt_target_name: pwt_target.to_string(),
            nwt_source_name: nwt.to_string(),
            rwt_source_name: (!self.regularize_settings.is_empty()).then(|| RWT_NAME.to_string()),
        })
    }

    /// Archives one value per configured score into the tracker.
    fn store_scores(&self, score_manager: &Arc<ScoreManager>) {
        let calculators = self.master.instance().score_calculators();
        for score_config in &self.config.scores {
            let Some(calculator) = calculators.iter().find(|c| c.name() == score_config.name)
            else {
                continue;
            };
            let value = if calculator.is_cumulative() {
                score_manager.request_score(&score_config.name)
            } else {
                self.master
                    .instance()
                    .registry()
                    .get(&self.config.pwt_name)
                    .and_then(|phi| calculator.score_model(phi.as_ref()))
            };
            if let Some(value) = value {
                self.master
                    .instance()
                    .score_tracker()
                    .add(&score_config.name, value);
            }
        }
    }

    fn dispose(&self, name: &str) {
        log::debug!("dispose model {name}");
        self.master.dispose_model(name);
    }
}
