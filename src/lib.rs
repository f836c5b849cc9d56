//! Tematica: additive-regularized topic model training in pure Rust.
//!
//! The crate implements the training orchestrator for an EM-style topic
//! model: a named registry of token × topic matrices, a worker pool
//! consuming batches of tokenized documents, and the
//! Process → Merge → Regularize → Normalize phase algebra behind offline
//! and online training schedules.
//!
//! # Quick Start
//!
//! ```
//! use tematica::batch::{Batch, Token};
//! use tematica::prelude::*;
//!
//! // Two tiny documents over a three-word vocabulary.
//! let mut batch = Batch::new(
//!     "b0",
//!     vec![Token::new("cat"), Token::new("dog"), Token::new("fish")],
//! );
//! batch.add_item(vec![0, 1], vec![3.0, 1.0]);
//! batch.add_item(vec![2], vec![2.0]);
//!
//! let master = Master::new(MasterConfig::new().with_topic_count(2).with_threads(1));
//! master.import_batches(vec![batch]);
//! master.gather_dictionary("main", &[]).unwrap();
//! master
//!     .initialize_model(&InitializeModelArgs::from_dictionary("main"))
//!     .unwrap();
//! master.fit_offline(&FitOfflineArgs::with_passes(5)).unwrap();
//!
//! let model = master.get_topic_model(&Default::default()).unwrap();
//! assert_eq!(model.token_size(), 3);
//! ```
//!
//! # Modules
//!
//! - [`master`]: the orchestrator API (lifecycle, requests, fits)
//! - [`phi`]: Φ/N/R matrices and their algebra
//! - [`batch`] / [`dictionary`]: corpus data model
//! - [`processor`]: the worker pool and per-batch E-step
//! - [`cache`] / [`score`]: Θ slices and score accumulation
//! - [`registry`]: the named matrix registry
//! - [`regularizer`]: the Φ-regularization seam

pub mod args;
pub mod batch;
pub mod cache;
pub mod config;
pub mod dictionary;
pub mod error;
mod instance;
pub mod io;
pub mod master;
pub mod phi;
pub mod prelude;
pub mod processor;
pub mod registry;
pub mod regularizer;
pub mod score;

pub use args::{
    ExportModelArgs, FitOfflineArgs, FitOnlineArgs, GetThetaMatrixArgs, GetTopicModelArgs,
    ImportModelArgs, InitializeModelArgs, MatrixLayout, MergeModelArgs, NormalizeModelArgs,
    ProcessBatchesArgs, RegularizeModelArgs, ThetaMatrixType, TransformArgs,
};
pub use config::{MasterConfig, RegularizerConfig, RegularizerKind, ScoreConfig, ScoreKind};
pub use error::{Result, TematicaError};
pub use master::{Master, MasterInfo, OpHandle, ProcessBatchesResult};
