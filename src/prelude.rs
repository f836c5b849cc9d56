//! Convenience re-exports for the common training workflow.
//!
//! # Usage
//!
//! ```
//! use tematica::prelude::*;
//! ```

pub use crate::args::{
    FitOfflineArgs, FitOnlineArgs, GetThetaMatrixArgs, GetTopicModelArgs, InitializeModelArgs,
    MatrixLayout, ProcessBatchesArgs, ThetaMatrixType, TransformArgs,
};
pub use crate::batch::{Batch, Token};
pub use crate::cache::ThetaMatrix;
pub use crate::config::{MasterConfig, RegularizerConfig, RegularizerKind, ScoreConfig, ScoreKind};
pub use crate::dictionary::Dictionary;
pub use crate::error::{Result, TematicaError};
pub use crate::master::{Master, MasterInfo, ProcessBatchesResult};
pub use crate::phi::{TopicModel, WeightVector};
