//! Model export and import: a versioned stream of length-prefixed,
//! bincode-serialized topic-model chunks.

use std::fs;
use std::path::Path;

use crate::args::{GetTopicModelArgs, MatrixLayout};
use crate::error::{Result, TematicaError};
use crate::phi::{ops, DensePhiMatrix, PhiMatrix, TopicModel};

/// Model stream format version.
const MODEL_STREAM_VERSION: u8 = 0;
/// Soft cap on the serialized size of one chunk.
const CHUNK_BUDGET_BYTES: usize = 100 * 1024 * 1024;

/// Writes `phi` to `path`.
///
/// The stream is one version byte followed by repeated chunks, each a
/// little-endian `u64` length prefix and a bincode topic-model payload of at
/// most `CHUNK_BUDGET_BYTES / topic_size` tokens in sparse layout.
///
/// # Errors
///
/// Returns [`TematicaError::DiskWrite`] when `path` already exists or cannot
/// be created, and [`TematicaError::InvalidOperation`] for an empty model.
pub fn export_model(phi: &dyn PhiMatrix, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Err(TematicaError::DiskWrite(format!(
            "File already exists: {}",
            path.display()
        )));
    }

    let token_size = phi.token_size();
    if token_size == 0 {
        return Err(TematicaError::InvalidOperation(format!(
            "Model {} has no tokens, export failed",
            phi.name()
        )));
    }

    let tokens_per_chunk = (CHUNK_BUDGET_BYTES / phi.topic_size().max(1)).clamp(1, token_size);

    let mut stream = vec![MODEL_STREAM_VERSION];
    let mut chunk_args = GetTopicModelArgs::default().with_layout(MatrixLayout::Sparse);
    for chunk_start in (0..token_size).step_by(tokens_per_chunk) {
        let chunk_end = (chunk_start + tokens_per_chunk).min(token_size);
        chunk_args.tokens = (chunk_start..chunk_end)
            .map(|token_id| phi.token(token_id).clone())
            .collect();
        let chunk = ops::retrieve_external(phi, &chunk_args);
        let payload = bincode::serialize(&chunk)
            .map_err(|e| TematicaError::DiskWrite(format!("{}: {e}", path.display())))?;
        stream.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        stream.extend_from_slice(&payload);
    }

    fs::write(path, stream)
        .map_err(|e| TematicaError::DiskWrite(format!("{}: {e}", path.display())))?;
    log::info!(
        "export completed, token_size = {token_size}, topic_size = {}",
        phi.topic_size()
    );
    Ok(())
}

/// Reads a model stream written by [`export_model`] and rebuilds the matrix
/// under `model_name`.
///
/// The first chunk fixes the topic axis; every chunk is applied additively
/// at weight 1.0.
///
/// # Errors
///
/// Returns [`TematicaError::DiskRead`] when the file cannot be opened or
/// carries an unsupported version, and [`TematicaError::CorruptedMessage`]
/// when the stream is truncated, garbled or empty.
pub fn import_model(model_name: &str, path: impl AsRef<Path>) -> Result<DensePhiMatrix> {
    let path = path.as_ref();
    let bytes =
        fs::read(path).map_err(|e| TematicaError::DiskRead(format!("{}: {e}", path.display())))?;

    if bytes.is_empty() {
        return Err(TematicaError::CorruptedMessage(format!(
            "Unable to read from {}",
            path.display()
        )));
    }
    if bytes[0] != MODEL_STREAM_VERSION {
        return Err(TematicaError::DiskRead(format!(
            "Unsupported format version: {}",
            bytes[0]
        )));
    }

    let mut target: Option<DensePhiMatrix> = None;
    let mut offset = 1usize;
    while offset < bytes.len() {
        if offset + 8 > bytes.len() {
            return Err(TematicaError::CorruptedMessage(format!(
                "Unable to read from {}",
                path.display()
            )));
        }
        let mut length_bytes = [0u8; 8];
        length_bytes.copy_from_slice(&bytes[offset..offset + 8]);
        let length = u64::from_le_bytes(length_bytes) as usize;
        offset += 8;

        if length == 0 || offset + length > bytes.len() {
            return Err(TematicaError::CorruptedMessage(format!(
                "Unable to read from {}",
                path.display()
            )));
        }
        let chunk: TopicModel = bincode::deserialize(&bytes[offset..offset + length])
            .map_err(|e| TematicaError::CorruptedMessage(format!("{}: {e}", path.display())))?;
        offset += length;

        let matrix = target
            .get_or_insert_with(|| DensePhiMatrix::new(model_name, chunk.topic_names.clone()));
        ops::apply_topic_model_operation(&chunk, 1.0, matrix);
    }

    let matrix = target.ok_or_else(|| {
        TematicaError::CorruptedMessage(format!("Unable to read from {}", path.display()))
    })?;
    log::info!(
        "import completed, token_size = {}, topic_size = {}",
        matrix.token_size(),
        matrix.topic_size()
    );
    Ok(matrix)
}
