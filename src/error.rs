//! Error types shared across the crate.

use std::fmt;
use std::io;

/// Result type alias for master operations.
pub type Result<T> = std::result::Result<T, TematicaError>;

/// Errors surfaced to callers of the master API.
///
/// Worker-side per-batch failures are never surfaced here: they are logged
/// and the task is marked complete so the operation can drain (the affected
/// batch simply contributes nothing to the counter matrix).
#[derive(Debug)]
pub enum TematicaError {
    /// A request is malformed: missing required argument, mismatched source
    /// and target names, zero-worker pool, non-dense layout for an external
    /// buffer request, attach to an incompatible matrix, and similar.
    InvalidOperation(String),
    /// An import stream is truncated or its payload fails to decode.
    CorruptedMessage(String),
    /// A file could not be opened or read.
    DiskRead(String),
    /// A file could not be created, or the export target already exists.
    DiskWrite(String),
    /// A named matrix is required but absent from the registry.
    MissingModel(String),
    /// Underlying I/O failure outside the read/write classification above.
    Io(io::Error),
}

impl fmt::Display for TematicaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TematicaError::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
            TematicaError::CorruptedMessage(msg) => write!(f, "Corrupted message: {msg}"),
            TematicaError::DiskRead(msg) => write!(f, "Disk read failed: {msg}"),
            TematicaError::DiskWrite(msg) => write!(f, "Disk write failed: {msg}"),
            TematicaError::MissingModel(name) => write!(f, "Model '{name}' does not exist"),
            TematicaError::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for TematicaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TematicaError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TematicaError {
    fn from(err: io::Error) -> Self {
        TematicaError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_contains_context() {
        let err = TematicaError::InvalidOperation("pwt_source == nwt_target".to_string());
        assert!(err.to_string().contains("pwt_source == nwt_target"));

        let err = TematicaError::MissingModel("pwt".to_string());
        assert!(err.to_string().contains("pwt"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: TematicaError = io_err.into();
        assert!(matches!(err, TematicaError::Io(_)));
    }

    #[test]
    fn test_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<TematicaError>();
    }
}
