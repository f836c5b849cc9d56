//! Batches: immutable bundles of tokenized documents, plus the in-memory
//! batch store and the on-disk batch file format.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_CLASS_ID;
use crate::error::{Result, TematicaError};

/// Magic prefix of batch files.
const BATCH_MAGIC: &[u8; 4] = b"TMBA";
/// Batch file format version.
const BATCH_VERSION: u8 = 0;

/// A token: keyword plus class id (modality). Equality covers both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Surface form.
    pub keyword: String,
    /// Modality label, `@default_class` unless set.
    pub class_id: String,
}

impl Token {
    /// Creates a token in the default class.
    #[must_use]
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            class_id: DEFAULT_CLASS_ID.to_string(),
        }
    }

    /// Creates a token with an explicit class id.
    #[must_use]
    pub fn with_class(keyword: impl Into<String>, class_id: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            class_id: class_id.into(),
        }
    }
}

/// One document inside a batch: a sparse bag of (token index, count) pairs
/// over the batch-local token dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    /// Item id, unique within the batch.
    pub id: u32,
    /// Optional human-readable title.
    pub title: String,
    /// Indices into the owning batch's token dictionary.
    pub token_ids: Vec<u32>,
    /// Occurrence counts, positionally paired with `token_ids`.
    pub token_counts: Vec<f32>,
}

/// An immutable bundle of tokenized documents.
///
/// Items reference tokens through a batch-local dictionary, so batches stay
/// compact regardless of the global vocabulary size.
///
/// # Examples
///
/// ```
/// use tematica::batch::{Batch, Token};
///
/// let mut batch = Batch::new("b0", vec![Token::new("cat"), Token::new("dog")]);
/// batch.add_item(vec![0, 1], vec![3.0, 1.0]);
/// assert_eq!(batch.items.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Batch identifier; registry key and Θ cache key.
    pub id: String,
    /// Batch-local token dictionary.
    pub tokens: Vec<Token>,
    /// Documents.
    pub items: Vec<BatchItem>,
}

impl Batch {
    /// Creates an empty batch over the given token dictionary.
    #[must_use]
    pub fn new(id: impl Into<String>, tokens: Vec<Token>) -> Self {
        Self {
            id: id.into(),
            tokens,
            items: Vec::new(),
        }
    }

    /// Appends a document given parallel (token index, count) arrays.
    ///
    /// # Panics
    ///
    /// Panics if the arrays differ in length.
    pub fn add_item(&mut self, token_ids: Vec<u32>, token_counts: Vec<f32>) {
        assert_eq!(
            token_ids.len(),
            token_counts.len(),
            "token_ids and token_counts must be parallel arrays"
        );
        let id = self.items.len() as u32;
        self.items.push(BatchItem {
            id,
            title: String::new(),
            token_ids,
            token_counts,
        });
    }

    /// Total token occurrences across all items.
    #[must_use]
    pub fn token_count(&self) -> f64 {
        self.items
            .iter()
            .flat_map(|item| item.token_counts.iter())
            .map(|&c| f64::from(c))
            .sum()
    }

    /// Writes the batch as a bincode file with a magic/version header.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::DiskWrite`] when the file cannot be created.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let payload = bincode::serialize(self)
            .map_err(|e| TematicaError::DiskWrite(format!("{}: {e}", path.display())))?;
        let mut bytes = Vec::with_capacity(payload.len() + 5);
        bytes.extend_from_slice(BATCH_MAGIC);
        bytes.push(BATCH_VERSION);
        bytes.extend_from_slice(&payload);
        fs::write(path, bytes)
            .map_err(|e| TematicaError::DiskWrite(format!("{}: {e}", path.display())))
    }

    /// Reads a batch previously written by [`Batch::save`].
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::DiskRead`] when the file cannot be opened and
    /// [`TematicaError::CorruptedMessage`] when the header or payload is
    /// malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| TematicaError::DiskRead(format!("{}: {e}", path.display())))?;
        if bytes.len() < 5 || &bytes[..4] != BATCH_MAGIC {
            return Err(TematicaError::CorruptedMessage(format!(
                "{} is not a batch file",
                path.display()
            )));
        }
        if bytes[4] != BATCH_VERSION {
            return Err(TematicaError::CorruptedMessage(format!(
                "unsupported batch format version {}",
                bytes[4]
            )));
        }
        bincode::deserialize(&bytes[5..])
            .map_err(|e| TematicaError::CorruptedMessage(format!("{}: {e}", path.display())))
    }
}

/// Reference to the batch a processor task should consume.
#[derive(Debug, Clone)]
pub enum BatchRef {
    /// A batch already materialized in memory.
    InMemory(Arc<Batch>),
    /// A store key, falling back to a disk path when not registered.
    Name(String),
}

/// In-memory batch registry, keyed by batch id in insertion order.
#[derive(Debug, Default)]
pub struct BatchStore {
    entries: RwLock<(Vec<String>, HashMap<String, Arc<Batch>>)>,
}

impl BatchStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a batch, replacing any batch with the same id.
    pub fn set(&self, batch: Batch) {
        let id = batch.id.clone();
        let mut entries = self.entries.write();
        if !entries.1.contains_key(&id) {
            entries.0.push(id.clone());
        }
        entries.1.insert(id, Arc::new(batch));
    }

    /// Looks up a batch by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Batch>> {
        self.entries.read().1.get(id).cloned()
    }

    /// Removes a batch by id.
    pub fn erase(&self, id: &str) {
        let mut entries = self.entries.write();
        if entries.1.remove(id).is_some() {
            entries.0.retain(|k| k != id);
        }
    }

    /// Registered batch ids in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().0.clone()
    }

    /// Number of registered batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().0.len()
    }

    /// Whether the store holds no batches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_equality_covers_class() {
        assert_eq!(Token::new("cat"), Token::new("cat"));
        assert_ne!(Token::new("cat"), Token::with_class("cat", "@labels"));
    }

    #[test]
    fn test_batch_token_count() {
        let mut batch = Batch::new("b", vec![Token::new("a"), Token::new("b")]);
        batch.add_item(vec![0, 1], vec![2.0, 1.0]);
        batch.add_item(vec![0], vec![4.0]);
        assert!((batch.token_count() - 7.0).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "parallel arrays")]
    fn test_item_arrays_must_match() {
        let mut batch = Batch::new("b", vec![Token::new("a")]);
        batch.add_item(vec![0, 0], vec![1.0]);
    }

    #[test]
    fn test_store_insertion_order() {
        let store = BatchStore::new();
        store.set(Batch::new("b2", vec![]));
        store.set(Batch::new("b1", vec![]));
        store.set(Batch::new("b3", vec![]));
        assert_eq!(store.keys(), vec!["b2", "b1", "b3"]);

        store.erase("b1");
        assert_eq!(store.keys(), vec!["b2", "b3"]);
        assert!(store.get("b1").is_none());
        assert!(store.get("b2").is_some());
    }

    #[test]
    fn test_store_replace_keeps_position() {
        let store = BatchStore::new();
        store.set(Batch::new("a", vec![]));
        store.set(Batch::new("b", vec![]));
        store.set(Batch::new("a", vec![Token::new("x")]));
        assert_eq!(store.keys(), vec!["a", "b"]);
        assert_eq!(store.get("a").expect("present").tokens.len(), 1);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("b0.batch");

        let mut batch = Batch::new("b0", vec![Token::new("cat"), Token::new("dog")]);
        batch.add_item(vec![0, 1], vec![3.0, 1.0]);
        batch.save(&path).expect("save succeeds");

        let back = Batch::load(&path).expect("load succeeds");
        assert_eq!(back.id, "b0");
        assert_eq!(back.tokens, batch.tokens);
        assert_eq!(back.items.len(), 1);
        assert_eq!(back.items[0].token_counts, vec![3.0, 1.0]);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("junk.batch");
        fs::write(&path, b"not a batch").expect("write");
        let err = Batch::load(&path).expect_err("must fail");
        assert!(matches!(err, TematicaError::CorruptedMessage(_)));
    }

    #[test]
    fn test_load_missing_file_is_disk_read() {
        let err = Batch::load("/nonexistent/b.batch").expect_err("must fail");
        assert!(matches!(err, TematicaError::DiskRead(_)));
    }
}
