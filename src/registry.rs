//! Name → Φ registry with atomic slot replacement.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, TematicaError};
use crate::phi::PhiMatrix;

/// The named matrix registry owned by the instance.
///
/// `set` replaces the name slot atomically; readers that obtained the
/// previous `Arc` keep observing the previous matrix unchanged. Matrices are
/// immutable once published, except for the counter target of an in-flight
/// processing op, which grows through row-level interior mutability.
#[derive(Default)]
pub struct MatrixRegistry {
    entries: RwLock<HashMap<String, Arc<dyn PhiMatrix>>>,
}

impl MatrixRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the matrix registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn PhiMatrix>> {
        self.entries.read().get(name).cloned()
    }

    /// Like [`MatrixRegistry::get`] but failing with
    /// [`TematicaError::MissingModel`].
    ///
    /// # Errors
    ///
    /// Returns `MissingModel` when no matrix is registered under `name`.
    pub fn get_or_fail(&self, name: &str) -> Result<Arc<dyn PhiMatrix>> {
        self.get(name)
            .ok_or_else(|| TematicaError::MissingModel(name.to_string()))
    }

    /// Publishes a matrix under `name`, replacing any prior entry.
    pub fn set(&self, name: impl Into<String>, matrix: Arc<dyn PhiMatrix>) {
        self.entries.write().insert(name.into(), matrix);
    }

    /// Removes the entry under `name`, if any.
    pub fn dispose(&self, name: &str) {
        self.entries.write().remove(name);
    }

    /// Registered names, unordered.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// (name, token count, topic count) triples for info queries.
    #[must_use]
    pub fn describe(&self) -> Vec<(String, usize, usize)> {
        self.entries
            .read()
            .iter()
            .map(|(name, phi)| (name.clone(), phi.token_size(), phi.topic_size()))
            .collect()
    }

    /// Number of registered matrices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Token;
    use crate::phi::DensePhiMatrix;

    fn phi_with_value(name: &str, value: f32) -> Arc<dyn PhiMatrix> {
        let mut phi = DensePhiMatrix::new(name, vec!["t0".to_string()]);
        let id = phi.add_token(Token::new("w"));
        phi.set_row(id, vec![value]);
        Arc::new(phi)
    }

    #[test]
    fn test_set_get_dispose() {
        let registry = MatrixRegistry::new();
        registry.set("pwt", phi_with_value("pwt", 1.0));
        assert!(registry.get("pwt").is_some());
        assert!(registry.get_or_fail("pwt").is_ok());

        registry.dispose("pwt");
        assert!(registry.get("pwt").is_none());
        assert!(matches!(
            registry.get_or_fail("pwt"),
            Err(TematicaError::MissingModel(_))
        ));
    }

    #[test]
    fn test_replace_preserves_old_snapshot() {
        let registry = MatrixRegistry::new();
        registry.set("pwt", phi_with_value("pwt", 1.0));

        let old = registry.get("pwt").expect("registered");
        registry.set("pwt", phi_with_value("pwt", 2.0));

        // The old snapshot still reads the old contents.
        assert_eq!(old.get(0, 0), 1.0);
        // New readers observe the replacement.
        assert_eq!(registry.get("pwt").expect("registered").get(0, 0), 2.0);
    }

    #[test]
    fn test_describe_reports_shapes() {
        let registry = MatrixRegistry::new();
        registry.set("pwt", phi_with_value("pwt", 1.0));
        let info = registry.describe();
        assert_eq!(info, vec![("pwt".to_string(), 1, 1)]);
    }
}
