//! Token dictionaries: the vocabulary a model is initialized over.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, Token};

/// One dictionary entry with corpus-level frequencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryEntry {
    /// The token.
    pub token: Token,
    /// Total occurrences across the gathered batches.
    pub term_frequency: f64,
    /// Number of documents the token occurs in.
    pub document_frequency: f64,
}

/// An ordered token vocabulary.
///
/// # Examples
///
/// ```
/// use tematica::batch::{Batch, Token};
/// use tematica::dictionary::Dictionary;
///
/// let mut batch = Batch::new("b0", vec![Token::new("cat"), Token::new("dog")]);
/// batch.add_item(vec![0, 1], vec![2.0, 1.0]);
///
/// let dict = Dictionary::gather("main", [&batch]);
/// assert_eq!(dict.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dictionary {
    /// Dictionary name; registry key.
    pub name: String,
    /// Entries in first-seen order.
    pub entries: Vec<DictionaryEntry>,
}

impl Dictionary {
    /// Creates a dictionary from a plain token list with zero frequencies.
    #[must_use]
    pub fn from_tokens(name: impl Into<String>, tokens: impl IntoIterator<Item = Token>) -> Self {
        Self {
            name: name.into(),
            entries: tokens
                .into_iter()
                .map(|token| DictionaryEntry {
                    token,
                    term_frequency: 0.0,
                    document_frequency: 0.0,
                })
                .collect(),
        }
    }

    /// Builds a dictionary by scanning batches, accumulating term and
    /// document frequencies. Tokens appear in first-seen order.
    #[must_use]
    pub fn gather<'a>(name: impl Into<String>, batches: impl IntoIterator<Item = &'a Batch>) -> Self {
        let mut order: Vec<Token> = Vec::new();
        let mut stats: HashMap<Token, (f64, f64)> = HashMap::new();

        for batch in batches {
            for item in &batch.items {
                let mut seen_in_item: Vec<usize> = Vec::new();
                for (&token_id, &count) in item.token_ids.iter().zip(&item.token_counts) {
                    let Some(token) = batch.tokens.get(token_id as usize) else {
                        continue;
                    };
                    let entry = stats.entry(token.clone()).or_insert_with(|| {
                        order.push(token.clone());
                        (0.0, 0.0)
                    });
                    entry.0 += f64::from(count);
                    if !seen_in_item.contains(&(token_id as usize)) {
                        entry.1 += 1.0;
                        seen_in_item.push(token_id as usize);
                    }
                }
            }
        }

        Self {
            name: name.into(),
            entries: order
                .into_iter()
                .map(|token| {
                    let (tf, df) = stats[&token];
                    DictionaryEntry {
                        token,
                        term_frequency: tf,
                        document_frequency: df,
                    }
                })
                .collect(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name → dictionary registry owned by the instance.
#[derive(Debug, Default)]
pub struct DictionaryStore {
    entries: RwLock<HashMap<String, Arc<Dictionary>>>,
}

impl DictionaryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dictionary, replacing any with the same name.
    pub fn set(&self, dict: Dictionary) {
        self.entries.write().insert(dict.name.clone(), Arc::new(dict));
    }

    /// Looks up a dictionary by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Dictionary>> {
        self.entries.read().get(name).cloned()
    }

    /// Removes a dictionary; removes all when `name` is empty.
    pub fn erase(&self, name: &str) {
        let mut entries = self.entries.write();
        if name.is_empty() {
            entries.clear();
        } else {
            entries.remove(name);
        }
    }

    /// Number of registered dictionaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no dictionaries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_doc_batch() -> Batch {
        let mut batch = Batch::new(
            "b",
            vec![Token::new("cat"), Token::new("dog"), Token::new("fish")],
        );
        batch.add_item(vec![0, 1], vec![2.0, 1.0]);
        batch.add_item(vec![0, 2], vec![1.0, 3.0]);
        batch
    }

    #[test]
    fn test_gather_frequencies() {
        let batch = two_doc_batch();
        let dict = Dictionary::gather("main", [&batch]);
        assert_eq!(dict.len(), 3);

        let cat = &dict.entries[0];
        assert_eq!(cat.token, Token::new("cat"));
        assert!((cat.term_frequency - 3.0).abs() < 1e-9);
        assert!((cat.document_frequency - 2.0).abs() < 1e-9);

        let dog = &dict.entries[1];
        assert!((dog.term_frequency - 1.0).abs() < 1e-9);
        assert!((dog.document_frequency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_gather_first_seen_order() {
        let batch = two_doc_batch();
        let dict = Dictionary::gather("main", [&batch]);
        let keywords: Vec<&str> = dict.entries.iter().map(|e| e.token.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["cat", "dog", "fish"]);
    }

    #[test]
    fn test_store_erase_all() {
        let store = DictionaryStore::new();
        store.set(Dictionary::from_tokens("a", [Token::new("x")]));
        store.set(Dictionary::from_tokens("b", [Token::new("y")]));
        assert_eq!(store.len(), 2);

        store.erase("");
        assert!(store.is_empty());
    }
}
