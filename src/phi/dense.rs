//! Owned Φ storage with per-row locks.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::batch::Token;

use super::PhiMatrix;

/// Dense token × topic matrix with owned storage.
///
/// The token axis grows through [`DensePhiMatrix::add_token`]; the topic
/// axis is fixed at creation. Rows sit behind individual locks so that
/// workers accumulating into a counter matrix contend only on the rows they
/// actually touch.
#[derive(Debug)]
pub struct DensePhiMatrix {
    name: String,
    topic_names: Vec<String>,
    tokens: Vec<Token>,
    token_index: HashMap<Token, usize>,
    rows: Vec<RwLock<Vec<f32>>>,
}

impl DensePhiMatrix {
    /// Creates an empty matrix over the given topic axis.
    #[must_use]
    pub fn new(name: impl Into<String>, topic_names: Vec<String>) -> Self {
        Self {
            name: name.into(),
            topic_names,
            tokens: Vec::new(),
            token_index: HashMap::new(),
            rows: Vec::new(),
        }
    }

    /// Creates a zeroed matrix with the token axis and topic names copied
    /// from `source`.
    #[must_use]
    pub fn reshape(name: impl Into<String>, source: &dyn PhiMatrix) -> Self {
        let mut matrix = Self::new(name, source.topic_names().to_vec());
        for token_id in 0..source.token_size() {
            matrix.add_token(source.token(token_id).clone());
        }
        matrix
    }

    /// Appends a zeroed row for `token`, returning its index. Re-adding an
    /// existing token returns the existing index.
    pub fn add_token(&mut self, token: Token) -> usize {
        if let Some(&index) = self.token_index.get(&token) {
            return index;
        }
        let index = self.tokens.len();
        self.token_index.insert(token.clone(), index);
        self.tokens.push(token);
        self.rows.push(RwLock::new(vec![0.0; self.topic_names.len()]));
        index
    }

    /// Overwrites one row.
    ///
    /// # Panics
    ///
    /// Panics if `values` length differs from the topic axis width.
    pub fn set_row(&mut self, token_id: usize, values: Vec<f32>) {
        assert_eq!(values.len(), self.topic_names.len(), "row width mismatch");
        *self.rows[token_id].get_mut() = values;
    }

    /// Renames the matrix, used when a finished product is published under
    /// a conventional name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

impl PhiMatrix for DensePhiMatrix {
    fn name(&self) -> &str {
        &self.name
    }

    fn topic_names(&self) -> &[String] {
        &self.topic_names
    }

    fn token_size(&self) -> usize {
        self.tokens.len()
    }

    fn token(&self, token_id: usize) -> &Token {
        &self.tokens[token_id]
    }

    fn token_index(&self, token: &Token) -> Option<usize> {
        self.token_index.get(token).copied()
    }

    fn get(&self, token_id: usize, topic_id: usize) -> f32 {
        self.rows[token_id].read()[topic_id]
    }

    fn row_copy(&self, token_id: usize) -> Vec<f32> {
        self.rows[token_id].read().clone()
    }

    fn increase_row(&self, token_id: usize, increment: &[f32]) {
        let mut row = self.rows[token_id].write();
        assert_eq!(increment.len(), row.len(), "row width mismatch");
        for (cell, inc) in row.iter_mut().zip(increment) {
            *cell += inc;
        }
    }
}
