//! Φ matrices whose storage is shared with the caller.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::batch::Token;

use super::PhiMatrix;

/// Row-major backing store shared between the master and the caller.
///
/// The caller keeps a clone of the `Arc`; every write the trainer performs
/// is immediately visible through it, and caller-side writes are visible to
/// subsequent reads through the registry.
pub type AttachedBuffer = Arc<RwLock<Vec<f32>>>;

/// A Φ view over an [`AttachedBuffer`], `token_size * topic_size` floats in
/// token-major order.
///
/// Created by the master's attach operation from a plain dense frame; the
/// frame's contents are copied into the buffer at attach time.
#[derive(Debug)]
pub struct AttachedPhiMatrix {
    name: String,
    topic_names: Vec<String>,
    tokens: Vec<Token>,
    token_index: HashMap<Token, usize>,
    storage: AttachedBuffer,
}

impl AttachedPhiMatrix {
    /// Binds `buffer` to the shape of `frame` and copies the frame in.
    ///
    /// Returns `None` when the buffer length is not exactly
    /// `token_size * topic_size`.
    #[must_use]
    pub fn from_frame(frame: &dyn PhiMatrix, buffer: AttachedBuffer) -> Option<Self> {
        let token_size = frame.token_size();
        let topic_size = frame.topic_size();
        {
            let mut storage = buffer.write();
            if storage.len() != token_size * topic_size {
                return None;
            }
            for token_id in 0..token_size {
                let row = frame.row_copy(token_id);
                storage[token_id * topic_size..(token_id + 1) * topic_size]
                    .copy_from_slice(&row);
            }
        }

        let tokens: Vec<Token> = (0..token_size).map(|i| frame.token(i).clone()).collect();
        let token_index = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Some(Self {
            name: frame.name().to_string(),
            topic_names: frame.topic_names().to_vec(),
            tokens,
            token_index,
            storage: buffer,
        })
    }
}

impl PhiMatrix for AttachedPhiMatrix {
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
        self.storage.read()[token_id * self.topic_names.len() + topic_id]
    }

    fn row_copy(&self, token_id: usize) -> Vec<f32> {
        let width = self.topic_names.len();
        self.storage.read()[token_id * width..(token_id + 1) * width].to_vec()
    }

    fn increase_row(&self, token_id: usize, increment: &[f32]) {
        let width = self.topic_names.len();
        assert_eq!(increment.len(), width, "row width mismatch");
        let mut storage = self.storage.write();
        let row = &mut storage[token_id * width..(token_id + 1) * width];
        for (cell, inc) in row.iter_mut().zip(increment) {
            *cell += inc;
        }
    }

    fn is_attached(&self) -> bool {
        true
    }
}
