//! Engine configuration.

use crate::constants::{DEFAULT_BUFFER_POOL_FRAMES, DEFAULT_TREE_ORDER, MIN_TREE_ORDER};
use crate::error::{EngineError, EngineResult};

/// Configuration for a BasaltDB engine instance.
///
/// The page size is fixed by the on-disk format and is intentionally not a
/// field here.
///
/// # Example
///
/// ```rust
/// use basalt_common::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_buffer_pool_frames(64)
///     .with_tree_order(8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of frames in the buffer pool.
    pub buffer_pool_frames: usize,

    /// B+ tree fanout used when encoding internal nodes.
    pub tree_order: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pool_frames: DEFAULT_BUFFER_POOL_FRAMES,
            tree_order: DEFAULT_TREE_ORDER,
        }
    }
}

impl EngineConfig {
    /// Sets the buffer pool frame count.
    #[must_use]
    pub fn with_buffer_pool_frames(mut self, frames: usize) -> Self {
        self.buffer_pool_frames = frames;
        self
    }

    /// Sets the tree order (fanout).
    #[must_use]
    pub fn with_tree_order(mut self, order: usize) -> Self {
        self.tree_order = order;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.buffer_pool_frames == 0 {
            return Err(EngineError::invalid_argument(
                "buffer pool must have at least one frame",
            ));
        }
        if self.tree_order < MIN_TREE_ORDER {
            return Err(EngineError::invalid_argument(format!(
                "tree order {} is below the minimum {}",
                self.tree_order, MIN_TREE_ORDER
            )));
        }
        Ok(())
    }
}
