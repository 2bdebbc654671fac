//! Configuration types for paged-kv.

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_dtype() -> DType {
    DType::F32
}

/// Configuration for a frame pool.
///
/// The pool's key and value storage each have shape
/// `[pool_size, page_size, num_heads, head_dim]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Total number of frames in the pool.
    pub pool_size: usize,
    /// Tokens per frame.
    pub page_size: usize,
    /// Number of attention heads.
    pub num_heads: usize,
    /// Dimension per head.
    pub head_dim: usize,
    /// Data type for pool tensors. Not part of the serialized form.
    #[serde(skip, default = "default_dtype")]
    pub dtype: DType,
}

impl PoolConfig {
    /// Create a new pool configuration.
    pub fn new(pool_size: usize, page_size: usize, num_heads: usize, head_dim: usize) -> Self {
        Self {
            pool_size,
            page_size,
            num_heads,
            head_dim,
            dtype: DType::F32,
        }
    }

    /// Set the data type.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Check that every dimension is non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be non-zero".into()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be non-zero".into()));
        }
        if self.num_heads == 0 {
            return Err(Error::Config("num_heads must be non-zero".into()));
        }
        if self.head_dim == 0 {
            return Err(Error::Config("head_dim must be non-zero".into()));
        }
        Ok(())
    }

    /// Memory size in bytes of one frame (K and V).
    pub fn frame_size_bytes(&self) -> usize {
        let elements = self.page_size * self.num_heads * self.head_dim;
        elements * self.dtype.size_in_bytes() * 2 // K and V
    }

    /// Memory size in bytes of the whole pool (K and V).
    pub fn pool_size_bytes(&self) -> usize {
        self.frame_size_bytes() * self.pool_size
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            page_size: 16,
            num_heads: 8,
            head_dim: 64,
            dtype: DType::F32,
        }
    }
}
