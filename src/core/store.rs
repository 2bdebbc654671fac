//! Pooled key/value storage backing the frame allocator.
//!
//! All frames share two preallocated tensors, one for keys and one for
//! values, so a frame's storage is a row of the pool rather than a
//! separately owned buffer.
//!
//! ## Memory Layout
//!
//! Key and value pools each have shape:
//! `[pool_size, page_size, num_heads, head_dim]`
//!
//! Token at slot `s` of frame `f` lives at `pool[f, s, :, :]`.

use candle_core::{DType, Device, Tensor};

use crate::config::PoolConfig;
use crate::core::frame::FrameId;
use crate::error::{Error, Result};

/// Key/value storage for a whole frame pool.
#[derive(Debug)]
pub struct FrameStore {
    /// Key pool: [pool_size, page_size, num_heads, head_dim]
    key_pool: Tensor,
    /// Value pool: [pool_size, page_size, num_heads, head_dim]
    value_pool: Tensor,
    /// Configuration.
    config: PoolConfig,
}

impl FrameStore {
    /// Create a new zeroed frame store.
    pub fn new(config: &PoolConfig, device: &Device) -> Result<Self> {
        let shape = (
            config.pool_size,
            config.page_size,
            config.num_heads,
            config.head_dim,
        );

        let key_pool = Tensor::zeros(shape, config.dtype, device)?;
        let value_pool = Tensor::zeros(shape, config.dtype, device)?;

        Ok(Self {
            key_pool,
            value_pool,
            config: config.clone(),
        })
    }

    /// Get the key pool tensor.
    pub fn key_pool(&self) -> &Tensor {
        &self.key_pool
    }

    /// Get the value pool tensor.
    pub fn value_pool(&self) -> &Tensor {
        &self.value_pool
    }

    /// Get the configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Gather key blocks for specific frames, in the given order.
    ///
    /// # Arguments
    ///
    /// * `frame_ids` - Frame IDs to gather
    ///
    /// # Returns
    ///
    /// Tensor of shape `[num_gathered, page_size, num_heads, head_dim]`
    pub fn gather_keys(&self, frame_ids: &[FrameId]) -> Result<Tensor> {
        if frame_ids.is_empty() {
            return Err(Error::Config("frame_ids cannot be empty".into()));
        }

        let indices: Vec<u32> = frame_ids.iter().map(|&id| id as u32).collect();
        let index_tensor = Tensor::new(indices, self.key_pool.device())?;
        let gathered = self.key_pool.index_select(&index_tensor, 0)?;
        Ok(gathered)
    }

    /// Gather value blocks for specific frames, in the given order.
    pub fn gather_values(&self, frame_ids: &[FrameId]) -> Result<Tensor> {
        if frame_ids.is_empty() {
            return Err(Error::Config("frame_ids cannot be empty".into()));
        }

        let indices: Vec<u32> = frame_ids.iter().map(|&id| id as u32).collect();
        let index_tensor = Tensor::new(indices, self.value_pool.device())?;
        let gathered = self.value_pool.index_select(&index_tensor, 0)?;
        Ok(gathered)
    }

    /// Write one token's key and value states to a specific slot.
    ///
    /// # Arguments
    ///
    /// * `frame_id` - Frame to write to
    /// * `slot` - Slot within the frame (0 to page_size-1)
    /// * `key` - Key tensor of shape `[num_heads, head_dim]`
    /// * `value` - Value tensor of shape `[num_heads, head_dim]`
    pub fn write_slot(
        &mut self,
        frame_id: FrameId,
        slot: usize,
        key: &Tensor,
        value: &Tensor,
    ) -> Result<()> {
        self.validate_slot(frame_id, slot)?;
        self.validate_entry(key, "key")?;
        self.validate_entry(value, "value")?;

        self.key_pool = write_entry(&self.key_pool, frame_id, slot, key)?;
        self.value_pool = write_entry(&self.value_pool, frame_id, slot, value)?;
        Ok(())
    }

    /// Zero a frame's key and value storage.
    ///
    /// Called when a frame returns to the free set so stale states cannot
    /// leak into a sequence that later reuses the same frame.
    pub fn zero_frame(&mut self, frame_id: FrameId) -> Result<()> {
        self.validate_slot(frame_id, 0)?;

        let shape = (
            1,
            self.config.page_size,
            self.config.num_heads,
            self.config.head_dim,
        );
        let zeroed = Tensor::zeros(shape, self.key_pool.dtype(), self.key_pool.device())?;

        self.key_pool = replace_frame(&self.key_pool, frame_id, zeroed.clone())?;
        self.value_pool = replace_frame(&self.value_pool, frame_id, zeroed)?;
        Ok(())
    }

    /// Validate frame_id and slot are within bounds.
    fn validate_slot(&self, frame_id: FrameId, slot: usize) -> Result<()> {
        if frame_id >= self.config.pool_size {
            return Err(Error::Config(format!(
                "frame_id {} out of bounds (max {})",
                frame_id, self.config.pool_size
            )));
        }
        if slot >= self.config.page_size {
            return Err(Error::Config(format!(
                "slot {} out of bounds (max {})",
                slot, self.config.page_size
            )));
        }
        Ok(())
    }

    /// Validate a single-token entry has shape [num_heads, head_dim].
    fn validate_entry(&self, entry: &Tensor, name: &str) -> Result<()> {
        let (heads, dim) = entry.dims2()?;
        if heads != self.config.num_heads || dim != self.config.head_dim {
            return Err(Error::Config(format!(
                "{} entry shape [{}, {}] does not match [num_heads={}, head_dim={}]",
                name, heads, dim, self.config.num_heads, self.config.head_dim
            )));
        }
        Ok(())
    }
}

/// Write a single [num_heads, head_dim] entry into one slot of a pool tensor.
///
/// Rebuilds the affected frame on the host and concatenates it back into
/// place. Simple and correct; real deployments would use a scatter kernel.
fn write_entry(pool: &Tensor, frame_id: FrameId, slot: usize, entry: &Tensor) -> Result<Tensor> {
    let (_, page_size, num_heads, head_dim) = pool.dims4()?;
    let device = pool.device();
    let dtype = pool.dtype();

    let frame = pool.narrow(0, frame_id, 1)?;
    let mut frame_data: Vec<f32> = frame.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
    let entry_flat: Vec<f32> = entry.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;

    let slot_offset = slot * num_heads * head_dim;
    frame_data[slot_offset..slot_offset + entry_flat.len()].copy_from_slice(&entry_flat);

    let updated = Tensor::from_vec(frame_data, (1, page_size, num_heads, head_dim), device)?
        .to_dtype(dtype)?;

    replace_frame(pool, frame_id, updated)
}

/// Rebuild a pool tensor with one frame row replaced.
fn replace_frame(pool: &Tensor, frame_id: FrameId, frame: Tensor) -> Result<Tensor> {
    let (pool_size, _, _, _) = pool.dims4()?;

    if frame_id == 0 && pool_size == 1 {
        Ok(frame)
    } else if frame_id == 0 {
        let rest = pool.narrow(0, 1, pool_size - 1)?;
        Ok(Tensor::cat(&[frame, rest], 0)?)
    } else if frame_id == pool_size - 1 {
        let first = pool.narrow(0, 0, frame_id)?;
        Ok(Tensor::cat(&[first, frame], 0)?)
    } else {
        let first = pool.narrow(0, 0, frame_id)?;
        let rest = pool.narrow(0, frame_id + 1, pool_size - frame_id - 1)?;
        Ok(Tensor::cat(&[first, frame, rest], 0)?)
    }
}
