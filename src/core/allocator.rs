//! Frame allocator for paged KV cache management.
//!
//! The FrameAllocator handles allocation and release of KV cache frames,
//! similar to how an operating system manages physical memory pages.
//!
//! ## Features
//!
//! - **Free list allocation**: O(1) frame allocation and release in FIFO order
//! - **Reference counting**: Frames move between free and in-use sets
//! - **Zero on release**: Frame storage is wiped before reuse so stale KV
//!   states never leak into another sequence
//! - **All-or-nothing growth**: A sequence either gets every page it needs
//!   or the pool is left untouched
//!
//! ## Example
//!
//! ```
//! use candle_core::Device;
//! use paged_kv::{FrameAllocator, PoolConfig};
//!
//! let config = PoolConfig::new(64, 16, 8, 64);
//! let mut pool = FrameAllocator::new(config, &Device::Cpu).unwrap();
//!
//! // Allocate a frame
//! let frame_id = pool.allocate().unwrap();
//!
//! // Use the frame...
//!
//! // Release when done
//! pool.release(frame_id).unwrap();
//! ```

use std::collections::VecDeque;

use candle_core::{Device, Tensor};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::core::frame::{pages_needed, Frame, FrameId};
use crate::core::sequence::Sequence;
use crate::core::store::FrameStore;
use crate::error::{Error, Result};

/// Manages a fixed pool of KV cache frames.
///
/// The FrameAllocator maintains:
/// - The pool of [`Frame`]s, constructed once at initialization
/// - A free list for O(1) allocation/release with FIFO reuse
/// - The pooled key/value storage behind those frames
///
/// The pool does not resize; [`Error::Exhausted`] from an allocation is the
/// caller's signal to apply backpressure.
#[derive(Debug)]
pub struct FrameAllocator {
    /// All frames, indexed by frame_id.
    frames: Vec<Frame>,
    /// Free frame IDs in FIFO order.
    free_list: VecDeque<FrameId>,
    /// Key/value storage for the pool.
    store: FrameStore,
    /// Configuration.
    config: PoolConfig,
}

impl FrameAllocator {
    /// Create a new frame allocator with the given configuration.
    ///
    /// All frames and the pooled storage are constructed up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any configured dimension is zero, or a
    /// tensor error if the pool storage cannot be allocated.
    pub fn new(config: PoolConfig, device: &Device) -> Result<Self> {
        config.validate()?;

        let frames: Vec<Frame> = (0..config.pool_size)
            .map(|id| Frame::new(id, config.page_size))
            .collect();
        let free_list: VecDeque<FrameId> = (0..config.pool_size).collect();
        let store = FrameStore::new(&config, device)?;

        info!(
            "frame pool ready: {} frames x {} tokens = {} slots, {:.1} MB",
            config.pool_size,
            config.page_size,
            config.pool_size * config.page_size,
            config.pool_size_bytes() as f64 / (1024.0 * 1024.0)
        );

        Ok(Self {
            frames,
            free_list,
            store,
            config,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the total number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Get the page size (tokens per frame).
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Get the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Get the number of in-use frames.
    pub fn used_count(&self) -> usize {
        self.config.pool_size - self.free_list.len()
    }

    /// Check if there are free frames available.
    pub fn has_free_frames(&self) -> bool {
        !self.free_list.is_empty()
    }

    /// Check if a specific number of frames can be allocated.
    pub fn can_allocate(&self, num_frames: usize) -> bool {
        self.free_list.len() >= num_frames
    }

    /// Get a reference to a frame.
    pub fn frame(&self, frame_id: FrameId) -> Option<&Frame> {
        self.frames.get(frame_id)
    }

    /// Get the pooled key/value storage.
    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    /// Allocate a single frame.
    ///
    /// Takes the oldest free frame, moves it to the in-use set by raising
    /// its reference count from 0 to 1, and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] if no free frames are available. This is
    /// an expected condition under load, not a fault.
    ///
    /// # Example
    ///
    /// ```
    /// use candle_core::Device;
    /// use paged_kv::{FrameAllocator, PoolConfig};
    ///
    /// let mut pool = FrameAllocator::new(PoolConfig::new(2, 16, 2, 8), &Device::Cpu).unwrap();
    ///
    /// let f1 = pool.allocate().unwrap();
    /// let f2 = pool.allocate().unwrap();
    ///
    /// // Third allocation fails
    /// assert!(pool.allocate().is_err());
    /// ```
    pub fn allocate(&mut self) -> Result<FrameId> {
        let frame_id = self.free_list.pop_front().ok_or(Error::Exhausted)?;
        self.frames[frame_id].increment_ref();
        debug!("allocated frame {}", frame_id);
        Ok(frame_id)
    }

    /// Release a frame back toward the free set.
    ///
    /// Idempotent: releasing a frame that is already free is a no-op, so it
    /// is safe to call speculatively. Decrements the reference count; when
    /// it reaches 0 the frame's storage is zeroed and the frame rejoins the
    /// free list.
    ///
    /// # Returns
    ///
    /// `true` if the frame returned to the free set, `false` if it was
    /// already free or still has references.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentAddressSpace`] for a frame ID the pool
    /// does not contain.
    pub fn release(&mut self, frame_id: FrameId) -> Result<bool> {
        let pool_size = self.config.pool_size;
        let frame = self.frames.get_mut(frame_id).ok_or_else(|| {
            Error::InconsistentAddressSpace(format!(
                "frame {frame_id} does not belong to this pool of {pool_size} frames"
            ))
        })?;

        if frame.is_free() {
            return Ok(false);
        }
        if frame.decrement_ref() > 0 {
            return Ok(false);
        }

        self.store.zero_frame(frame_id)?;
        self.free_list.push_back(frame_id);
        debug!("freed frame {}", frame_id);
        Ok(true)
    }

    /// Grow a sequence to cover its current token count.
    ///
    /// Computes how many pages the sequence needs beyond what it owns and
    /// allocates exactly that many, registering each under the next logical
    /// index of the sequence's address space. Growth is all-or-nothing: if
    /// the pool cannot satisfy the whole request, nothing is allocated.
    ///
    /// # Returns
    ///
    /// The number of pages allocated (0 when the owned pages already cover
    /// the token count).
    ///
    /// # Errors
    ///
    /// - [`Error::Exhausted`] if the free set cannot cover the request
    /// - [`Error::InvalidGrowth`] if the sequence owns more pages than its
    ///   token count requires (sequences never shrink)
    /// - [`Error::Config`] if the sequence was created with a different
    ///   page size than the pool
    ///
    /// # Example
    ///
    /// ```
    /// use candle_core::Device;
    /// use paged_kv::{FrameAllocator, PoolConfig, Sequence};
    ///
    /// let mut pool = FrameAllocator::new(PoolConfig::new(10, 16, 2, 8), &Device::Cpu).unwrap();
    /// let mut seq = Sequence::new(1, vec![0; 50], 16);
    ///
    /// // 50 tokens need ceil(50/16) = 4 pages
    /// assert_eq!(pool.grow_sequence(&mut seq).unwrap(), 4);
    /// assert_eq!(pool.free_count(), 6);
    ///
    /// // Growth is a no-op until a page boundary is crossed
    /// seq.append_token(7);
    /// assert_eq!(pool.grow_sequence(&mut seq).unwrap(), 0);
    /// ```
    pub fn grow_sequence(&mut self, seq: &mut Sequence) -> Result<usize> {
        if seq.page_size() != self.config.page_size {
            return Err(Error::Config(format!(
                "sequence {} uses page size {}, pool uses {}",
                seq.seq_id(),
                seq.page_size(),
                self.config.page_size
            )));
        }

        let required = pages_needed(seq.total_len(), self.config.page_size);
        let owned = seq.num_pages();

        if required < owned {
            return Err(Error::InvalidGrowth {
                seq_id: seq.seq_id(),
                required,
                owned,
            });
        }

        let needed = required - owned;
        if needed == 0 {
            return Ok(0);
        }

        // Check before touching the free list so a failed growth leaves no
        // partial allocation behind.
        if !self.can_allocate(needed) {
            warn!(
                "cannot grow sequence {}: {} pages needed, {} free",
                seq.seq_id(),
                needed,
                self.free_count()
            );
            return Err(Error::Exhausted);
        }

        for _ in 0..needed {
            let frame_id = self.allocate()?;
            let logical_index = seq.num_pages();
            seq.address_space_mut().map(logical_index, frame_id);
        }

        debug!(
            "grew sequence {} by {} pages ({} owned)",
            seq.seq_id(),
            needed,
            seq.num_pages()
        );
        Ok(needed)
    }

    /// Release every frame a sequence owns and clear its address space.
    ///
    /// Releasing an already-empty sequence is a no-op, so calling this twice
    /// is safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentAddressSpace`] if the address space maps
    /// a frame the pool does not contain.
    pub fn release_sequence(&mut self, seq: &mut Sequence) -> Result<()> {
        let frame_ids = seq.address_space().frame_ids().to_vec();
        if frame_ids.is_empty() {
            return Ok(());
        }

        for &frame_id in &frame_ids {
            self.release(frame_id)?;
        }
        seq.address_space_mut().clear();

        debug!(
            "released sequence {} ({} frames)",
            seq.seq_id(),
            frame_ids.len()
        );
        Ok(())
    }

    /// Write key/value states for a run of token positions.
    ///
    /// Position `start_position + i` receives row `i` of `keys` and
    /// `values`. Every written position must fall inside the pages the
    /// sequence currently owns, so callers grow the sequence first.
    ///
    /// # Arguments
    ///
    /// * `seq` - Sequence whose address space routes the writes
    /// * `start_position` - Absolute token position of the first row
    /// * `keys` - Key tensor of shape `[count, num_heads, head_dim]`
    /// * `values` - Value tensor of shape `[count, num_heads, head_dim]`
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for shape or page-size mismatches
    /// - [`Error::InconsistentAddressSpace`] if the write extends past the
    ///   slots covered by the sequence's owned pages, or if any mapped
    ///   frame is unknown to the pool or currently free
    pub fn write_kv(
        &mut self,
        seq: &Sequence,
        start_position: usize,
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<()> {
        // A mapping that cannot be read must not be written either.
        let frame_ids = self.sequence_frames(seq)?;

        let (count, key_heads, key_dim) = keys.dims3()?;
        let (value_count, value_heads, value_dim) = values.dims3()?;
        if (value_count, value_heads, value_dim) != (count, key_heads, key_dim) {
            return Err(Error::Config(format!(
                "key shape [{count}, {key_heads}, {key_dim}] does not match value shape [{value_count}, {value_heads}, {value_dim}]"
            )));
        }
        if key_heads != self.config.num_heads || key_dim != self.config.head_dim {
            return Err(Error::Config(format!(
                "KV entry shape [{}, {}] does not match pool [num_heads={}, head_dim={}]",
                key_heads, key_dim, self.config.num_heads, self.config.head_dim
            )));
        }

        let coverage = frame_ids.len() * self.config.page_size;
        let end_position = start_position + count;
        if end_position > coverage {
            return Err(Error::InconsistentAddressSpace(format!(
                "write of positions {}..{} for sequence {} exceeds the {} slots covered by {} pages",
                start_position,
                end_position,
                seq.seq_id(),
                coverage,
                frame_ids.len()
            )));
        }

        let page_size = self.config.page_size;
        let slots = seq.address_space().slot_mapping(end_position);
        for i in 0..count {
            let global_slot = slots[start_position + i];
            let frame_id = global_slot / page_size;
            let slot = global_slot % page_size;

            let key = keys.narrow(0, i, 1)?.squeeze(0)?;
            let value = values.narrow(0, i, 1)?.squeeze(0)?;
            self.store.write_slot(frame_id, slot, &key, &value)?;
        }

        Ok(())
    }

    /// Gather a sequence's key blocks in logical page order.
    ///
    /// # Returns
    ///
    /// Tensor of shape `[num_pages, page_size, num_heads, head_dim]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentAddressSpace`] if any mapped frame is
    /// unknown to the pool or currently free.
    pub fn gather_keys(&self, seq: &Sequence) -> Result<Tensor> {
        let frame_ids = self.sequence_frames(seq)?;
        self.store.gather_keys(&frame_ids)
    }

    /// Gather a sequence's value blocks in logical page order.
    pub fn gather_values(&self, seq: &Sequence) -> Result<Tensor> {
        let frame_ids = self.sequence_frames(seq)?;
        self.store.gather_values(&frame_ids)
    }

    /// Resolve a sequence's logical pages to frame IDs, checking that every
    /// mapping still points at an in-use frame of this pool.
    fn sequence_frames(&self, seq: &Sequence) -> Result<Vec<FrameId>> {
        if seq.page_size() != self.config.page_size {
            return Err(Error::Config(format!(
                "sequence {} uses page size {}, pool uses {}",
                seq.seq_id(),
                seq.page_size(),
                self.config.page_size
            )));
        }

        let space = seq.address_space();
        let mut frame_ids = Vec::with_capacity(space.num_pages());

        for logical_index in seq.logical_pages() {
            let frame_id = space.lookup(logical_index).ok_or_else(|| {
                Error::InconsistentAddressSpace(format!(
                    "sequence {} has no frame mapped at logical page {}",
                    seq.seq_id(),
                    logical_index
                ))
            })?;

            match self.frames.get(frame_id) {
                Some(frame) if !frame.is_free() => frame_ids.push(frame_id),
                Some(_) => {
                    return Err(Error::InconsistentAddressSpace(format!(
                        "sequence {} maps logical page {} to frame {} which is free",
                        seq.seq_id(),
                        logical_index,
                        frame_id
                    )));
                }
                None => {
                    return Err(Error::InconsistentAddressSpace(format!(
                        "sequence {} maps logical page {} to unknown frame {}",
                        seq.seq_id(),
                        logical_index,
                        frame_id
                    )));
                }
            }
        }

        Ok(frame_ids)
    }
}
