//! Frame and address-space abstractions for paged KV storage.
//!
//! The KV cache is divided into fixed-size frames, similar to how
//! operating systems manage virtual memory with pages. Each sequence
//! sees a contiguous logical address space while its physical frames
//! may be scattered anywhere in the pool.

/// Default page size (tokens per frame).
pub const DEFAULT_PAGE_SIZE: usize = 16;

/// Identity of a physical frame in the pool.
pub type FrameId = usize;

/// A fixed-capacity frame of KV cache memory.
///
/// Each frame holds KV states for up to `capacity` tokens. Frames are the
/// unit of allocation in the [`FrameAllocator`](super::allocator::FrameAllocator):
/// the whole pool is constructed up front and frames move between the free
/// and in-use sets as their reference count changes.
///
/// The reference count is a general counter to leave room for sharing
/// frames across sequences, though ownership is exclusive today: a frame
/// is free exactly when the count is 0 and in use at count 1.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Unique identifier for this physical frame.
    frame_id: FrameId,
    /// Number of tokens this frame can hold.
    capacity: usize,
    /// Reference count; 0 means the frame is in the free set.
    ref_count: usize,
}

impl Frame {
    /// Create a new free frame with the given ID.
    ///
    /// # Arguments
    ///
    /// * `frame_id` - Unique identifier for this frame
    /// * `capacity` - Number of tokens this frame can hold
    pub fn new(frame_id: FrameId, capacity: usize) -> Self {
        Self {
            frame_id,
            capacity,
            ref_count: 0,
        }
    }

    /// Get the frame ID.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Get the capacity in token slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the current reference count.
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Check whether the frame is in the free set.
    pub fn is_free(&self) -> bool {
        self.ref_count == 0
    }

    /// Increment reference count (when handing the frame to a sequence).
    pub fn increment_ref(&mut self) {
        self.ref_count += 1;
    }

    /// Decrement reference count.
    ///
    /// # Returns
    ///
    /// The new reference count after decrementing. Does not go below 0.
    pub fn decrement_ref(&mut self) -> usize {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }
}

/// Maps a sequence's logical page indices to physical frame IDs.
///
/// Think of this like a page table in virtual memory: logical page
/// indices count positions within one sequence, physical frame IDs name
/// frames in the shared pool. The token at position `p` occupies slot
/// `p % page_size` of the frame returned by `lookup(p / page_size)`.
///
/// Logical indices are dense integers from 0 with no gaps, so the table
/// is an index-keyed array rather than a sparse map.
///
/// # Example
///
/// ```
/// use paged_kv::core::frame::AddressSpace;
///
/// let mut space = AddressSpace::new(16);
/// space.map(0, 9);  // positions 0..16
/// space.map(1, 4);  // positions 16..32
///
/// // Position 21 lands in slot 5 of frame 4
/// assert_eq!(space.lookup(21 / 16), Some(4));
///
/// // Nothing is mapped past the second page yet
/// assert_eq!(space.lookup(2), None);
/// ```
#[derive(Debug, Clone)]
pub struct AddressSpace {
    /// Physical frame IDs in logical order.
    frame_ids: Vec<FrameId>,
    /// Number of tokens per page.
    page_size: usize,
}

impl AddressSpace {
    /// Create a new empty address space.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is 0. Slot arithmetic divides by the page
    /// size, so the granularity must be at least one token.
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        Self {
            frame_ids: Vec::new(),
            page_size,
        }
    }

    /// Create a new address space with the default page size.
    pub fn with_default_page_size() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }

    /// Get the page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Register `frame_id` under `logical_index`.
    ///
    /// Overwriting an existing index without releasing the old frame first
    /// leaks a reference; during normal growth the allocator only ever maps
    /// the next unused index.
    ///
    /// # Panics
    ///
    /// Panics if `logical_index` would leave a gap in the table. Logical
    /// indices must stay dense from 0.
    pub fn map(&mut self, logical_index: usize, frame_id: FrameId) {
        assert!(
            logical_index <= self.frame_ids.len(),
            "logical page indices must stay dense: got index {} with {} pages mapped",
            logical_index,
            self.frame_ids.len()
        );
        if logical_index == self.frame_ids.len() {
            self.frame_ids.push(frame_id);
        } else {
            self.frame_ids[logical_index] = frame_id;
        }
    }

    /// Get the physical frame ID for a logical page index.
    ///
    /// Absent is a valid answer for an out-of-range index, so this is a
    /// pure read that never fails loudly.
    pub fn lookup(&self, logical_index: usize) -> Option<FrameId> {
        self.frame_ids.get(logical_index).copied()
    }

    /// Number of pages mapped in this address space.
    pub fn num_pages(&self) -> usize {
        self.frame_ids.len()
    }

    /// Check if the address space is empty.
    pub fn is_empty(&self) -> bool {
        self.frame_ids.is_empty()
    }

    /// Get all physical frame IDs in logical order.
    pub fn frame_ids(&self) -> &[FrameId] {
        &self.frame_ids
    }

    /// Get physical slot indices for all tokens in the sequence.
    ///
    /// Returns a list where `slot_mapping[i]` is the global slot index
    /// for token `i`. Used for writing KV states into the pool.
    ///
    /// Global slot = `frame_id * page_size + slot_within_frame`
    ///
    /// Positions beyond the mapped pages are omitted, so callers that
    /// need full coverage must check page ownership first.
    pub fn slot_mapping(&self, token_count: usize) -> Vec<usize> {
        let mut slots = Vec::with_capacity(token_count);

        for pos in 0..token_count {
            let logical_page = pos / self.page_size;
            let slot_in_frame = pos % self.page_size;

            if let Some(&frame_id) = self.frame_ids.get(logical_page) {
                let global_slot = frame_id * self.page_size + slot_in_frame;
                slots.push(global_slot);
            }
        }

        slots
    }

    /// Clear all mappings from the address space.
    pub fn clear(&mut self) {
        self.frame_ids.clear();
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::with_default_page_size()
    }
}

/// Compute the number of pages needed for a sequence of given length.
///
/// # Example
///
/// ```
/// use paged_kv::core::frame::pages_needed;
///
/// assert_eq!(pages_needed(35, 16), 3);  // 35 tokens -> 3 pages
/// assert_eq!(pages_needed(32, 16), 2);  // 32 tokens -> 2 pages exactly
/// assert_eq!(pages_needed(0, 16), 0);   // 0 tokens -> 0 pages
/// ```
pub fn pages_needed(token_count: usize, page_size: usize) -> usize {
    token_count.div_ceil(page_size)
}
