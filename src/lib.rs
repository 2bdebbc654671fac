//! paged-kv: Paged KV-cache memory management for transformer inference.
//!
//! This crate implements the core PagedAttention memory model:
//! - Fixed-size frames allocated from a preallocated pool
//! - Per-sequence logical-to-physical address spaces
//! - All-or-nothing sequence growth with FIFO frame reuse
//! - Attention computed directly over frame-scattered KV states

pub mod config;
pub mod error;

pub mod attention;
pub mod core;

pub use attention::{AttentionMask, PagedAttentionReader};
pub use config::PoolConfig;
pub use crate::core::allocator::FrameAllocator;
pub use crate::core::frame::{pages_needed, AddressSpace, Frame, FrameId, DEFAULT_PAGE_SIZE};
pub use crate::core::sequence::{Sequence, SequenceId};
pub use crate::core::store::FrameStore;
pub use error::{Error, Result};
