//! Core infrastructure for paged KV memory management.
//!
//! This module contains the fundamental building blocks:
//! - Frame and AddressSpace for the paged memory model
//! - FrameAllocator for pool-based allocation
//! - FrameStore for the pooled KV tensors
//! - Sequence for per-request token and page tracking

pub mod allocator;
pub mod frame;
pub mod sequence;
pub mod store;
