//! Attention over paged KV storage.
//!
//! This module contains:
//! - PagedAttentionReader for attention over frame-scattered KV states
//! - AttentionMask for causal vs. full key visibility

pub mod paged;

pub use paged::{AttentionMask, PagedAttentionReader};
