//! Sequence tracking for generation requests.
//!
//! A sequence represents a single generation request, tracking its tokens
//! and the KV cache pages it owns through its address space.

use crate::core::frame::{AddressSpace, DEFAULT_PAGE_SIZE};

/// Unique identifier for a sequence.
pub type SequenceId = u64;

/// A sequence represents a single generation request.
///
/// It tracks:
/// - Input prompt tokens
/// - Generated output tokens
/// - KV cache page ownership (via its [`AddressSpace`])
///
/// Tokens only accumulate; the page count implied by the token count is
/// allowed to run one page ahead of the pages actually owned between an
/// `append_token` call and the next growth request.
///
/// # Example
///
/// ```
/// use paged_kv::core::sequence::Sequence;
///
/// let mut seq = Sequence::new(1, vec![1, 2, 3, 4], 16);
/// assert_eq!(seq.prompt_len(), 4);
/// assert_eq!(seq.output_len(), 0);
///
/// seq.append_token(5);
/// assert_eq!(seq.output_len(), 1);
/// assert_eq!(seq.total_len(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct Sequence {
    /// Unique sequence identifier.
    seq_id: SequenceId,
    /// Prompt token IDs.
    prompt_token_ids: Vec<u32>,
    /// Generated output token IDs.
    output_token_ids: Vec<u32>,
    /// Logical-to-physical page mapping for the KV cache.
    address_space: AddressSpace,
}

impl Sequence {
    /// Create a new sequence with the given prompt tokens and page size.
    pub fn new(seq_id: SequenceId, prompt_token_ids: Vec<u32>, page_size: usize) -> Self {
        Self {
            seq_id,
            prompt_token_ids,
            output_token_ids: Vec::new(),
            address_space: AddressSpace::new(page_size),
        }
    }

    /// Create a new sequence with the default page size.
    pub fn with_default_page_size(seq_id: SequenceId, prompt_token_ids: Vec<u32>) -> Self {
        Self::new(seq_id, prompt_token_ids, DEFAULT_PAGE_SIZE)
    }

    // ========== Getters ==========

    /// Get the sequence ID.
    pub fn seq_id(&self) -> SequenceId {
        self.seq_id
    }

    /// Get the prompt token IDs.
    pub fn prompt_token_ids(&self) -> &[u32] {
        &self.prompt_token_ids
    }

    /// Get the output token IDs.
    pub fn output_token_ids(&self) -> &[u32] {
        &self.output_token_ids
    }

    /// Get all token IDs (prompt + output).
    pub fn all_token_ids(&self) -> Vec<u32> {
        let mut tokens = self.prompt_token_ids.clone();
        tokens.extend(&self.output_token_ids);
        tokens
    }

    /// Get the address space.
    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    /// Get mutable access to the address space.
    pub fn address_space_mut(&mut self) -> &mut AddressSpace {
        &mut self.address_space
    }

    /// Get the page size this sequence was created with.
    pub fn page_size(&self) -> usize {
        self.address_space.page_size()
    }

    // ========== Length queries ==========

    /// Get the prompt length.
    pub fn prompt_len(&self) -> usize {
        self.prompt_token_ids.len()
    }

    /// Get the output length.
    pub fn output_len(&self) -> usize {
        self.output_token_ids.len()
    }

    /// Get the total length (prompt + output).
    pub fn total_len(&self) -> usize {
        self.prompt_len() + self.output_len()
    }

    /// Number of pages this sequence currently owns.
    pub fn num_pages(&self) -> usize {
        self.address_space.num_pages()
    }

    /// Logical page indices this sequence currently owns, in order.
    pub fn logical_pages(&self) -> std::ops::Range<usize> {
        0..self.address_space.num_pages()
    }

    // ========== Token operations ==========

    /// Append a generated token.
    pub fn append_token(&mut self, token_id: u32) {
        self.output_token_ids.push(token_id);
    }

    /// Get the last token ID.
    pub fn last_token_id(&self) -> Option<u32> {
        self.output_token_ids
            .last()
            .copied()
            .or_else(|| self.prompt_token_ids.last().copied())
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.seq_id == other.seq_id
    }
}

impl Eq for Sequence {}

impl std::hash::Hash for Sequence {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.seq_id.hash(state);
    }
}
