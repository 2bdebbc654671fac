//! Paged attention read path.
//!
//! A sequence's KV states live in fixed-size frames scattered across the
//! pool, so attention cannot run over them directly. The reader gathers
//! the sequence's frames in logical page order, flattens them into one
//! time-ordered key/value view, truncates the partially filled tail of
//! the last page, and computes scaled dot-product attention.
//!
//! ## Memory Layout
//!
//! ```text
//! Contiguous KV view:  [token_count, num_heads, head_dim]
//! Pooled KV storage:   [pool_size, page_size, num_heads, head_dim]
//!
//! Mapping via AddressSpace:
//!   Token at position p -> logical page (p / page_size), slot (p % page_size)
//!   Physical frame = lookup(p / page_size)
//! ```
//!
//! Truncation to the true token count is mandatory: attending over the
//! unused trailing slots of the last page would mix zeroed storage into
//! the softmax.

use candle_core::{Device, Tensor, D};

use crate::core::allocator::FrameAllocator;
use crate::core::sequence::Sequence;
use crate::error::{Error, Result};

/// Which key positions are visible to each query position.
///
/// Queries are taken to be the trailing positions of the sequence: with
/// `n` queries against `t` tokens, query `i` sits at absolute position
/// `t - n + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttentionMask {
    /// Query `i` attends to positions up to and including its own.
    ///
    /// This is the correct mode for autoregressive decoding, including
    /// multi-position prefill where later queries must not see earlier
    /// queries' futures.
    #[default]
    Causal,
    /// Every query attends to every cached position.
    Full,
}

/// Computes attention over a sequence's paged KV states.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use paged_kv::{AttentionMask, FrameAllocator, PagedAttentionReader, PoolConfig, Sequence};
///
/// let config = PoolConfig::new(8, 16, 2, 8);
/// let mut pool = FrameAllocator::new(config, &Device::Cpu).unwrap();
/// let mut seq = Sequence::new(1, vec![0; 5], 16);
/// pool.grow_sequence(&mut seq).unwrap();
///
/// let reader = PagedAttentionReader::new(2, 8);
/// let query = Tensor::randn(0.0f32, 1.0, (1, 2, 8), &Device::Cpu).unwrap();
/// let output = reader.compute(&query, &pool, &seq, AttentionMask::Causal).unwrap();
///
/// assert_eq!(output.dims(), &[1, 2, 8]);
/// ```
#[derive(Debug, Clone)]
pub struct PagedAttentionReader {
    /// Number of attention heads.
    num_heads: usize,
    /// Dimension per head.
    head_dim: usize,
    /// Score scaling factor, 1/sqrt(head_dim).
    scale: f64,
}

impl PagedAttentionReader {
    /// Create a new reader for the given head geometry.
    pub fn new(num_heads: usize, head_dim: usize) -> Self {
        Self {
            num_heads,
            head_dim,
            scale: 1.0 / (head_dim as f64).sqrt(),
        }
    }

    /// Create a reader matching a pool's head geometry.
    pub fn for_pool(pool: &FrameAllocator) -> Self {
        Self::new(pool.config().num_heads, pool.config().head_dim)
    }

    /// Get the number of attention heads.
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Get the dimension per head.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Compute attention for trailing query positions of a sequence.
    ///
    /// Gathers the sequence's frames in logical order, truncates the
    /// assembled view to the true token count, and runs scaled dot-product
    /// attention with the requested masking.
    ///
    /// # Arguments
    ///
    /// * `query` - Query tensor `[num_queries, num_heads, head_dim]`
    /// * `pool` - Allocator holding the sequence's frames
    /// * `seq` - Sequence whose cached tokens are attended over
    /// * `mask` - Visibility of key positions per query position
    ///
    /// # Returns
    ///
    /// Attention output `[num_queries, num_heads, head_dim]`
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for geometry mismatches, an empty sequence, or
    ///   more query positions than cached tokens
    /// - [`Error::InconsistentAddressSpace`] if the sequence claims more
    ///   tokens than its pages cover, or maps a frame the pool does not
    ///   hold in use
    pub fn compute(
        &self,
        query: &Tensor,
        pool: &FrameAllocator,
        seq: &Sequence,
        mask: AttentionMask,
    ) -> Result<Tensor> {
        let (num_queries, query_heads, query_dim) = query.dims3()?;
        if query_heads != self.num_heads || query_dim != self.head_dim {
            return Err(Error::Config(format!(
                "query shape [{}, {}, {}] does not match reader [num_heads={}, head_dim={}]",
                num_queries, query_heads, query_dim, self.num_heads, self.head_dim
            )));
        }
        if pool.config().num_heads != self.num_heads || pool.config().head_dim != self.head_dim {
            return Err(Error::Config(format!(
                "reader built for [num_heads={}, head_dim={}], pool holds [num_heads={}, head_dim={}]",
                self.num_heads,
                self.head_dim,
                pool.config().num_heads,
                pool.config().head_dim
            )));
        }

        let token_count = seq.total_len();
        if token_count == 0 {
            return Err(Error::Config(format!(
                "sequence {} has no tokens to attend over",
                seq.seq_id()
            )));
        }
        if num_queries > token_count {
            return Err(Error::Config(format!(
                "{} query positions exceed the {} tokens of sequence {}",
                num_queries,
                token_count,
                seq.seq_id()
            )));
        }

        let coverage = seq.num_pages() * pool.page_size();
        if token_count > coverage {
            return Err(Error::InconsistentAddressSpace(format!(
                "sequence {} claims {} tokens but its {} pages cover only {} slots",
                seq.seq_id(),
                token_count,
                seq.num_pages(),
                coverage
            )));
        }

        // Gather K/V in logical page order
        // Shape: [num_pages, page_size, num_heads, head_dim]
        let gathered_keys = pool.gather_keys(seq)?;
        let gathered_values = pool.gather_values(seq)?;

        // Flatten pages into one time-ordered view, then drop the unused
        // tail of the last page
        let keys = gathered_keys
            .reshape((coverage, self.num_heads, self.head_dim))?
            .narrow(0, 0, token_count)?;
        let values = gathered_values
            .reshape((coverage, self.num_heads, self.head_dim))?
            .narrow(0, 0, token_count)?;

        // Heads outermost for batched matmul
        let q = query.transpose(0, 1)?.contiguous()?; // [num_heads, num_queries, head_dim]
        let k = keys.transpose(0, 1)?.contiguous()?; // [num_heads, token_count, head_dim]
        let v = values.transpose(0, 1)?.contiguous()?;

        // scores = Q @ K^T / sqrt(d): [num_heads, num_queries, token_count]
        let scores = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? * self.scale)?;

        let scores = match mask {
            AttentionMask::Full => scores,
            AttentionMask::Causal if num_queries > 1 => {
                let bias = causal_mask(num_queries, token_count, query.device())?
                    .to_dtype(scores.dtype())?;
                scores.broadcast_add(&bias)?
            }
            // A single query is the last position and already sees everything
            AttentionMask::Causal => scores,
        };

        let weights = candle_nn::ops::softmax_last_dim(&scores)?;

        // output = weights @ V: [num_heads, num_queries, head_dim]
        let output = weights.matmul(&v)?;

        // Restore [num_queries, num_heads, head_dim]
        Ok(output.transpose(0, 1)?.contiguous()?)
    }
}

/// Creates an additive causal mask for trailing query positions.
///
/// Query `i` sits at absolute position `token_count - num_queries + i`;
/// key positions beyond it get -inf.
fn causal_mask(num_queries: usize, token_count: usize, device: &Device) -> Result<Tensor> {
    let neg_inf = f32::NEG_INFINITY;
    let first_query_pos = token_count - num_queries;

    let mask: Vec<f32> = (0..num_queries)
        .flat_map(|i| {
            let query_pos = first_query_pos + i;
            (0..token_count).map(move |key_pos| if key_pos > query_pos { neg_inf } else { 0.0f32 })
        })
        .collect();

    Ok(Tensor::from_vec(
        mask,
        (1, num_queries, token_count),
        device,
    )?)
}
