//! Error types for paged-kv.

use thiserror::Error;

/// Result type alias for paged-kv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for paged-kv.
#[derive(Error, Debug)]
pub enum Error {
    /// Frame allocation failed - no free frames available.
    ///
    /// Recoverable: callers can release other sequences and retry.
    #[error("frame pool exhausted")]
    Exhausted,

    /// A growth request computed fewer pages than the sequence already owns.
    ///
    /// Sequences only gain tokens, so this indicates the sequence or its
    /// address space was mutated outside the allocator's contract.
    #[error("invalid growth for sequence {seq_id}: {required} pages required but {owned} already owned")]
    InvalidGrowth {
        seq_id: u64,
        required: usize,
        owned: usize,
    },

    /// An address space and the frame pool disagree about what is mapped.
    ///
    /// Unlike [`Error::Exhausted`] this is a hard internal defect, not a
    /// capacity condition.
    #[error("inconsistent address space: {0}")]
    InconsistentAddressSpace(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
