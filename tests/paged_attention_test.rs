//! Integration tests for PagedAttentionReader.

use candle_core::{DType, Device, Tensor};
use paged_kv::{AttentionMask, Error, FrameAllocator, PagedAttentionReader, PoolConfig, Sequence};

fn test_device() -> Device {
    Device::Cpu
}

fn test_pool(pool_size: usize, page_size: usize) -> FrameAllocator {
    let config = PoolConfig::new(pool_size, page_size, 2, 4);
    FrameAllocator::new(config, &test_device()).unwrap()
}

/// Value tensor where every component of position `p` equals `p`.
fn position_values(count: usize) -> Tensor {
    let data: Vec<f32> = (0..count).flat_map(|p| vec![p as f32; 2 * 4]).collect();
    Tensor::from_vec(data, (count, 2, 4), &test_device()).unwrap()
}

/// Zero keys make attention weights uniform over the attended positions.
fn zero_keys(count: usize) -> Tensor {
    Tensor::zeros((count, 2, 4), DType::F32, &test_device()).unwrap()
}

#[test]
fn test_decode_attention_shape() {
    let mut pool = test_pool(8, 4);
    let mut seq = Sequence::new(1, vec![0; 6], 4);
    pool.grow_sequence(&mut seq).unwrap();

    let keys = Tensor::randn(0.0f32, 1.0, (6, 2, 4), &test_device()).unwrap();
    let values = Tensor::randn(0.0f32, 1.0, (6, 2, 4), &test_device()).unwrap();
    pool.write_kv(&seq, 0, &keys, &values).unwrap();

    let reader = PagedAttentionReader::for_pool(&pool);
    let query = Tensor::randn(0.0f32, 1.0, (1, 2, 4), &test_device()).unwrap();
    let output = reader
        .compute(&query, &pool, &seq, AttentionMask::Causal)
        .unwrap();

    assert_eq!(output.dims(), &[1, 2, 4]);
}

#[test]
fn test_attention_over_scattered_frames() {
    let mut pool = test_pool(4, 4);

    // Fragment the pool so the sequence lands on out-of-order frames
    pool.allocate().unwrap();
    let released = pool.allocate().unwrap();
    pool.allocate().unwrap();
    pool.release(released).unwrap();

    let mut seq = Sequence::new(1, vec![0; 8], 4);
    pool.grow_sequence(&mut seq).unwrap();
    assert_eq!(seq.address_space().frame_ids(), &[3, released]);

    pool.write_kv(&seq, 0, &zero_keys(8), &position_values(8))
        .unwrap();

    // Uniform attention over positions 0..8 averages to 3.5; getting this
    // right requires assembling frames in logical order, not physical order
    let reader = PagedAttentionReader::new(2, 4);
    let query = Tensor::ones((1, 2, 4), DType::F32, &test_device()).unwrap();
    let output = reader
        .compute(&query, &pool, &seq, AttentionMask::Full)
        .unwrap();

    let vals: Vec<f32> = output.flatten_all().unwrap().to_vec1().unwrap();
    assert!(vals.iter().all(|&v| (v - 3.5).abs() < 1e-5));
}

#[test]
fn test_tail_slots_do_not_leak_into_attention() {
    let mut pool = test_pool(4, 4);
    let mut seq = Sequence::new(1, vec![0; 5], 4);
    pool.grow_sequence(&mut seq).unwrap();

    // 5 real positions, then garbage in the covered-but-unused tail
    pool.write_kv(&seq, 0, &zero_keys(5), &position_values(5))
        .unwrap();
    let garbage = (Tensor::ones((3, 2, 4), DType::F32, &test_device()).unwrap() * 99.0).unwrap();
    pool.write_kv(&seq, 5, &zero_keys(3), &garbage).unwrap();

    // mean(0..5) = 2.0; any tail leak would drag the average toward 99
    let reader = PagedAttentionReader::new(2, 4);
    let query = Tensor::ones((1, 2, 4), DType::F32, &test_device()).unwrap();
    let output = reader
        .compute(&query, &pool, &seq, AttentionMask::Full)
        .unwrap();

    let vals: Vec<f32> = output.flatten_all().unwrap().to_vec1().unwrap();
    assert!(vals.iter().all(|&v| (v - 2.0).abs() < 1e-5));
}

#[test]
fn test_causal_and_full_masks_differ() {
    let mut pool = test_pool(4, 4);
    let mut seq = Sequence::new(1, vec![0; 6], 4);
    pool.grow_sequence(&mut seq).unwrap();
    pool.write_kv(&seq, 0, &zero_keys(6), &position_values(6))
        .unwrap();

    let reader = PagedAttentionReader::new(2, 4);
    let query = Tensor::ones((2, 2, 4), DType::F32, &test_device()).unwrap();

    // Causal: the query at position 4 must not see position 5
    let causal = reader
        .compute(&query, &pool, &seq, AttentionMask::Causal)
        .unwrap();
    let causal_vals: Vec<f32> = causal.flatten_all().unwrap().to_vec1().unwrap();
    assert!(causal_vals[..8].iter().all(|&v| (v - 2.0).abs() < 1e-5));
    assert!(causal_vals[8..].iter().all(|&v| (v - 2.5).abs() < 1e-5));

    // Full: both queries average over all six positions
    let full = reader
        .compute(&query, &pool, &seq, AttentionMask::Full)
        .unwrap();
    let full_vals: Vec<f32> = full.flatten_all().unwrap().to_vec1().unwrap();
    assert!(full_vals.iter().all(|&v| (v - 2.5).abs() < 1e-5));
}

#[test]
fn test_empty_sequence_is_rejected() {
    let pool = test_pool(4, 4);
    let seq = Sequence::new(1, vec![], 4);

    let reader = PagedAttentionReader::new(2, 4);
    let query = Tensor::ones((1, 2, 4), DType::F32, &test_device()).unwrap();

    assert!(matches!(
        reader.compute(&query, &pool, &seq, AttentionMask::Causal),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_tokens_without_pages_are_rejected() {
    let pool = test_pool(4, 4);

    // 3 tokens but the sequence was never grown
    let seq = Sequence::new(1, vec![0; 3], 4);

    let reader = PagedAttentionReader::new(2, 4);
    let query = Tensor::ones((1, 2, 4), DType::F32, &test_device()).unwrap();

    assert!(matches!(
        reader.compute(&query, &pool, &seq, AttentionMask::Causal),
        Err(Error::InconsistentAddressSpace(_))
    ));
}

#[test]
fn test_released_frame_is_detected() {
    let mut pool = test_pool(4, 4);
    let mut seq = Sequence::new(1, vec![0; 6], 4);
    pool.grow_sequence(&mut seq).unwrap();

    let stale = seq.address_space().frame_ids()[1];
    pool.release(stale).unwrap();

    let reader = PagedAttentionReader::new(2, 4);
    let query = Tensor::ones((1, 2, 4), DType::F32, &test_device()).unwrap();

    assert!(matches!(
        reader.compute(&query, &pool, &seq, AttentionMask::Causal),
        Err(Error::InconsistentAddressSpace(_))
    ));
}

#[test]
fn test_head_geometry_mismatch_is_rejected() {
    let (pool, seq) = {
        let mut pool = test_pool(4, 4);
        let mut seq = Sequence::new(1, vec![0; 4], 4);
        pool.grow_sequence(&mut seq).unwrap();
        (pool, seq)
    };

    // Reader and query agree with each other but not with the pool
    let reader = PagedAttentionReader::new(4, 4);
    let query = Tensor::ones((1, 4, 4), DType::F32, &test_device()).unwrap();

    assert!(matches!(
        reader.compute(&query, &pool, &seq, AttentionMask::Causal),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_more_queries_than_tokens_is_rejected() {
    let mut pool = test_pool(4, 4);
    let mut seq = Sequence::new(1, vec![0; 2], 4);
    pool.grow_sequence(&mut seq).unwrap();

    let reader = PagedAttentionReader::new(2, 4);
    let query = Tensor::ones((3, 2, 4), DType::F32, &test_device()).unwrap();

    assert!(matches!(
        reader.compute(&query, &pool, &seq, AttentionMask::Causal),
        Err(Error::Config(_))
    ));
}
