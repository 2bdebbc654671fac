//! Integration tests for Frame and AddressSpace.

use paged_kv::{pages_needed, AddressSpace, Frame, DEFAULT_PAGE_SIZE};

#[test]
fn test_frame_creation() {
    let frame = Frame::new(3, 16);

    assert_eq!(frame.frame_id(), 3);
    assert_eq!(frame.capacity(), 16);
    assert_eq!(frame.ref_count(), 0);
    assert!(frame.is_free());
}

#[test]
fn test_frame_ref_count_lifecycle() {
    let mut frame = Frame::new(0, 16);

    frame.increment_ref();
    assert_eq!(frame.ref_count(), 1);
    assert!(!frame.is_free());

    assert_eq!(frame.decrement_ref(), 0);
    assert!(frame.is_free());

    // Decrementing a free frame saturates at zero
    assert_eq!(frame.decrement_ref(), 0);
    assert_eq!(frame.ref_count(), 0);
}

#[test]
fn test_address_space_translation() {
    let mut space = AddressSpace::new(16);
    assert!(space.is_empty());

    space.map(0, 42);
    space.map(1, 7);

    assert_eq!(space.lookup(0), Some(42));
    assert_eq!(space.lookup(1), Some(7));
    assert_eq!(space.num_pages(), 2);
    assert_eq!(space.frame_ids(), &[42, 7]);
}

#[test]
fn test_lookup_beyond_mapped_pages() {
    let mut space = AddressSpace::new(16);
    space.map(0, 5);

    // Absent is a valid outcome, not an error
    assert_eq!(space.lookup(1), None);
    assert_eq!(space.lookup(100), None);
}

#[test]
fn test_remap_existing_page() {
    let mut space = AddressSpace::new(16);
    space.map(0, 5);
    space.map(0, 9);

    assert_eq!(space.lookup(0), Some(9));
    assert_eq!(space.num_pages(), 1);
}

#[test]
fn test_slot_mapping_spans_frames() {
    let mut space = AddressSpace::new(4);
    space.map(0, 2);
    space.map(1, 0);

    // Positions 0..4 land in frame 2, positions 4..6 in frame 0
    assert_eq!(space.slot_mapping(6), vec![8, 9, 10, 11, 0, 1]);
}

#[test]
fn test_clear_forgets_all_mappings() {
    let mut space = AddressSpace::with_default_page_size();
    space.map(0, 1);
    space.map(1, 2);

    space.clear();

    assert!(space.is_empty());
    assert_eq!(space.lookup(0), None);
    assert_eq!(space.page_size(), DEFAULT_PAGE_SIZE);
}

#[test]
fn test_pages_needed_rounds_up() {
    assert_eq!(pages_needed(0, 16), 0);
    assert_eq!(pages_needed(1, 16), 1);
    assert_eq!(pages_needed(16, 16), 1);
    assert_eq!(pages_needed(17, 16), 2);
    assert_eq!(pages_needed(50, 16), 4);
    assert_eq!(pages_needed(64, 16), 4);
    assert_eq!(pages_needed(65, 16), 5);
}
