//! Generation safe pointer, a single `(generation, reference, checksum)`
//! slot.
//!
//! On-disk layout, 12 bytes, big-endian:
//!
//! ```text
//! [ generation: 4B ][ reference: 6B (low int, high short) ][ checksum: 2B ]
//! ```

use crate::page::{PageCursor, PageId, MAX_PAGE_ID};

pub const GENERATION_SIZE: usize = 4;
pub const POINTER_SIZE: usize = 6;
pub const CHECKSUM_SIZE: usize = 2;
pub const SIZE: usize = GENERATION_SIZE + POINTER_SIZE + CHECKSUM_SIZE;

pub const EMPTY_GENERATION: u64 = 0;
pub const EMPTY_POINTER: PageId = 0;

pub const MIN_GENERATION: u64 = 1;
pub const MAX_GENERATION: u64 = 0xFFFF_FFFF;

/// Write a slot at the cursor's current offset.
///
/// Panics if `generation` is outside `[MIN_GENERATION, MAX_GENERATION]`
/// or `reference` doesn't fit in 6 bytes.
pub fn write<C: PageCursor + ?Sized>(
    cursor: &mut C,
    generation: u64,
    reference: PageId,
) {
    assert!(
        (MIN_GENERATION..=MAX_GENERATION).contains(&generation),
        "can not write pointer with generation {}, valid range is [{}, {}]",
        generation,
        MIN_GENERATION,
        MAX_GENERATION
    );
    assert_reference(reference);

    write_unchecked(cursor, generation, reference);
}

/// Overwrite the slot at the cursor's current offset with the empty
/// triplet, all zeros.
pub fn clean<C: PageCursor + ?Sized>(cursor: &mut C) {
    write_unchecked(cursor, EMPTY_GENERATION, EMPTY_POINTER);
}

fn write_unchecked<C: PageCursor + ?Sized>(
    cursor: &mut C,
    generation: u64,
    reference: PageId,
) {
    cursor.put_int(generation as u32);
    cursor.put_6b_long(reference);
    cursor.put_short(checksum_of(generation, reference));
}

pub fn read_generation<C: PageCursor + ?Sized>(cursor: &mut C) -> u64 {
    cursor.get_int() as u64
}

pub fn read_reference<C: PageCursor + ?Sized>(cursor: &mut C) -> PageId {
    cursor.get_6b_long()
}

pub fn read_checksum<C: PageCursor + ?Sized>(cursor: &mut C) -> u16 {
    cursor.get_short()
}

/// XOR fold of all the 16-bit words of generation and reference.
///
/// Only detects torn or half written slots, nothing more.
pub fn checksum_of(generation: u64, reference: PageId) -> u16 {
    let mut result: u16 = 0;
    result ^= generation as u16;
    result ^= (generation >> 16) as u16;
    result ^= reference as u16;
    result ^= (reference >> 16) as u16;
    result ^= (reference >> 32) as u16;
    result
}

/// Read the checksum at the cursor and compare it against the one
/// computed from `generation` and `reference`.
pub fn verify_checksum<C: PageCursor + ?Sized>(
    cursor: &mut C,
    generation: u64,
    reference: PageId,
) -> bool {
    read_checksum(cursor) == checksum_of(generation, reference)
}

pub fn is_empty(generation: u64, reference: PageId) -> bool {
    generation == EMPTY_GENERATION && reference == EMPTY_POINTER
}

fn assert_reference(reference: PageId) {
    assert!(
        reference <= MAX_PAGE_ID,
        "can not write pointer with reference {}, it doesn't fit in {} bytes",
        reference,
        POINTER_SIZE
    );
}
