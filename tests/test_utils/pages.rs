use gentree::{
    btree::node::{self, NodeFormat, NodeLayout},
    page::{PageCursor, PageId, PagedFile, PagedMemory, PagedMode},
    pointer::{
        gsp,
        gspp::{self, GsppFailure, PointerState, ResolvedPointer, Slot},
    },
    Generation, TreeConfig,
};

use super::TEST_PAGE_SIZE;

pub const KEY_SIZE: usize = 8;

/// Independent of the process wide page size, so tests that skip
/// `setup()` see the same pages.
pub fn test_config() -> TreeConfig {
    TreeConfig::default().with_page_size(TEST_PAGE_SIZE)
}

pub fn fixed_layout() -> NodeLayout {
    let format = NodeFormat::FixedSize { key_size: KEY_SIZE };
    NodeLayout::from_config(format, &test_config())
}

pub fn new_paged_memory(page_count: u64) -> PagedMemory {
    PagedMemory::from_config(&test_config(), page_count)
}

pub fn write_cursor(file: &PagedMemory, page_id: PageId) -> Box<dyn PageCursor + '_> {
    file.io(page_id, PagedMode::Exclusive).unwrap()
}

/// Run `read` against `page_id` under an optimistic cursor until it
/// saw a consistent page.
pub fn read_optimistic<T, F>(file: &PagedMemory, page_id: PageId, mut read: F) -> T
where
    F: FnMut(&mut dyn PageCursor) -> T,
{
    let mut cursor = file.io(page_id, PagedMode::SharedRead).unwrap();
    loop {
        let value = read(&mut *cursor);
        if !cursor.should_retry() {
            assert!(!cursor.check_and_clear_bounds_flag());
            return value;
        }
    }
}

pub fn new_leaf(file: &PagedMemory, page_id: PageId, generation: Generation) {
    let mut cursor = write_cursor(file, page_id);
    fixed_layout()
        .initialize_leaf(&mut *cursor, generation)
        .unwrap();
}

/// An internal node with `children.len() - 1` keys.
pub fn new_internal(
    file: &PagedMemory,
    page_id: PageId,
    children: &[PageId],
    generation: Generation,
) {
    assert!(!children.is_empty());
    let layout = fixed_layout();
    let mut cursor = write_cursor(file, page_id);
    layout.initialize_internal(&mut *cursor, generation).unwrap();
    node::set_key_count(&mut *cursor, children.len() - 1);
    for (pos, child) in children.iter().enumerate() {
        layout
            .set_child_at(&mut *cursor, *child, pos, generation)
            .unwrap();
    }
}

pub fn link_siblings(file: &PagedMemory, left: PageId, right: PageId, generation: Generation) {
    node::set_right_sibling(&mut *write_cursor(file, left), right, generation).unwrap();
    node::set_left_sibling(&mut *write_cursor(file, right), left, generation).unwrap();
}

/// Write a raw slot, bypassing the pair's write rules.
pub fn poke_slot(
    file: &PagedMemory,
    page_id: PageId,
    gspp_offset: usize,
    slot: Slot,
    generation: u64,
    reference: PageId,
) {
    let mut cursor = write_cursor(file, page_id);
    cursor.set_offset(gspp_offset + slot.offset());
    cursor.put_int(generation as u32);
    cursor.put_6b_long(reference);
    cursor.put_short(gsp::checksum_of(generation, reference));
}

/// Break the checksum of a slot.
pub fn corrupt_slot(file: &PagedMemory, page_id: PageId, gspp_offset: usize, slot: Slot) {
    let mut cursor = write_cursor(file, page_id);
    let checksum_offset = gspp_offset + slot.offset() + gsp::GENERATION_SIZE + gsp::POINTER_SIZE;
    cursor.set_offset(checksum_offset);
    let checksum = cursor.get_short();
    cursor.set_offset(checksum_offset);
    cursor.put_short(!checksum);
}

/// Raw `(generation, reference, checksum)` of a slot.
pub fn slot_content(
    file: &PagedMemory,
    page_id: PageId,
    gspp_offset: usize,
    slot: Slot,
) -> (u64, PageId, u16) {
    read_optimistic(file, page_id, |cursor| {
        cursor.set_offset(gspp_offset + slot.offset());
        let generation = gsp::read_generation(cursor);
        let reference = gsp::read_reference(cursor);
        let checksum = gsp::read_checksum(cursor);
        (generation, reference, checksum)
    })
}

pub fn pointer_states(
    file: &PagedMemory,
    page_id: PageId,
    gspp_offset: usize,
    generation: Generation,
) -> (PointerState, PointerState) {
    read_optimistic(file, page_id, |cursor| {
        cursor.set_offset(gspp_offset);
        gspp::pointer_states(cursor, generation.stable, generation.unstable)
    })
}

pub fn read_pointer(
    file: &PagedMemory,
    page_id: PageId,
    gspp_offset: usize,
    generation: Generation,
) -> Result<ResolvedPointer, GsppFailure> {
    read_optimistic(file, page_id, |cursor| {
        cursor.set_offset(gspp_offset);
        gspp::read(cursor, generation.stable, generation.unstable)
    })
}

pub fn write_pointer(
    file: &PagedMemory,
    page_id: PageId,
    gspp_offset: usize,
    reference: PageId,
    generation: Generation,
) -> Result<Slot, GsppFailure> {
    let mut cursor = write_cursor(file, page_id);
    cursor.set_offset(gspp_offset);
    gspp::write(&mut *cursor, reference, generation.stable, generation.unstable)
}
