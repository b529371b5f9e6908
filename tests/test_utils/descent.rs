use gentree::{
    btree::node::{self, SIZE_PAGE_REFERENCE},
    page::{PageId, PagedMemory},
    pointer::{check_pointer, PointerType},
    Generation, TreeResult, TreeWriterCoordination,
};

use super::{fixed_layout, read_optimistic, KEY_SIZE};

/// What a writer learns about a node when it arrives there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub is_internal: bool,
    pub key_count: usize,
    pub available_space: usize,

    /// Written in an older generation, a change needs a successor.
    pub is_stable: bool,
}

pub fn node_info(file: &PagedMemory, page_id: PageId, generation: Generation) -> NodeInfo {
    let layout = fixed_layout();
    read_optimistic(file, page_id, |cursor| {
        let is_internal = node::is_internal(cursor);
        let key_count = node::key_count(cursor);
        let node_generation = node::generation(cursor);
        let used = key_count.min(layout.internal_max_key_count());
        NodeInfo {
            is_internal,
            key_count,
            available_space: (layout.internal_max_key_count() - used)
                * (KEY_SIZE + SIZE_PAGE_REFERENCE),
            is_stable: node_generation != generation.unstable,
        }
    })
}

pub fn child_at(
    file: &PagedMemory,
    page_id: PageId,
    pos: usize,
    generation: Generation,
) -> TreeResult<PageId> {
    let layout = fixed_layout();
    read_optimistic(file, page_id, |cursor| {
        let result = layout.child_at(cursor, pos, generation);
        check_pointer(
            result,
            false,
            page_id,
            PointerType::Child(pos),
            generation,
            cursor,
            layout.child_offset(pos),
        )
    })
}

/// Walk from `root` down to a leaf, taking the child at the next entry
/// of `positions` on every internal level, and ask `coordination` at
/// every step the way a tree writer does.
///
/// Returns the leaf, or `None` if the coordination vetoed on the way.
pub fn descend<C: TreeWriterCoordination>(
    file: &PagedMemory,
    coordination: &mut C,
    root: PageId,
    positions: &[usize],
    generation: Generation,
) -> TreeResult<Option<PageId>> {
    let mut positions = positions.iter();
    let mut node_id = root;
    coordination.before_traversing_to_child(root, 0);
    loop {
        let info = node_info(file, node_id, generation);
        if !coordination.arrived_at_child(
            info.is_internal,
            info.available_space,
            info.is_stable,
            info.key_count,
        ) {
            return Ok(None);
        }
        if !info.is_internal {
            return Ok(Some(node_id));
        }

        let pos = *positions.next().expect("path ends above the leaves");
        let child = child_at(file, node_id, pos, generation)?;
        coordination.before_traversing_to_child(child, pos);
        node_id = child;
    }
}

/// The usual writer loop around a single operation: try optimistically,
/// and on any veto flip to pessimistic mode and run again from the root.
/// `at_leaf` performs the leaf work and returns `false` on a veto.
pub fn run_operation<C, F>(
    file: &PagedMemory,
    coordination: &mut C,
    root: PageId,
    positions: &[usize],
    generation: Generation,
    mut at_leaf: F,
) -> TreeResult<PageId>
where
    C: TreeWriterCoordination,
    F: FnMut(&mut C, PageId) -> bool,
{
    coordination.check_force_reset();
    coordination.begin_operation();
    loop {
        // no path reuse in these tests, always start over from the root
        coordination.reset();
        if let Some(leaf) = descend(file, coordination, root, positions, generation)? {
            if at_leaf(coordination, leaf) {
                return Ok(leaf);
            }
        }
        assert!(
            !coordination.pessimistic(),
            "pessimistic mode must never veto"
        );
        coordination.flip_to_pessimistic_mode();
    }
}
