//! Coordination between concurrent tree writers.
//!
//! A writer descends from the root and asks its coordination at every
//! step whether it may go on. Every `bool` returning method is a veto
//! point: on `false` the writer calls
//! [`TreeWriterCoordination::flip_to_pessimistic_mode`] and restarts
//! the operation from the root.

mod latch_crabbing;

pub use latch_crabbing::LatchCrabbingCoordination;

use crate::page::PageId;

pub trait TreeWriterCoordination: Send {
    /// Called once when the writer is handed out, before its first
    /// operation.
    fn initialize(&mut self) {}

    /// Whether every operation has to descend from the root instead of
    /// continuing from where the previous one left off.
    fn must_start_from_root(&self) -> bool;

    /// Whether the held path must be dropped before the next operation.
    fn check_force_reset(&mut self) -> bool;

    /// Start a new top level write operation in optimistic mode.
    fn begin_operation(&mut self);

    /// The writer is about to move from the current node (or from
    /// nowhere, for the root) to `child_id` at `child_pos` of the
    /// current node.
    fn before_traversing_to_child(
        &mut self,
        child_id: PageId,
        child_pos: usize,
    );

    /// The writer is now at the child announced by the previous
    /// [`TreeWriterCoordination::before_traversing_to_child`].
    ///
    /// `is_stable` tells that the child was written in an older
    /// generation, i.e. a change to it creates a successor and thereby
    /// changes the parent's child pointer as well.
    fn arrived_at_child(
        &mut self,
        is_internal: bool,
        available_space: usize,
        is_stable: bool,
        key_count: usize,
    ) -> bool;

    /// The node at the current depth was replaced by `child_id`, which
    /// sits at `child_pos` of its parent.
    fn update_child_information(
        &mut self,
        child_id: PageId,
        child_pos: usize,
    );

    /// The leaf is about to split, sending an entry of `bubble_entry_size`
    /// bytes to its parent.
    fn before_splitting_leaf(&mut self, bubble_entry_size: usize) -> bool;

    /// A leaf entry of `entry_size` bytes is about to be removed.
    fn before_removal_from_leaf(&mut self, entry_size: usize) -> bool;

    fn before_accessing_right_sibling_leaf(
        &mut self,
        sibling_id: PageId,
    ) -> bool;

    /// Only reachable in pessimistic mode.
    fn before_split_internal(&mut self, tree_node_id: PageId);

    /// Only reachable in pessimistic mode.
    fn before_underflow_in_leaf(&mut self, tree_node_id: PageId);

    /// Release the node at the current depth and move to its parent.
    fn up(&mut self);

    /// Release everything held.
    fn reset(&mut self);

    /// Drop everything held and continue in pessimistic mode until the
    /// next [`TreeWriterCoordination::begin_operation`]. The caller
    /// restarts its operation from the root.
    fn flip_to_pessimistic_mode(&mut self);

    fn pessimistic(&self) -> bool;

    fn close(&mut self);
}

/// Coordination for a writer that is alone on the tree, e.g. a bulk
/// loader or a checkpoint time cleanup. Permits everything.
#[derive(Debug, Default)]
pub struct NoCoordination;

impl TreeWriterCoordination for NoCoordination {
    fn must_start_from_root(&self) -> bool {
        false
    }

    fn check_force_reset(&mut self) -> bool {
        false
    }

    fn begin_operation(&mut self) {}

    fn before_traversing_to_child(
        &mut self,
        _child_id: PageId,
        _child_pos: usize,
    ) {
    }

    fn arrived_at_child(
        &mut self,
        _is_internal: bool,
        _available_space: usize,
        _is_stable: bool,
        _key_count: usize,
    ) -> bool {
        true
    }

    fn update_child_information(
        &mut self,
        _child_id: PageId,
        _child_pos: usize,
    ) {
    }

    fn before_splitting_leaf(&mut self, _bubble_entry_size: usize) -> bool {
        true
    }

    fn before_removal_from_leaf(&mut self, _entry_size: usize) -> bool {
        true
    }

    fn before_accessing_right_sibling_leaf(
        &mut self,
        _sibling_id: PageId,
    ) -> bool {
        true
    }

    fn before_split_internal(&mut self, _tree_node_id: PageId) {}

    fn before_underflow_in_leaf(&mut self, _tree_node_id: PageId) {}

    fn up(&mut self) {}

    fn reset(&mut self) {}

    fn flip_to_pessimistic_mode(&mut self) {}

    fn pessimistic(&self) -> bool {
        false
    }

    fn close(&mut self) {}
}
