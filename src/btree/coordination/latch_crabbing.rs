use std::{fmt, sync::Arc};

use itertools::Itertools;
use log::debug;

use super::TreeWriterCoordination;
use crate::{
    config::TreeConfig,
    latch::{LatchService, LongSpinLatch},
    page::PageId,
};

/// What the writer learned about the node it holds at one depth.
struct DepthData {
    tree_node_id: PageId,
    latch: Arc<LongSpinLatch>,
    latch_type_is_write: bool,
    available_space: usize,
    key_count: usize,
    is_stable: bool,

    /// Position of the child the writer went into from this node.
    child_pos: usize,
}

impl DepthData {
    fn release(self) {
        if self.latch_type_is_write {
            self.latch.release_write();
        } else {
            self.latch.release_read();
        }
        self.latch.deref();
    }
}

/// Latch crabbing for concurrent writers.
///
/// In optimistic mode the writer read latches its path and upgrades
/// only what it is about to change: the leaf, plus the parent if the
/// change reaches one level up and the parent can take it without
/// splitting. Anything bigger (cascading splits, underflow, sibling
/// moves, successors whose siblings live under other parents) is
/// vetoed, and the writer redoes the operation in pessimistic mode
/// where every node on the path is write latched.
///
/// Latches are taken top down and siblings left to right, so writers
/// never wait on each other in a cycle. Upgrades never wait at all.
pub struct LatchCrabbingCoordination {
    latch_service: Arc<LatchService>,
    leaf_underflow_threshold: usize,
    reset_frequency: usize,

    data_by_depth: Vec<DepthData>,
    sibling_latches: Vec<Arc<LongSpinLatch>>,
    pessimistic: bool,
    operation_counter: usize,
    pessimistic_flips: u64,
    last_veto: Option<&'static str>,
}

impl LatchCrabbingCoordination {
    /// `leaf_underflow_threshold` is the available space in a leaf above
    /// which it counts as underflowing.
    pub fn new(
        latch_service: Arc<LatchService>,
        leaf_underflow_threshold: usize,
        config: &TreeConfig,
    ) -> Self {
        assert!(
            config.reset_frequency > 0,
            "reset frequency must be positive"
        );
        Self {
            latch_service,
            leaf_underflow_threshold,
            reset_frequency: config.reset_frequency,
            data_by_depth: Vec::new(),
            sibling_latches: Vec::new(),
            pessimistic: false,
            operation_counter: 0,
            pessimistic_flips: 0,
            last_veto: None,
        }
    }

    /// How many times an operation had to be redone pessimistically.
    pub fn pessimistic_flips(&self) -> u64 {
        self.pessimistic_flips
    }

    pub fn held_latches(&self) -> usize {
        self.data_by_depth.len() + self.sibling_latches.len()
    }

    /// Depth of the node the writer is at, the root being 0.
    pub fn depth(&self) -> Option<usize> {
        self.data_by_depth.len().checked_sub(1)
    }

    fn veto(&mut self, reason: &'static str) -> bool {
        self.last_veto = Some(reason);
        false
    }

    fn current(&mut self) -> &mut DepthData {
        match self.data_by_depth.last_mut() {
            Some(data) => data,
            None => panic!("no tree node reached yet"),
        }
    }

    fn parent(&self) -> Option<&DepthData> {
        let len = self.data_by_depth.len();
        if len < 2 {
            return None;
        }
        self.data_by_depth.get(len - 2)
    }

    fn try_upgrade_read_latch_to_write(data: &mut DepthData) -> bool {
        if data.latch_type_is_write {
            return true;
        }
        if data.latch.try_upgrade_to_write() {
            data.latch_type_is_write = true;
            return true;
        }
        false
    }

    /// The parent is about to change. It must exist and be of the
    /// unstable generation, otherwise the change would create a
    /// successor for it and reach the grandparent too.
    fn try_upgrade_unstable_parent_read_latch_to_write(&mut self) -> bool {
        let parent_depth = match self.data_by_depth.len().checked_sub(2) {
            Some(depth) => depth,
            None => return self.veto("no parent to upgrade"),
        };
        let parent = &mut self.data_by_depth[parent_depth];
        if parent.is_stable {
            return self.veto("parent needs a successor");
        }
        if !Self::try_upgrade_read_latch_to_write(parent) {
            return self.veto("parent latch contended");
        }
        true
    }
}

impl TreeWriterCoordination for LatchCrabbingCoordination {
    fn initialize(&mut self) {
        assert!(
            self.data_by_depth.is_empty(),
            "coordination initialized while holding {:?}",
            self
        );
    }

    fn must_start_from_root(&self) -> bool {
        self.data_by_depth.is_empty()
    }

    fn check_force_reset(&mut self) -> bool {
        self.operation_counter += 1;
        let due = self.operation_counter % self.reset_frequency == 0;
        if self.pessimistic || due {
            self.reset();
            return true;
        }
        false
    }

    fn begin_operation(&mut self) {
        self.pessimistic = false;
        self.last_veto = None;
    }

    fn before_traversing_to_child(
        &mut self,
        child_id: PageId,
        child_pos: usize,
    ) {
        if let Some(parent) = self.data_by_depth.last_mut() {
            parent.child_pos = child_pos;
        }

        let latch = self.latch_service.latch(child_id);
        let acquired = if self.pessimistic {
            latch.acquire_write()
        } else {
            latch.acquire_read()
        };
        // we hold a reference, nobody can kill the latch under us
        assert!(acquired, "dead latch handed out for node {}", child_id);

        self.data_by_depth.push(DepthData {
            tree_node_id: child_id,
            latch,
            latch_type_is_write: self.pessimistic,
            available_space: 0,
            key_count: 0,
            is_stable: false,
            child_pos: 0,
        });
    }

    fn arrived_at_child(
        &mut self,
        is_internal: bool,
        available_space: usize,
        is_stable: bool,
        key_count: usize,
    ) -> bool {
        let pessimistic = self.pessimistic;
        let leaf = self.current();
        leaf.available_space = available_space;
        leaf.is_stable = is_stable;
        leaf.key_count = key_count;

        if is_internal || pessimistic {
            return true;
        }

        if !Self::try_upgrade_read_latch_to_write(leaf) {
            return self.veto("leaf latch contended");
        }

        if is_stable {
            // the successor gets linked from both siblings, and a sibling
            // behind the parent's edge hangs off an unlatched parent
            let at_parent_boundary = match self.parent() {
                Some(parent) => {
                    let pos = parent.child_pos;
                    pos == 0 || pos == parent.key_count
                }
                None => return self.veto("root leaf needs a successor"),
            };
            if at_parent_boundary {
                return self.veto("successor at parent boundary");
            }
            return self.try_upgrade_unstable_parent_read_latch_to_write();
        }
        true
    }

    fn update_child_information(
        &mut self,
        child_id: PageId,
        child_pos: usize,
    ) {
        self.current().tree_node_id = child_id;
        if let Some(parent_depth) = self.data_by_depth.len().checked_sub(2) {
            self.data_by_depth[parent_depth].child_pos = child_pos;
        }
    }

    fn before_splitting_leaf(&mut self, bubble_entry_size: usize) -> bool {
        if self.pessimistic {
            return true;
        }
        let parent_has_room = match self.parent() {
            Some(parent) => bubble_entry_size <= parent.available_space,
            None => return self.veto("split of root leaf"),
        };
        if !parent_has_room {
            return self.veto("split would overflow parent");
        }
        self.try_upgrade_unstable_parent_read_latch_to_write()
    }

    fn before_removal_from_leaf(&mut self, entry_size: usize) -> bool {
        if self.pessimistic {
            return true;
        }
        let available_space = self.current().available_space;
        if available_space + entry_size > self.leaf_underflow_threshold {
            return self.veto("removal would underflow leaf");
        }
        true
    }

    fn before_accessing_right_sibling_leaf(
        &mut self,
        sibling_id: PageId,
    ) -> bool {
        if !self.pessimistic {
            return self.veto("right sibling access");
        }

        let latch = self.latch_service.latch(sibling_id);
        let acquired = latch.acquire_write();
        assert!(acquired, "dead latch handed out for node {}", sibling_id);
        self.sibling_latches.push(latch);
        true
    }

    fn before_split_internal(&mut self, tree_node_id: PageId) {
        assert!(
            self.pessimistic,
            "split of internal node {} in optimistic mode",
            tree_node_id
        );
    }

    fn before_underflow_in_leaf(&mut self, tree_node_id: PageId) {
        assert!(
            self.pessimistic,
            "underflow of leaf {} in optimistic mode",
            tree_node_id
        );
    }

    fn up(&mut self) {
        match self.data_by_depth.pop() {
            Some(data) => data.release(),
            None => panic!("up() above the root"),
        }
    }

    fn reset(&mut self) {
        while let Some(data) = self.data_by_depth.pop() {
            data.release();
        }
        for latch in self.sibling_latches.drain(..) {
            latch.release_write();
            latch.deref();
        }
    }

    fn flip_to_pessimistic_mode(&mut self) {
        debug!(
            "flip to pessimistic mode, reason: {}, held: {:?}",
            self.last_veto.unwrap_or("unknown"),
            self
        );
        self.reset();
        self.pessimistic = true;
        self.pessimistic_flips += 1;
    }

    fn pessimistic(&self) -> bool {
        self.pessimistic
    }

    fn close(&mut self) {
        self.reset();
    }
}

impl Drop for LatchCrabbingCoordination {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for LatchCrabbingCoordination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let path = self
            .data_by_depth
            .iter()
            .map(|d| {
                format!(
                    "{}{}",
                    d.tree_node_id,
                    if d.latch_type_is_write { "w" } else { "r" }
                )
            })
            .join(" -> ");
        let siblings =
            self.sibling_latches.iter().map(|l| l.page_id()).join(", ");
        write!(
            f,
            "LatchCrabbingCoordination[pessimistic: {}, path: [{}], \
             siblings: [{}]]",
            self.pessimistic, path, siblings
        )
    }
}
