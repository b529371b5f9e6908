use std::{
    ptr,
    sync::{Arc, Weak},
    time::Duration,
};

use log::debug;

use super::spin_latch::LongSpinLatch;
use crate::{config::TreeConfig, page::PageId, types::ConcurrentHashMap};

type LatchMap = ConcurrentHashMap<PageId, Arc<LongSpinLatch>>;

/// Hands out one latch per tree node id.
///
/// Latches only live while referenced: `latch` returns a referenced
/// latch, and the holder's final `deref` on an unlocked latch evicts it
/// from the registry. A later `latch` for the same id creates a fresh
/// one.
pub struct LatchService {
    latches: Arc<LatchMap>,
    spin_threshold: Duration,
    park_timeout: Duration,
}

impl LatchService {
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            latches: Arc::new(ConcurrentHashMap::new()),
            spin_threshold: config.spin_threshold,
            park_timeout: config.park_timeout,
        }
    }

    /// Get the latch of `tree_node_id` with one reference taken for the
    /// caller, who must `deref` it when done.
    pub fn latch(&self, tree_node_id: PageId) -> Arc<LongSpinLatch> {
        loop {
            let latch = self
                .latches
                .get_or_insert_with(&tree_node_id, |id| self.new_latch(*id));
            if latch.add_ref() {
                return latch;
            }

            // lost against the final deref of the previous holder, the
            // dead latch is gone from the map once its remove action ran
            debug!("latch of node {} died, retrying", tree_node_id);
            self.latches
                .remove_if(&tree_node_id, |v| Arc::ptr_eq(v, &latch));
        }
    }

    /// Number of latches currently registered.
    pub fn latch_count(&self) -> usize {
        self.latches.len()
    }

    fn new_latch(&self, tree_node_id: PageId) -> Arc<LongSpinLatch> {
        let registry: Weak<LatchMap> = Arc::downgrade(&self.latches);
        let remove_action = Box::new(move |latch: &LongSpinLatch| {
            if let Some(latches) = registry.upgrade() {
                latches.remove_if(&latch.page_id(), |v| {
                    ptr::eq(Arc::as_ptr(v), latch)
                });
            }
        });
        let latch = LongSpinLatch::new(
            tree_node_id,
            self.spin_threshold,
            self.park_timeout,
        );
        Arc::new(latch.with_remove_action(remove_action))
    }
}

impl Default for LatchService {
    fn default() -> Self {
        Self::new(&TreeConfig::default())
    }
}
