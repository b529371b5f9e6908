use std::fmt;

use crate::page::{PageId, NO_NODE};

/// How a key handed to the parent level is applied there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyReplaceStrategy {
    /// The key exists in the parent, overwrite it.
    Replace,

    /// The child sits at position 0 of its parent, there is no key to
    /// replace at this level so it travels further up.
    Bubble,
}

/// Structural changes of one tree level that the level above has to
/// apply. Filled by a split, merge, rebalance or successor creation and
/// cleared once the parent consumed it.
#[derive(Clone, PartialEq, Eq)]
pub struct StructurePropagation<K> {
    pub has_left_child_update: bool,
    pub has_mid_child_update: bool,
    pub has_right_child_update: bool,
    pub left_child: PageId,
    pub mid_child: PageId,
    pub right_child: PageId,

    pub has_left_key_replace: bool,
    pub has_right_key_replace: bool,
    pub has_right_key_insert: bool,
    pub left_key: Option<K>,
    pub right_key: Option<K>,
    pub bubble_key: Option<K>,
    pub key_replace_strategy: KeyReplaceStrategy,
}

/// Which child slot of the parent receives a successor id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureUpdate {
    LeftChild,
    MidChild,
    RightChild,
}

impl<K> StructurePropagation<K> {
    pub fn new() -> Self {
        Self {
            has_left_child_update: false,
            has_mid_child_update: false,
            has_right_child_update: false,
            left_child: NO_NODE,
            mid_child: NO_NODE,
            right_child: NO_NODE,
            has_left_key_replace: false,
            has_right_key_replace: false,
            has_right_key_insert: false,
            left_key: None,
            right_key: None,
            bubble_key: None,
            key_replace_strategy: KeyReplaceStrategy::Replace,
        }
    }

    pub fn clear(&mut self) {
        self.has_left_child_update = false;
        self.has_mid_child_update = false;
        self.has_right_child_update = false;
        self.has_left_key_replace = false;
        self.has_right_key_replace = false;
        self.has_right_key_insert = false;
        self.left_key = None;
        self.right_key = None;
        self.bubble_key = None;
        self.key_replace_strategy = KeyReplaceStrategy::Replace;
    }

    /// Whether the parent level has anything left to do.
    pub fn has_pending_changes(&self) -> bool {
        self.has_left_child_update
            || self.has_mid_child_update
            || self.has_right_child_update
            || self.has_left_key_replace
            || self.has_right_key_replace
            || self.has_right_key_insert
            || self.bubble_key.is_some()
    }

    /// Record that a child got a new id, e.g. because a successor was
    /// created for it.
    pub fn update(&mut self, target: StructureUpdate, child: PageId) {
        match target {
            StructureUpdate::LeftChild => {
                self.has_left_child_update = true;
                self.left_child = child;
            }
            StructureUpdate::MidChild => {
                self.has_mid_child_update = true;
                self.mid_child = child;
            }
            StructureUpdate::RightChild => {
                self.has_right_child_update = true;
                self.right_child = child;
            }
        }
    }

    /// A split of `mid_child` produced `right_child` with `right_key` as
    /// separator, which must be inserted in the parent.
    pub fn split(
        &mut self,
        mid_child: PageId,
        right_child: PageId,
        right_key: K,
    ) {
        self.has_right_key_insert = true;
        self.mid_child = mid_child;
        self.right_child = right_child;
        self.right_key = Some(right_key);
    }

    pub fn replace_left_key(&mut self, key: K, strategy: KeyReplaceStrategy) {
        self.has_left_key_replace = true;
        self.left_key = Some(key);
        self.key_replace_strategy = strategy;
    }

    pub fn replace_right_key(&mut self, key: K, strategy: KeyReplaceStrategy) {
        self.has_right_key_replace = true;
        self.right_key = Some(key);
        self.key_replace_strategy = strategy;
    }

    /// Key removed from this level during a merge that has to be
    /// written into an ancestor.
    pub fn bubble(&mut self, key: K) {
        self.bubble_key = Some(key);
    }

    /// Hand the bubbled key to the ancestor that absorbs it.
    pub fn take_bubble_key(&mut self) -> Option<K> {
        self.bubble_key.take()
    }

    pub fn take_child_update(
        &mut self,
        target: StructureUpdate,
    ) -> Option<PageId> {
        let (pending, child) = match target {
            StructureUpdate::LeftChild => {
                (&mut self.has_left_child_update, self.left_child)
            }
            StructureUpdate::MidChild => {
                (&mut self.has_mid_child_update, self.mid_child)
            }
            StructureUpdate::RightChild => {
                (&mut self.has_right_child_update, self.right_child)
            }
        };
        if !*pending {
            return None;
        }
        *pending = false;
        Some(child)
    }

    /// Take the separator key and new right child of a split.
    pub fn take_right_key_insert(&mut self) -> Option<(K, PageId)> {
        if !self.has_right_key_insert {
            return None;
        }
        self.has_right_key_insert = false;
        let right_child = self.right_child;
        self.right_key.take().map(|key| (key, right_child))
    }

    /// Take a pending key replace at a parent level where the changed
    /// child sits at `child_pos`.
    ///
    /// A bubbling key can't be applied at position 0, there is no key
    /// to its left at this level, so it stays pending for the next
    /// level up and `None` is returned.
    pub fn take_key_replace(
        &mut self,
        right: bool,
        child_pos: usize,
    ) -> Option<K> {
        let bubbling = self.key_replace_strategy == KeyReplaceStrategy::Bubble;
        if bubbling && child_pos == 0 {
            return None;
        }

        if right && self.has_right_key_replace {
            self.has_right_key_replace = false;
            self.right_key.take()
        } else if !right && self.has_left_key_replace {
            self.has_left_key_replace = false;
            self.left_key.take()
        } else {
            None
        }
    }
}

impl<K> Default for StructurePropagation<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug> fmt::Debug for StructurePropagation<K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut depiction = "StructurePropagation {".to_string();
        if self.has_left_child_update {
            depiction.push_str(&format!(" left_child: {},", self.left_child));
        }
        if self.has_mid_child_update {
            depiction.push_str(&format!(" mid_child: {},", self.mid_child));
        }
        if self.has_right_child_update {
            depiction
                .push_str(&format!(" right_child: {},", self.right_child));
        }
        if self.has_right_key_insert {
            depiction.push_str(&format!(" insert: {:?},", self.right_key));
        }
        if self.has_left_key_replace {
            depiction.push_str(&format!(" left_key: {:?},", self.left_key));
        }
        if self.has_right_key_replace {
            depiction.push_str(&format!(" right_key: {:?},", self.right_key));
        }
        if let Some(key) = &self.bubble_key {
            depiction.push_str(&format!(" bubble_key: {:?},", key));
        }
        depiction.push_str(&format!(
            " strategy: {:?} }}",
            self.key_replace_strategy
        ));
        write!(f, "{}", depiction)
    }
}
