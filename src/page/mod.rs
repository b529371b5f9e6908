//! The page layer consumed by the tree core.
//!
//! The tree only ever talks to pages through [`PageCursor`], so the
//! pointer protocol, the node layout and the crash cleaner do not care
//! whether the bytes live in a page cache or in memory.

mod cursor;
mod paged_memory;

pub use cursor::*;
pub use paged_memory::*;

use std::fmt;

/// Physical page id inside a paged file.
pub type PageId = u64;

/// Pointer reference meaning "there is no node here".
///
/// Page 0 holds the store's meta data, so it can never be a tree node.
pub const NO_NODE: PageId = 0;

/// Page references are stored in 6 bytes.
pub const MAX_PAGE_ID: PageId = (1 << 48) - 1;

pub fn is_node(page_id: PageId) -> bool {
    page_id != NO_NODE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagedMode {
    /// Optimistic, lock free reads. Every read must be validated with
    /// [`PageCursor::should_retry`].
    SharedRead,

    /// Exclusive access, the page is locked while the cursor is pinned
    /// to it.
    Exclusive,
}

impl fmt::Display for PagedMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PagedMode::SharedRead => write!(f, "shared_read"),
            PagedMode::Exclusive => write!(f, "exclusive"),
        }
    }
}
