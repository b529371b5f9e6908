//! Tree node header layout and the node formats.
//!
//! ```text
//! 0   node type        1B  tree node / free-list node
//! 1   type             1B  leaf / internal
//! 2   generation       4B
//! 6   key count        4B
//! 10  right sibling    GSPP
//! 34  left sibling     GSPP
//! 58  successor        GSPP
//! 82  format specific keys, values and children
//! ```
//!
//! Only the header and the child pointer positions are defined here,
//! key and value encoding belongs to the formats' owners.

use crate::{
    config::TreeConfig,
    error::{ErrorKind, TreeError},
    generation::Generation,
    page::{PageCursor, PageId, NO_NODE},
    pointer::{
        check_pointer,
        gsp,
        gspp::{self, GsppFailure, ResolvedPointer},
        PointerType,
    },
    types::TreeResult,
};

pub const BYTE_POS_NODE_TYPE: usize = 0;
pub const BYTE_POS_TYPE: usize = 1;
pub const BYTE_POS_GENERATION: usize = 2;
pub const BYTE_POS_KEYCOUNT: usize = 6;
pub const BYTE_POS_RIGHTSIBLING: usize = 10;
pub const BYTE_POS_LEFTSIBLING: usize =
    BYTE_POS_RIGHTSIBLING + SIZE_PAGE_REFERENCE;
pub const BYTE_POS_SUCCESSOR: usize =
    BYTE_POS_LEFTSIBLING + SIZE_PAGE_REFERENCE;
pub const BASE_HEADER_LENGTH: usize = BYTE_POS_SUCCESSOR + SIZE_PAGE_REFERENCE;

pub const SIZE_PAGE_REFERENCE: usize = gspp::SIZE;

pub const NODE_TYPE_TREE_NODE: u8 = 1;
pub const NODE_TYPE_FREELIST_NODE: u8 = 2;

pub const LEAF_FLAG: u8 = 1;
pub const INTERNAL_FLAG: u8 = 0;

pub const FORMAT_IDENTIFIER_FIXED_SIZE: u8 = 2;
pub const FORMAT_IDENTIFIER_DYNAMIC_SIZE: u8 = 3;

// dynamic size: alloc offset (2B) and dead space (2B) follow the base
// header, then an offset array interleaved with child pointers.
const HEADER_LENGTH_DYNAMIC: usize = BASE_HEADER_LENGTH + 2 + 2;
const OFFSET_SIZE: usize = 2;
const KEY_OFFSET_AND_CHILD_SIZE: usize = OFFSET_SIZE + SIZE_PAGE_REFERENCE;
const MIN_SIZE_KEY_VALUE_SIZE: usize = 2;

pub fn go_to<C: PageCursor + ?Sized>(
    cursor: &mut C,
    message: &str,
    node_id: PageId,
) -> TreeResult {
    if node_id == NO_NODE || !cursor.next(node_id)? {
        return Err(TreeError::new(
            ErrorKind::OutOfBounds,
            &format!("could not go to {} node {}", message, node_id),
        ));
    }
    Ok(())
}

pub fn node_type<C: PageCursor + ?Sized>(cursor: &mut C) -> u8 {
    cursor.set_offset(BYTE_POS_NODE_TYPE);
    cursor.get_byte()
}

pub fn is_tree_node<C: PageCursor + ?Sized>(cursor: &mut C) -> bool {
    node_type(cursor) == NODE_TYPE_TREE_NODE
}

pub fn is_leaf<C: PageCursor + ?Sized>(cursor: &mut C) -> bool {
    cursor.set_offset(BYTE_POS_TYPE);
    cursor.get_byte() == LEAF_FLAG
}

pub fn is_internal<C: PageCursor + ?Sized>(cursor: &mut C) -> bool {
    cursor.set_offset(BYTE_POS_TYPE);
    cursor.get_byte() == INTERNAL_FLAG
}

pub fn generation<C: PageCursor + ?Sized>(cursor: &mut C) -> u64 {
    cursor.set_offset(BYTE_POS_GENERATION);
    cursor.get_int() as u64
}

pub fn set_generation<C: PageCursor + ?Sized>(
    cursor: &mut C,
    generation: u64,
) {
    assert!(
        (gsp::MIN_GENERATION..=gsp::MAX_GENERATION).contains(&generation),
        "invalid node generation {}",
        generation
    );
    cursor.set_offset(BYTE_POS_GENERATION);
    cursor.put_int(generation as u32);
}

pub fn key_count<C: PageCursor + ?Sized>(cursor: &mut C) -> usize {
    cursor.set_offset(BYTE_POS_KEYCOUNT);
    cursor.get_int() as usize
}

pub fn set_key_count<C: PageCursor + ?Sized>(cursor: &mut C, count: usize) {
    cursor.set_offset(BYTE_POS_KEYCOUNT);
    cursor.put_int(count as u32);
}

fn read_gspp<C: PageCursor + ?Sized>(
    cursor: &mut C,
    offset: usize,
    generation: Generation,
) -> Result<ResolvedPointer, GsppFailure> {
    cursor.set_offset(offset);
    gspp::read(cursor, generation.stable, generation.unstable)
}

fn write_gspp<C: PageCursor + ?Sized>(
    cursor: &mut C,
    offset: usize,
    pointer_type: PointerType,
    reference: PageId,
    generation: Generation,
) -> TreeResult {
    cursor.set_offset(offset);
    let result = gspp::write(
        cursor,
        reference,
        generation.stable,
        generation.unstable,
    )
    .map(|slot| ResolvedPointer {
        slot,
        generation: generation.unstable,
        reference,
    });
    let node_id = cursor.current_page_id();
    check_pointer(
        result,
        true,
        node_id,
        pointer_type,
        generation,
        cursor,
        offset,
    )?;
    Ok(())
}

pub fn right_sibling<C: PageCursor + ?Sized>(
    cursor: &mut C,
    generation: Generation,
) -> Result<ResolvedPointer, GsppFailure> {
    read_gspp(cursor, BYTE_POS_RIGHTSIBLING, generation)
}

pub fn left_sibling<C: PageCursor + ?Sized>(
    cursor: &mut C,
    generation: Generation,
) -> Result<ResolvedPointer, GsppFailure> {
    read_gspp(cursor, BYTE_POS_LEFTSIBLING, generation)
}

pub fn successor<C: PageCursor + ?Sized>(
    cursor: &mut C,
    generation: Generation,
) -> Result<ResolvedPointer, GsppFailure> {
    read_gspp(cursor, BYTE_POS_SUCCESSOR, generation)
}

pub fn set_right_sibling<C: PageCursor + ?Sized>(
    cursor: &mut C,
    sibling: PageId,
    generation: Generation,
) -> TreeResult {
    write_gspp(
        cursor,
        BYTE_POS_RIGHTSIBLING,
        PointerType::RightSibling,
        sibling,
        generation,
    )
}

pub fn set_left_sibling<C: PageCursor + ?Sized>(
    cursor: &mut C,
    sibling: PageId,
    generation: Generation,
) -> TreeResult {
    write_gspp(
        cursor,
        BYTE_POS_LEFTSIBLING,
        PointerType::LeftSibling,
        sibling,
        generation,
    )
}

pub fn set_successor<C: PageCursor + ?Sized>(
    cursor: &mut C,
    successor: PageId,
    generation: Generation,
) -> TreeResult {
    write_gspp(
        cursor,
        BYTE_POS_SUCCESSOR,
        PointerType::Successor,
        successor,
        generation,
    )
}

/// How keys and children are laid out after the header, selected once
/// from the format identifier stored in the tree's meta data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFormat {
    FixedSize { key_size: usize },
    DynamicSize,
}

impl NodeFormat {
    pub fn from_identifier(
        identifier: u8,
        key_size: usize,
    ) -> TreeResult<Self> {
        match identifier {
            FORMAT_IDENTIFIER_FIXED_SIZE => {
                Ok(NodeFormat::FixedSize { key_size })
            }
            FORMAT_IDENTIFIER_DYNAMIC_SIZE => Ok(NodeFormat::DynamicSize),
            _ => Err(TreeError::new(
                ErrorKind::Config,
                &format!("unknown node format identifier {}", identifier),
            )),
        }
    }

    pub fn identifier(&self) -> u8 {
        match self {
            NodeFormat::FixedSize { .. } => FORMAT_IDENTIFIER_FIXED_SIZE,
            NodeFormat::DynamicSize => FORMAT_IDENTIFIER_DYNAMIC_SIZE,
        }
    }
}

/// A node format bound to a page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    format: NodeFormat,
    page_size: usize,
    internal_max_key_count: usize,
}

impl NodeLayout {
    pub fn new(format: NodeFormat, page_size: usize) -> Self {
        let internal_max_key_count = match format {
            NodeFormat::FixedSize { key_size } => {
                assert!(key_size > 0, "fixed size keys need a positive size");
                let header = BASE_HEADER_LENGTH + SIZE_PAGE_REFERENCE;
                page_size.saturating_sub(header)
                    / (key_size + SIZE_PAGE_REFERENCE)
            }
            NodeFormat::DynamicSize => {
                page_size.saturating_sub(HEADER_LENGTH_DYNAMIC)
                    / (OFFSET_SIZE + MIN_SIZE_KEY_VALUE_SIZE)
            }
        };
        Self {
            format,
            page_size,
            internal_max_key_count,
        }
    }

    /// Layout for the pages of `config`.
    pub fn from_config(format: NodeFormat, config: &TreeConfig) -> Self {
        Self::new(format, config.page_size)
    }

    pub fn format(&self) -> NodeFormat {
        self.format
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn internal_max_key_count(&self) -> usize {
        self.internal_max_key_count
    }

    /// Offset of the child pointer to the left of the key at `pos`.
    pub fn child_offset(&self, pos: usize) -> usize {
        match self.format {
            NodeFormat::FixedSize { key_size } => {
                BASE_HEADER_LENGTH
                    + self.internal_max_key_count * key_size
                    + pos * SIZE_PAGE_REFERENCE
            }
            NodeFormat::DynamicSize => {
                HEADER_LENGTH_DYNAMIC + pos * KEY_OFFSET_AND_CHILD_SIZE
            }
        }
    }

    pub fn reasonable_key_count(&self, key_count: usize) -> bool {
        key_count <= self.internal_max_key_count
    }

    /// Whether a child at `pos` can exist at all in an internal node.
    pub fn reasonable_child_count(&self, pos: usize) -> bool {
        pos <= self.internal_max_key_count
            && self.child_offset(pos) + SIZE_PAGE_REFERENCE <= self.page_size
    }

    pub fn child_at<C: PageCursor + ?Sized>(
        &self,
        cursor: &mut C,
        pos: usize,
        generation: Generation,
    ) -> Result<ResolvedPointer, GsppFailure> {
        read_gspp(cursor, self.child_offset(pos), generation)
    }

    pub fn set_child_at<C: PageCursor + ?Sized>(
        &self,
        cursor: &mut C,
        child: PageId,
        pos: usize,
        generation: Generation,
    ) -> TreeResult {
        assert!(
            self.reasonable_child_count(pos),
            "child position {} out of range",
            pos
        );
        write_gspp(
            cursor,
            self.child_offset(pos),
            PointerType::Child(pos),
            child,
            generation,
        )
    }

    pub fn initialize_leaf<C: PageCursor + ?Sized>(
        &self,
        cursor: &mut C,
        generation: Generation,
    ) -> TreeResult {
        initialize_node(cursor, LEAF_FLAG, generation)
    }

    pub fn initialize_internal<C: PageCursor + ?Sized>(
        &self,
        cursor: &mut C,
        generation: Generation,
    ) -> TreeResult {
        initialize_node(cursor, INTERNAL_FLAG, generation)
    }
}

/// Write a fresh node header. Whatever the page held before, its
/// pointer pairs are wiped first so recycled pages start out empty.
fn initialize_node<C: PageCursor + ?Sized>(
    cursor: &mut C,
    type_flag: u8,
    generation: Generation,
) -> TreeResult {
    cursor.set_offset(BYTE_POS_NODE_TYPE);
    cursor.put_byte(NODE_TYPE_TREE_NODE);
    cursor.put_byte(type_flag);
    set_generation(cursor, generation.unstable);
    set_key_count(cursor, 0);

    let pointers =
        [BYTE_POS_RIGHTSIBLING, BYTE_POS_LEFTSIBLING, BYTE_POS_SUCCESSOR];
    for offset in pointers.iter() {
        cursor.set_offset(*offset);
        gsp::clean(cursor);
        gsp::clean(cursor);
    }

    set_right_sibling(cursor, NO_NODE, generation)?;
    set_left_sibling(cursor, NO_NODE, generation)?;
    set_successor(cursor, NO_NODE, generation)
}
