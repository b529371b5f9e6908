use std::fmt;

use log::error;

use super::gspp::{self, GsppFailure, ResolvedPointer};
use crate::{
    error::TreeError,
    generation::Generation,
    page::{PageCursor, PageId, NO_NODE},
    types::TreeResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerType {
    Child(usize),
    LeftSibling,
    RightSibling,
    Successor,
}

impl fmt::Display for PointerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PointerType::Child(pos) => write!(f, "child({})", pos),
            PointerType::LeftSibling => write!(f, "left sibling"),
            PointerType::RightSibling => write!(f, "right sibling"),
            PointerType::Successor => write!(f, "successor"),
        }
    }
}

/// Turn the outcome of a pointer read into a page id, or into a tree
/// inconsistency error describing the node and both slots.
///
/// `cursor` must still be pinned to `node_id`, the raw pair at
/// `gspp_offset` is dumped into the error.
pub fn check_pointer<C: PageCursor + ?Sized>(
    result: Result<ResolvedPointer, GsppFailure>,
    allow_no_node: bool,
    node_id: PageId,
    pointer_type: PointerType,
    generation: Generation,
    cursor: &mut C,
    gspp_offset: usize,
) -> TreeResult<PageId> {
    let reason = match result {
        Ok(pointer) if allow_no_node || pointer.reference != NO_NODE => {
            return Ok(pointer.reference);
        }
        Ok(_) => "Pointer to no node not allowed".to_string(),
        Err(failure) => failure.to_string(),
    };

    cursor.set_offset(gspp_offset);
    let raw = cursor.get_bytes(gspp::SIZE);
    let err = TreeError::inconsistency(&format!(
        "{}\n\tnode: {}, pointer: {}, generation: {}\n\traw pair: {}",
        reason,
        node_id,
        pointer_type,
        generation,
        hex::encode(&raw)
    ));
    error!("{}", err);
    Err(err)
}
