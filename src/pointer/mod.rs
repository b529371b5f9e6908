//! Generation aware pointers.
//!
//! Every pointer in the tree (children, siblings, successor) is a
//! [`gspp`] pair of [`gsp`] slots, which lets a single writer update it
//! while lock free readers keep resolving a consistent value.

pub mod checking;
pub mod gsp;
pub mod gspp;

pub use checking::{check_pointer, PointerType};
pub use gspp::{GsppFailure, PointerState, ResolvedPointer, Slot};
