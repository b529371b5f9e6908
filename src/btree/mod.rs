//! Tree level pieces built on top of the pointer protocol: the node
//! header, what a change hands up to the parent level, writer
//! coordination and the crash generation cleaner.

pub mod cleaner;
pub mod coordination;
pub mod node;
pub mod structure_propagation;
