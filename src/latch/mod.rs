//! Per node latches for concurrent tree writers.

mod latch_service;
mod spin_latch;

pub use latch_service::LatchService;
pub use spin_latch::{LongSpinLatch, MAX_READERS, MAX_REFS};
