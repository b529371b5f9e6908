pub mod btree;
pub mod config;
pub mod error;
pub mod generation;
pub mod latch;
pub mod page;
pub mod pointer;
pub mod types;
pub mod utils;

mod log;

pub use btree::{
    cleaner::{
        CleanupCounters, CleanupMonitor, CleanupStats, CrashGenerationCleaner,
        WorkerPool,
    },
    coordination::{
        LatchCrabbingCoordination, NoCoordination, TreeWriterCoordination,
    },
    node::{NodeFormat, NodeLayout},
    structure_propagation::{KeyReplaceStrategy, StructurePropagation},
};
pub use config::TreeConfig;
pub use error::{ErrorKind, TreeError};
pub use generation::{Generation, GenerationEpoch};
pub use latch::{LatchService, LongSpinLatch};
pub use page::{PageCursor, PageId, PagedFile, PagedMemory, PagedMode, NO_NODE};
pub use types::TreeResult;
pub use utils::init_log;
