use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use once_cell::sync::Lazy;

use crate::{
    btree::node::BASE_HEADER_LENGTH,
    error::{ErrorKind, TreeError},
    types::TreeResult,
};

pub const DEFAULT_PAGE_SIZE: usize = 8192;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// Number of operations between two forced restarts from the root.
pub const DEFAULT_RESET_FREQUENCY: usize = 20;

pub const MIN_CLEANER_BATCH: u64 = 10;
pub const MAX_CLEANER_BATCH: u64 = 100;

static AVAILABLE_PARALLELISM: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
});

pub fn set_page_size(page_size: usize) {
    PAGE_SIZE.store(page_size, Ordering::Relaxed);
}

pub fn get_page_size() -> usize {
    PAGE_SIZE.load(Ordering::Relaxed)
}

pub fn available_parallelism() -> usize {
    *AVAILABLE_PARALLELISM
}

/// Tuning knobs of the tree core. None of them affect correctness,
/// only how long latches spin and how work is split.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    pub page_size: usize,

    /// Writers restart from the root every `reset_frequency`
    /// operations.
    pub reset_frequency: usize,

    /// How long a latch spins before it starts parking.
    pub spin_threshold: Duration,
    pub park_timeout: Duration,

    pub min_cleaner_batch: u64,
    pub max_cleaner_batch: u64,
    pub cleaner_threads: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: get_page_size(),
            reset_frequency: DEFAULT_RESET_FREQUENCY,
            spin_threshold: Duration::from_micros(100),
            park_timeout: Duration::from_micros(10),
            min_cleaner_batch: MIN_CLEANER_BATCH,
            max_cleaner_batch: MAX_CLEANER_BATCH,
            cleaner_threads: available_parallelism(),
        }
    }
}

impl TreeConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_reset_frequency(mut self, reset_frequency: usize) -> Self {
        self.reset_frequency = reset_frequency;
        self
    }

    pub fn with_spin_threshold(mut self, spin_threshold: Duration) -> Self {
        self.spin_threshold = spin_threshold;
        self
    }

    pub fn with_park_timeout(mut self, park_timeout: Duration) -> Self {
        self.park_timeout = park_timeout;
        self
    }

    pub fn with_cleaner_batch(mut self, min: u64, max: u64) -> Self {
        self.min_cleaner_batch = min;
        self.max_cleaner_batch = max;
        self
    }

    pub fn with_cleaner_threads(mut self, threads: usize) -> Self {
        self.cleaner_threads = threads;
        self
    }

    pub fn validate(&self) -> TreeResult {
        if self.reset_frequency == 0 {
            return Err(TreeError::new(
                ErrorKind::Config,
                "reset frequency must be positive",
            ));
        }
        if self.min_cleaner_batch == 0
            || self.min_cleaner_batch > self.max_cleaner_batch
        {
            return Err(TreeError::new(
                ErrorKind::Config,
                &format!(
                    "invalid cleaner batch range [{}, {}]",
                    self.min_cleaner_batch, self.max_cleaner_batch
                ),
            ));
        }
        if self.cleaner_threads == 0 {
            return Err(TreeError::new(
                ErrorKind::Config,
                "cleaner needs at least one thread",
            ));
        }
        if self.page_size <= BASE_HEADER_LENGTH {
            return Err(TreeError::new(
                ErrorKind::Config,
                &format!(
                    "page size {} can not hold a node header of {} bytes",
                    self.page_size, BASE_HEADER_LENGTH
                ),
            ));
        }
        Ok(())
    }
}
