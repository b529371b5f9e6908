use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use log::info;

use crate::pointer::gsp::{MAX_GENERATION, MIN_GENERATION};

/// A consistent snapshot of the two generation numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    pub stable: u64,
    pub unstable: u64,
}

impl Generation {
    pub fn new(stable: u64, unstable: u64) -> Self {
        assert!(
            unstable > stable,
            "unstable generation {} must be greater than stable generation {}",
            unstable,
            stable
        );
        assert!(
            unstable <= MAX_GENERATION,
            "unstable generation {} out of range",
            unstable
        );
        Self { stable, unstable }
    }

    /// Whether there is at least one generation strictly between stable
    /// and unstable, i.e. whether crash pointers are detectable.
    pub fn has_crash_zone(&self) -> bool {
        self.unstable - self.stable > 1
    }

    fn pack(&self) -> u64 {
        (self.stable << 32) | self.unstable
    }

    fn unpack(packed: u64) -> Self {
        Self {
            stable: packed >> 32,
            unstable: packed & 0xFFFF_FFFF,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[stable: {}, unstable: {}]", self.stable, self.unstable)
    }
}

/// Process-wide generation pair of one tree.
///
/// Both numbers live in one word so that readers always see a pair
/// that was current at some instant.
pub struct GenerationEpoch {
    packed: AtomicU64,
}

impl GenerationEpoch {
    pub fn new(stable: u64, unstable: u64) -> Self {
        Self {
            packed: AtomicU64::new(Generation::new(stable, unstable).pack()),
        }
    }

    /// Epoch of a brand new store.
    pub fn first() -> Self {
        Self::new(MIN_GENERATION, MIN_GENERATION + 1)
    }

    /// Epoch to run with after opening a store whose last persisted
    /// pair was `(stable, unstable)`.
    ///
    /// The unstable generation is bumped so that whatever the previous
    /// run wrote as unstable and never checkpointed ends up strictly
    /// between stable and unstable, where it is recognized as crashed.
    pub fn after_restart(stable: u64, unstable: u64) -> Self {
        let epoch = Self::new(stable, unstable + 1);
        info!(
            "opened with generation {}, persisted unstable generation was {}",
            epoch.current(),
            unstable
        );
        epoch
    }

    pub fn current(&self) -> Generation {
        Generation::unpack(self.packed.load(Ordering::Acquire))
    }

    pub fn stable(&self) -> u64 {
        self.current().stable
    }

    pub fn unstable(&self) -> u64 {
        self.current().unstable
    }

    /// Make the unstable generation stable and start a new unstable one.
    ///
    /// Only the checkpointing thread advances the epoch.
    pub fn checkpoint(&self) -> Generation {
        let current = self.current();
        let next = Generation::new(current.unstable, current.unstable + 1);
        self.packed.store(next.pack(), Ordering::Release);
        info!("checkpoint advanced generation {} -> {}", current, next);
        next
    }
}

impl fmt::Debug for GenerationEpoch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GenerationEpoch{}", self.current())
    }
}
