use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
    thread,
    time::{Duration, Instant},
};

use crossbeam::utils::Backoff;

use crate::page::PageId;

// state word layout:
// bit 31      write locked
// bits 16..30 read lock count
// bit 15      dead
// bits 0..14  reference count
const WRITE_LOCK_MASK: u32 = 0x8000_0000;
const READ_LOCK_MASK: u32 = 0x7FFF_0000;
const DEAD_MASK: u32 = 0x0000_8000;
const REF_COUNT_MASK: u32 = 0x0000_7FFF;
const READ_LOCK_UNIT: u32 = 0x0001_0000;
const REF_COUNT_UNIT: u32 = 0x0000_0001;

pub const MAX_READERS: u32 = READ_LOCK_MASK >> 16;
pub const MAX_REFS: u32 = REF_COUNT_MASK;

pub(crate) type RemoveAction = Box<dyn Fn(&LongSpinLatch) + Send + Sync>;

enum Transition {
    Apply(u32),
    Wait,
    Reject,
}

/// A read/write spin latch guarding one tree node, packed in one word
/// together with a reference count.
///
/// The reference count pins the latch object itself: a latch whose last
/// reference goes away while unlocked turns dead, refuses every further
/// acquisition and hands itself to its remove action so the owning
/// registry can forget it.
pub struct LongSpinLatch {
    page_id: PageId,
    state: AtomicU32,
    spin_threshold: Duration,
    park_timeout: Duration,
    remove_action: Option<RemoveAction>,
}

impl LongSpinLatch {
    pub fn new(
        page_id: PageId,
        spin_threshold: Duration,
        park_timeout: Duration,
    ) -> Self {
        Self {
            page_id,
            state: AtomicU32::new(0),
            spin_threshold,
            park_timeout,
            remove_action: None,
        }
    }

    pub(crate) fn with_remove_action(
        mut self,
        remove_action: RemoveAction,
    ) -> Self {
        self.remove_action = Some(remove_action);
        self
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Take a reference. Returns `false` if the latch is already dead.
    pub fn add_ref(&self) -> bool {
        self.transform(|state| {
            if state & DEAD_MASK != 0 {
                return Transition::Reject;
            }
            assert!(
                state & REF_COUNT_MASK < MAX_REFS,
                "too many references to latch of page {}",
                self.page_id
            );
            Transition::Apply(state + REF_COUNT_UNIT)
        })
    }

    /// Drop a reference. The last reference of an unlocked latch kills
    /// it, otherwise the last unlock does.
    pub fn deref(&self) {
        let mut died = false;
        self.transform(|state| {
            assert!(
                state & REF_COUNT_MASK > 0,
                "deref of unreferenced latch of page {}",
                self.page_id
            );
            let (next, dies) = kill_if_unused(state - REF_COUNT_UNIT);
            died = dies;
            Transition::Apply(next)
        });
        self.removed_if(died);
    }

    /// Block until a read lock is held. Returns `false` if the latch is
    /// dead.
    pub fn acquire_read(&self) -> bool {
        self.spin_transform(|state| {
            if state & DEAD_MASK != 0 {
                return Transition::Reject;
            }
            if state & WRITE_LOCK_MASK != 0 {
                return Transition::Wait;
            }
            assert!(
                read_count(state) < MAX_READERS,
                "too many readers on latch of page {}",
                self.page_id
            );
            Transition::Apply(state + READ_LOCK_UNIT)
        })
    }

    pub fn release_read(&self) {
        let mut died = false;
        self.transform(|state| {
            assert!(
                read_count(state) > 0,
                "release of read lock not held on latch of page {}",
                self.page_id
            );
            let (next, dies) = kill_if_unused(state - READ_LOCK_UNIT);
            died = dies;
            Transition::Apply(next)
        });
        self.removed_if(died);
    }

    /// Block until the write lock is held, i.e. until every reader and
    /// writer is gone. Returns `false` if the latch is dead.
    pub fn acquire_write(&self) -> bool {
        self.spin_transform(|state| {
            if state & DEAD_MASK != 0 {
                return Transition::Reject;
            }
            if state & (WRITE_LOCK_MASK | READ_LOCK_MASK) != 0 {
                return Transition::Wait;
            }
            Transition::Apply(state | WRITE_LOCK_MASK)
        })
    }

    pub fn try_acquire_write(&self) -> bool {
        self.transform(|state| {
            if state & (DEAD_MASK | WRITE_LOCK_MASK | READ_LOCK_MASK) != 0 {
                return Transition::Reject;
            }
            Transition::Apply(state | WRITE_LOCK_MASK)
        })
    }

    /// Turn the caller's read lock into the write lock, succeeding only
    /// if the caller is the sole reader. Two readers trying to upgrade
    /// therefore both fail instead of waiting on each other.
    pub fn try_upgrade_to_write(&self) -> bool {
        self.transform(|state| {
            let blocked = state & (DEAD_MASK | WRITE_LOCK_MASK) != 0;
            if blocked || read_count(state) != 1 {
                return Transition::Reject;
            }
            Transition::Apply((state - READ_LOCK_UNIT) | WRITE_LOCK_MASK)
        })
    }

    pub fn release_write(&self) {
        let mut died = false;
        self.transform(|state| {
            assert!(
                state & WRITE_LOCK_MASK != 0,
                "release of write lock not held on latch of page {}",
                self.page_id
            );
            let (next, dies) = kill_if_unused(state & !WRITE_LOCK_MASK);
            died = dies;
            Transition::Apply(next)
        });
        self.removed_if(died);
    }

    pub fn is_dead(&self) -> bool {
        self.state.load(Ordering::Acquire) & DEAD_MASK != 0
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) & WRITE_LOCK_MASK != 0
    }

    pub fn read_count(&self) -> u32 {
        read_count(self.state.load(Ordering::Acquire))
    }

    pub fn ref_count(&self) -> u32 {
        self.state.load(Ordering::Acquire) & REF_COUNT_MASK
    }

    fn removed_if(&self, died: bool) {
        if !died {
            return;
        }
        if let Some(remove_action) = &self.remove_action {
            remove_action(self);
        }
    }

    /// Apply a transition that never waits, retrying only when the CAS
    /// loses against a concurrent change.
    fn transform<F>(&self, mut f: F) -> bool
    where
        F: FnMut(u32) -> Transition,
    {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            let next = match f(state) {
                Transition::Apply(next) => next,
                Transition::Wait | Transition::Reject => return false,
            };
            match self.state.compare_exchange_weak(
                state,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    /// Apply a transition, spinning while it has to wait. After the spin
    /// threshold the thread parks for short periods instead, rechecking
    /// on every wake up.
    fn spin_transform<F>(&self, mut f: F) -> bool
    where
        F: FnMut(u32) -> Transition,
    {
        let backoff = Backoff::new();
        let mut spin_start: Option<Instant> = None;
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            match f(state) {
                Transition::Reject => return false,
                Transition::Apply(next) => {
                    match self.state.compare_exchange_weak(
                        state,
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(actual) => state = actual,
                    }
                }
                Transition::Wait => {
                    let start = *spin_start.get_or_insert_with(Instant::now);
                    if start.elapsed() < self.spin_threshold {
                        backoff.spin();
                    } else {
                        thread::park_timeout(self.park_timeout);
                    }
                    state = self.state.load(Ordering::Acquire);
                }
            }
        }
    }
}

/// Mark `state` dead if nobody references or locks the latch any
/// more.
fn kill_if_unused(state: u32) -> (u32, bool) {
    let in_use = REF_COUNT_MASK | READ_LOCK_MASK | WRITE_LOCK_MASK;
    if state & in_use == 0 {
        (state | DEAD_MASK, true)
    } else {
        (state, false)
    }
}

fn read_count(state: u32) -> u32 {
    (state & READ_LOCK_MASK) >> 16
}

impl fmt::Debug for LongSpinLatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.load(Ordering::Acquire);
        write!(
            f,
            "LongSpinLatch[page: {}, w: {}, r: {}, refs: {}, dead: {}]",
            self.page_id,
            state & WRITE_LOCK_MASK != 0,
            read_count(state),
            state & REF_COUNT_MASK,
            state & DEAD_MASK != 0
        )
    }
}
