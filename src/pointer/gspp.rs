//! Generation safe pointer pair, two [`gsp`] slots per logical pointer.
//!
//! A writer never overwrites the only slot a reader could fall back to.
//! Which slot is authoritative follows from the state of both slots
//! relative to the current stable/unstable generations:
//!
//! | A \ B      | STABLE        | UNSTABLE | CRASH | BROKEN | EMPTY |
//! |------------|---------------|----------|-------|--------|-------|
//! | STABLE     | higher gen    | B        | A     | A      | A     |
//! | UNSTABLE   | A             | fail     | fail  | fail   | A     |
//! | CRASH      | B             | fail     | fail  | fail   | fail  |
//! | BROKEN     | B             | fail     | fail  | fail   | fail  |
//! | EMPTY      | B             | B        | fail  | fail   | fail  |
//!
//! Writes always stamp the unstable generation and go to:
//!
//! | A \ B      | STABLE        | UNSTABLE | CRASH | BROKEN | EMPTY |
//! |------------|---------------|----------|-------|--------|-------|
//! | STABLE     | lower gen     | B        | B     | B      | B     |
//! | UNSTABLE   | A             | fail     | fail  | fail   | A     |
//! | CRASH      | A             | fail     | fail  | fail   | fail  |
//! | BROKEN     | A             | fail     | fail  | fail   | fail  |
//! | EMPTY      | A             | B        | fail  | fail   | A     |

use std::fmt;

use super::gsp;
use crate::{
    error::{ErrorKind, TreeError},
    page::{PageCursor, PageId},
};

pub const SIZE: usize = gsp::SIZE * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerState {
    /// Written in a generation made durable by a checkpoint.
    Stable,

    /// Written in the current generation.
    Unstable,

    /// Written as unstable by a previous run which crashed before its
    /// next checkpoint.
    Crash,

    /// Checksum mismatch or impossible generation.
    Broken,

    /// Never written.
    Empty,
}

impl fmt::Display for PointerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PointerState::Stable => "STABLE",
            PointerState::Unstable => "UNSTABLE",
            PointerState::Crash => "CRASH",
            PointerState::Broken => "BROKEN",
            PointerState::Empty => "EMPTY",
        };
        write!(f, "{}", name)
    }
}

/// Classify one slot. A generation newer than the unstable generation
/// can only come from a crashed run as well, so it is reported as
/// [`PointerState::Crash`].
pub fn pointer_state(
    stable_generation: u64,
    unstable_generation: u64,
    generation: u64,
    reference: PageId,
    checksum_is_correct: bool,
) -> PointerState {
    if gsp::is_empty(generation, reference) {
        return PointerState::Empty;
    }
    if !checksum_is_correct || generation < gsp::MIN_GENERATION {
        return PointerState::Broken;
    }
    if generation <= stable_generation {
        return PointerState::Stable;
    }
    if generation == unstable_generation {
        return PointerState::Unstable;
    }
    PointerState::Crash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// Offset of this slot relative to the start of the pair.
    pub fn offset(&self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => gsp::SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPointer {
    pub slot: Slot,
    pub generation: u64,
    pub reference: PageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationComparison {
    ABig,
    Equal,
    BBig,
}

impl GenerationComparison {
    fn of(generation_a: u64, generation_b: u64) -> Self {
        if generation_a > generation_b {
            GenerationComparison::ABig
        } else if generation_a < generation_b {
            GenerationComparison::BBig
        } else {
            GenerationComparison::Equal
        }
    }
}

impl fmt::Display for GenerationComparison {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GenerationComparison::ABig => write!(f, "A > B"),
            GenerationComparison::Equal => write!(f, "A == B"),
            GenerationComparison::BBig => write!(f, "A < B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// An undecidable combination of slot states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsppFailure {
    pub access: Access,
    pub state_a: PointerState,
    pub state_b: PointerState,
    pub generation_a: u64,
    pub generation_b: u64,
}

impl GsppFailure {
    pub fn comparison(&self) -> GenerationComparison {
        GenerationComparison::of(self.generation_a, self.generation_b)
    }
}

impl fmt::Display for GsppFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GSPP {} failure\n\
             \tPointer state A: {} (generation {})\n\
             \tPointer state B: {} (generation {})\n\
             \tPointer generation A vs B: {}",
            match self.access {
                Access::Read => "READ",
                Access::Write => "WRITE",
            },
            self.state_a,
            self.generation_a,
            self.state_b,
            self.generation_b,
            self.comparison()
        )
    }
}

impl From<GsppFailure> for TreeError {
    fn from(failure: GsppFailure) -> Self {
        let kind = match failure.access {
            Access::Read => ErrorKind::PointerRead,
            Access::Write => ErrorKind::PointerWrite,
        };
        TreeError::new(kind, &failure.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotContent {
    generation: u64,
    reference: PageId,
    state: PointerState,
}

fn read_slot<C: PageCursor + ?Sized>(
    cursor: &mut C,
    stable_generation: u64,
    unstable_generation: u64,
) -> SlotContent {
    let generation = gsp::read_generation(cursor);
    let reference = gsp::read_reference(cursor);
    let checksum_is_correct =
        gsp::verify_checksum(cursor, generation, reference);
    SlotContent {
        generation,
        reference,
        state: pointer_state(
            stable_generation,
            unstable_generation,
            generation,
            reference,
            checksum_is_correct,
        ),
    }
}

fn read_slots<C: PageCursor + ?Sized>(
    cursor: &mut C,
    stable_generation: u64,
    unstable_generation: u64,
) -> (SlotContent, SlotContent) {
    let a = read_slot(cursor, stable_generation, unstable_generation);
    let b = read_slot(cursor, stable_generation, unstable_generation);
    (a, b)
}

/// States of both slots of the pair at the cursor's offset. Leaves the
/// cursor after the pair.
pub fn pointer_states<C: PageCursor + ?Sized>(
    cursor: &mut C,
    stable_generation: u64,
    unstable_generation: u64,
) -> (PointerState, PointerState) {
    let (a, b) = read_slots(cursor, stable_generation, unstable_generation);
    (a.state, b.state)
}

/// Read the authoritative pointer of the pair at the cursor's offset.
///
/// Safe to call under an optimistic cursor, the result is only
/// meaningful once `should_retry` returned `false`. Leaves the cursor
/// after the pair.
pub fn read<C: PageCursor + ?Sized>(
    cursor: &mut C,
    stable_generation: u64,
    unstable_generation: u64,
) -> Result<ResolvedPointer, GsppFailure> {
    let (a, b) = read_slots(cursor, stable_generation, unstable_generation);

    match resolve_read(&a, &b) {
        Some(slot) => {
            let content = match slot {
                Slot::A => a,
                Slot::B => b,
            };
            Ok(ResolvedPointer {
                slot,
                generation: content.generation,
                reference: content.reference,
            })
        }
        None => Err(failure(Access::Read, &a, &b)),
    }
}

fn resolve_read(a: &SlotContent, b: &SlotContent) -> Option<Slot> {
    use PointerState::*;

    match (a.state, b.state) {
        (Unstable, Stable) | (Unstable, Empty) => Some(Slot::A),
        (Stable, Unstable) | (Empty, Unstable) => Some(Slot::B),
        (Stable, Stable) => {
            match GenerationComparison::of(a.generation, b.generation) {
                GenerationComparison::ABig => Some(Slot::A),
                GenerationComparison::BBig => Some(Slot::B),
                GenerationComparison::Equal => None,
            }
        }
        (Stable, Crash) | (Stable, Broken) | (Stable, Empty) => Some(Slot::A),
        (Crash, Stable) | (Broken, Stable) | (Empty, Stable) => Some(Slot::B),
        _ => None,
    }
}

/// Write `reference` stamped with the unstable generation into the slot
/// of the pair at the cursor's offset that readers don't depend on.
///
/// Requires an exclusive cursor. Leaves the cursor after the written
/// slot.
pub fn write<C: PageCursor + ?Sized>(
    cursor: &mut C,
    reference: PageId,
    stable_generation: u64,
    unstable_generation: u64,
) -> Result<Slot, GsppFailure> {
    let offset = cursor.offset();
    let (a, b) = read_slots(cursor, stable_generation, unstable_generation);

    let slot = match resolve_write(&a, &b) {
        Some(slot) => slot,
        None => {
            cursor.set_offset(offset);
            return Err(failure(Access::Write, &a, &b));
        }
    };

    cursor.set_offset(offset + slot.offset());
    gsp::write(cursor, unstable_generation, reference);
    Ok(slot)
}

fn resolve_write(a: &SlotContent, b: &SlotContent) -> Option<Slot> {
    use PointerState::*;

    match (a.state, b.state) {
        // keep the newest stable pointer as fallback
        (Stable, Stable) => {
            match GenerationComparison::of(a.generation, b.generation) {
                GenerationComparison::ABig => Some(Slot::B),
                GenerationComparison::BBig => Some(Slot::A),
                GenerationComparison::Equal => None,
            }
        }
        (Stable, _) => Some(Slot::B),
        (_, Stable) => Some(Slot::A),
        // keep updating this generation's slot
        (Unstable, Empty) => Some(Slot::A),
        (Empty, Unstable) => Some(Slot::B),
        (Empty, Empty) => Some(Slot::A),
        _ => None,
    }
}

fn failure(access: Access, a: &SlotContent, b: &SlotContent) -> GsppFailure {
    GsppFailure {
        access,
        state_a: a.state,
        state_b: b.state,
        generation_a: a.generation,
        generation_b: b.generation,
    }
}
