mod test_utils;

use std::sync::Arc;

use gentree::{
    page::{PageId, PagedMemory},
    Generation, GenerationEpoch, LatchCrabbingCoordination, LatchService, NoCoordination,
    TreeConfig, TreeWriterCoordination,
};
use rand::prelude::*;
use test_utils::{descend, new_internal, new_leaf, new_paged_memory, run_operation};

const ROOT: PageId = 1;
const LEAF_UNDERFLOW_THRESHOLD: usize = 500;

/// ```text
///        [1]
///      /  |  \
///   [2]  [3]  [4]
/// ```
///
/// Everything written in the current unstable generation.
fn small_tree() -> (PagedMemory, Generation) {
    let file = new_paged_memory(8);
    let generation = Generation::new(4, 5);
    for leaf in 2..=4 {
        new_leaf(&file, leaf, generation);
    }
    new_internal(&file, ROOT, &[2, 3, 4], generation);
    (file, generation)
}

fn coordination(service: &Arc<LatchService>) -> LatchCrabbingCoordination {
    coordination_with(service, &TreeConfig::default())
}

fn coordination_with(service: &Arc<LatchService>, config: &TreeConfig) -> LatchCrabbingCoordination {
    let mut coordination =
        LatchCrabbingCoordination::new(Arc::clone(service), LEAF_UNDERFLOW_THRESHOLD, config);
    coordination.initialize();
    coordination
}

fn new_service() -> Arc<LatchService> {
    Arc::new(LatchService::new(&TreeConfig::default()))
}

#[test]
fn test_leaf_split_stays_optimistic() {
    test_utils::setup();
    let (file, generation) = small_tree();
    let service = new_service();
    let mut coordination = coordination(&service);

    let leaf = run_operation(&file, &mut coordination, ROOT, &[1], generation, |c, _| {
        c.before_splitting_leaf(40)
    })
    .unwrap();

    assert_eq!(leaf, 3);
    assert_eq!(coordination.pessimistic_flips(), 0);
    assert!(!coordination.pessimistic());
    assert_eq!(coordination.held_latches(), 2);
    assert!(format!("{:?}", coordination).contains("1w -> 3w"));

    coordination.reset();
    assert_eq!(coordination.held_latches(), 0);
    assert_eq!(service.latch_count(), 0);
}

#[test]
fn test_leaf_underflow_goes_pessimistic() {
    test_utils::setup();
    let (file, generation) = small_tree();
    let service = new_service();
    let mut coordination = coordination(&service);

    let mut attempts = 0;
    run_operation(&file, &mut coordination, ROOT, &[2], generation, |c, leaf| {
        attempts += 1;
        if !c.before_removal_from_leaf(10) {
            return false;
        }
        c.before_underflow_in_leaf(leaf);
        true
    })
    .unwrap();

    assert_eq!(attempts, 2);
    assert_eq!(coordination.pessimistic_flips(), 1);
    assert!(coordination.pessimistic());
    assert!(format!("{:?}", coordination).contains("1w -> 4w"));

    coordination.close();
    assert_eq!(service.latch_count(), 0);
}

#[test]
fn test_removal_without_underflow_stays_optimistic() {
    test_utils::setup();
    let (file, generation) = small_tree();
    let service = new_service();
    let config = TreeConfig::default();
    // every leaf of the small tree is nearly empty, so raise the bar
    let mut coordination = LatchCrabbingCoordination::new(Arc::clone(&service), 10_000, &config);

    run_operation(&file, &mut coordination, ROOT, &[0], generation, |c, _| {
        c.before_removal_from_leaf(10)
    })
    .unwrap();
    assert_eq!(coordination.pessimistic_flips(), 0);
    // only the leaf got upgraded
    assert!(format!("{:?}", coordination).contains("1r -> 2w"));
}

#[test]
fn test_split_overflowing_parent_goes_pessimistic() {
    test_utils::setup();
    let file = new_paged_memory(64);
    let generation = Generation::new(4, 5);
    let layout = test_utils::fixed_layout();
    let children: Vec<PageId> = (2..2 + layout.internal_max_key_count() as PageId + 1).collect();
    for leaf in children.iter() {
        new_leaf(&file, *leaf, generation);
    }
    new_internal(&file, ROOT, &children, generation);

    let service = new_service();
    let mut coordination = coordination(&service);
    run_operation(&file, &mut coordination, ROOT, &[5], generation, |c, leaf| {
        if !c.before_splitting_leaf(40) {
            return false;
        }
        c.before_split_internal(ROOT);
        assert_eq!(leaf, 7);
        true
    })
    .unwrap();
    assert_eq!(coordination.pessimistic_flips(), 1);
    coordination.reset();
    assert_eq!(service.latch_count(), 0);
}

/// Stable leaves under an unstable root: a change to a leaf creates a
/// successor, which is fine optimistically only away from the edges of
/// the parent.
#[test]
fn test_successor_needs_unstable_parent_and_inner_position() {
    test_utils::setup();
    let file = new_paged_memory(8);
    let epoch = GenerationEpoch::new(4, 5);
    for leaf in 2..=4 {
        new_leaf(&file, leaf, epoch.current());
    }
    epoch.checkpoint();
    let generation = epoch.current();
    new_internal(&file, ROOT, &[2, 3, 4], generation);

    let service = new_service();
    let mut coordination = coordination(&service);

    coordination.begin_operation();
    let leaf = descend(&file, &mut coordination, ROOT, &[1], generation).unwrap();
    assert_eq!(leaf, Some(3));
    assert!(format!("{:?}", coordination).contains("1w -> 3w"));
    coordination.update_child_information(5, 1);
    assert!(format!("{:?}", coordination).contains("1w -> 5w"));
    coordination.reset();

    for edge in [0, 2].iter() {
        coordination.begin_operation();
        let leaf = descend(&file, &mut coordination, ROOT, &[*edge], generation).unwrap();
        assert_eq!(leaf, None);
        coordination.flip_to_pessimistic_mode();
        assert_eq!(coordination.held_latches(), 0);
    }
    assert_eq!(service.latch_count(), 0);
}

#[test]
fn test_stable_parent_is_never_upgraded() {
    test_utils::setup();
    let file = new_paged_memory(8);
    let epoch = GenerationEpoch::new(4, 5);
    for leaf in 2..=4 {
        new_leaf(&file, leaf, epoch.current());
    }
    new_internal(&file, ROOT, &[2, 3, 4], epoch.current());
    epoch.checkpoint();

    let service = new_service();
    let mut coordination = coordination(&service);
    coordination.begin_operation();
    let leaf = descend(&file, &mut coordination, ROOT, &[1], epoch.current()).unwrap();
    assert_eq!(leaf, None);
    coordination.reset();
    assert_eq!(service.latch_count(), 0);
}

#[test]
fn test_stable_root_leaf_goes_pessimistic() {
    test_utils::setup();
    let file = new_paged_memory(4);
    let epoch = GenerationEpoch::new(4, 5);
    new_leaf(&file, ROOT, epoch.current());
    epoch.checkpoint();

    let service = new_service();
    let mut coordination = coordination(&service);
    let leaf = run_operation(&file, &mut coordination, ROOT, &[], epoch.current(), |_, _| true)
        .unwrap();
    assert_eq!(leaf, ROOT);
    assert_eq!(coordination.pessimistic_flips(), 1);
}

/// Two writers on the same leaf both hold a read latch, neither can
/// upgrade, and neither waits for the other.
#[test]
fn test_contended_leaf_vetoes_both_writers() {
    test_utils::setup();
    let (_file, _) = small_tree();
    let service = new_service();
    let mut first = coordination(&service);
    let mut second = coordination(&service);

    for c in [&mut first, &mut second].iter_mut() {
        c.begin_operation();
        c.before_traversing_to_child(ROOT, 0);
        assert!(c.arrived_at_child(true, 800, false, 2));
        c.before_traversing_to_child(3, 1);
    }
    assert!(!first.arrived_at_child(false, 800, false, 0));
    assert!(!second.arrived_at_child(false, 800, false, 0));

    first.flip_to_pessimistic_mode();
    second.flip_to_pessimistic_mode();
    assert_eq!(service.latch_count(), 0);

    // now one after the other
    first.before_traversing_to_child(ROOT, 0);
    assert!(first.arrived_at_child(true, 800, false, 2));
    first.before_traversing_to_child(3, 1);
    assert!(first.arrived_at_child(false, 800, false, 0));
    assert_eq!(first.held_latches(), 2);
    first.close();
    assert_eq!(service.latch_count(), 0);
}

#[test]
fn test_right_sibling_only_in_pessimistic_mode() {
    test_utils::setup();
    let (file, generation) = small_tree();
    let service = new_service();
    let mut coordination = coordination(&service);

    let mut attempts = 0;
    run_operation(&file, &mut coordination, ROOT, &[0], generation, |c, _| {
        attempts += 1;
        c.before_accessing_right_sibling_leaf(3)
    })
    .unwrap();

    assert_eq!(attempts, 2);
    assert_eq!(coordination.held_latches(), 3);
    assert!(format!("{:?}", coordination).contains("siblings: [3]"));
    coordination.reset();
    assert_eq!(coordination.held_latches(), 0);
    assert_eq!(service.latch_count(), 0);
}

#[test]
fn test_up_releases_one_level() {
    test_utils::setup();
    let (file, generation) = small_tree();
    let service = new_service();
    let mut coordination = coordination(&service);

    coordination.begin_operation();
    descend(&file, &mut coordination, ROOT, &[2], generation).unwrap();
    assert_eq!(coordination.depth(), Some(1));
    coordination.up();
    assert_eq!(coordination.depth(), Some(0));
    assert_eq!(service.latch_count(), 1);
    assert!(!coordination.must_start_from_root());
    coordination.up();
    assert_eq!(coordination.depth(), None);
    assert!(coordination.must_start_from_root());
    assert_eq!(service.latch_count(), 0);
}

#[test]
fn test_force_reset() {
    test_utils::setup();
    let (file, generation) = small_tree();
    let service = new_service();
    let config = TreeConfig::default().with_reset_frequency(3);
    let mut coordination = coordination_with(&service, &config);

    coordination.begin_operation();
    descend(&file, &mut coordination, ROOT, &[0], generation).unwrap();
    assert!(!coordination.check_force_reset());
    assert!(!coordination.check_force_reset());
    assert_eq!(coordination.held_latches(), 2);
    assert!(coordination.check_force_reset());
    assert_eq!(coordination.held_latches(), 0);

    coordination.flip_to_pessimistic_mode();
    assert!(coordination.check_force_reset());
    assert_eq!(service.latch_count(), 0);
}

#[test]
#[should_panic(expected = "reset frequency must be positive")]
fn test_zero_reset_frequency_is_rejected() {
    let service = new_service();
    let config = TreeConfig::default().with_reset_frequency(0);
    LatchCrabbingCoordination::new(service, LEAF_UNDERFLOW_THRESHOLD, &config);
}

#[test]
#[should_panic]
fn test_internal_split_requires_pessimistic_mode() {
    let service = new_service();
    let mut coordination = coordination(&service);
    coordination.begin_operation();
    coordination.before_split_internal(ROOT);
}

/// Random operations with random vetoes: whatever happened, a reset
/// leaves no latch behind.
#[test]
fn test_reset_releases_everything() {
    test_utils::setup();
    let (file, generation) = small_tree();
    let service = new_service();
    let mut coordination = coordination(&service);
    let mut rng = rand::thread_rng();

    for _ in 0..500 {
        let pos = rng.gen_range(0, 3);
        let action = rng.gen_range(0, 4);
        run_operation(&file, &mut coordination, ROOT, &[pos], generation, |c, leaf| {
            match action {
                0 => c.before_splitting_leaf(rng.gen_range(0, 2000)),
                1 => c.before_removal_from_leaf(rng.gen_range(0, 100)),
                2 if leaf < 4 => c.before_accessing_right_sibling_leaf(leaf + 1),
                _ => true,
            }
        })
        .unwrap();

        if rng.gen_bool(0.5) {
            coordination.reset();
            assert_eq!(coordination.held_latches(), 0);
            assert_eq!(service.latch_count(), 0);
        }
    }
    coordination.close();
    assert_eq!(service.latch_count(), 0);
}

#[test]
fn test_no_coordination_permits_everything() {
    test_utils::setup();
    let (file, generation) = small_tree();
    let mut coordination = NoCoordination;

    let mut attempts = 0;
    run_operation(&file, &mut coordination, ROOT, &[1], generation, |c, leaf| {
        attempts += 1;
        c.before_splitting_leaf(usize::MAX)
            && c.before_removal_from_leaf(usize::MAX)
            && c.before_accessing_right_sibling_leaf(leaf + 1)
    })
    .unwrap();
    assert_eq!(attempts, 1);
    assert!(!coordination.pessimistic());
}
