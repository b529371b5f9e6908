mod test_utils;

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use gentree::{
    error::ErrorKind, PageCursor, PagedFile, PagedMemory, PagedMode, TreeConfig,
};
use test_utils::{new_paged_memory, TEST_PAGE_SIZE};

#[test]
fn test_exclusive_cursor_grows_file() {
    test_utils::setup();
    let file = new_paged_memory(2);

    let err = file.io(5, PagedMode::SharedRead).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::OutOfBounds);

    {
        let mut cursor = file.io(5, PagedMode::Exclusive).unwrap();
        cursor.put_int(0xCAFE);
    }
    assert_eq!(file.page_count(), 6);

    let mut cursor = file.io(5, PagedMode::SharedRead).unwrap();
    assert_eq!(cursor.get_int(), 0xCAFE);
    assert!(!cursor.should_retry());
}

#[test]
fn test_bounds_flag() {
    test_utils::setup();
    // setup() made the test page size the process wide default
    let file = PagedMemory::from_config(&TreeConfig::default(), 1);
    assert_eq!(file.page_size(), TEST_PAGE_SIZE);
    let mut cursor = file.io(0, PagedMode::Exclusive).unwrap();
    cursor.set_offset(TEST_PAGE_SIZE - 2);
    cursor.put_int(7);
    assert!(cursor.check_and_clear_bounds_flag());
    assert!(!cursor.check_and_clear_bounds_flag());
}

#[test]
fn test_6b_long() {
    test_utils::setup();
    let file = new_paged_memory(1);
    let mut cursor = file.io(0, PagedMode::Exclusive).unwrap();
    cursor.put_6b_long(0x1234_5678_9ABC);
    cursor.set_offset(0);
    assert_eq!(cursor.get_6b_long(), 0x1234_5678_9ABC);
    assert_eq!(cursor.offset(), 6);
}

/// A writer keeps rewriting two fields of a page with the same value,
/// an optimistic reader that doesn't have to retry never sees them
/// differ.
#[test]
fn test_optimistic_reader_sees_consistent_page() {
    test_utils::setup();
    let file = new_paged_memory(2);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            for value in 1..20_000_u32 {
                let mut cursor = file.io(1, PagedMode::Exclusive).unwrap();
                cursor.put_int(value);
                cursor.set_offset(500);
                cursor.put_int(value);
            }
            done.store(true, Ordering::SeqCst);
        });

        s.spawn(|| {
            let mut cursor = file.io(1, PagedMode::SharedRead).unwrap();
            let mut retries = 0_u64;
            while !done.load(Ordering::SeqCst) {
                cursor.next(1).unwrap();
                let (first, second) = loop {
                    cursor.set_offset(0);
                    let first = cursor.get_int();
                    cursor.set_offset(500);
                    let second = cursor.get_int();
                    if !cursor.should_retry() {
                        break (first, second);
                    }
                    retries += 1;
                };
                assert_eq!(first, second);
            }
            log::debug!("optimistic reader retried {} times", retries);
        });
    });
}
