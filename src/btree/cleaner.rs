use std::{
    cmp,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Instant,
};

use log::{debug, error, info};

use super::node::{
    self, NodeLayout, BYTE_POS_LEFTSIBLING, BYTE_POS_RIGHTSIBLING,
    BYTE_POS_SUCCESSOR,
};
use crate::{
    config::TreeConfig,
    error::{ErrorKind, TreeError},
    generation::Generation,
    page::{is_node, PageCursor, PageId, PagedFile, PagedMode},
    pointer::{
        gsp,
        gspp::{self, PointerState, Slot},
    },
    types::TreeResult,
};

/// Batches per worker the page range is cut into, as long as the
/// batch size stays within its bounds.
const BATCHES_PER_WORKER: u64 = 100;

/// Observer of the crash generation cleanup.
pub trait CleanupMonitor: Sync {
    fn cleanup_started(&self) {}

    fn cleanup_finished(
        &self,
        _pages_scanned: u64,
        _tree_nodes: u64,
        _cleaned_pointers: u64,
        _duration_millis: u64,
    ) {
    }

    fn cleanup_failed(&self, _err: &TreeError) {}
}

pub struct NoMonitor;

impl CleanupMonitor for NoMonitor {}

/// A monitor keeping the reported numbers, mostly for tests.
#[derive(Debug, Default)]
pub struct CleanupCounters {
    pub started: AtomicU64,
    pub finished: AtomicU64,
    pub failed: AtomicU64,
    pub pages_scanned: AtomicU64,
    pub tree_nodes: AtomicU64,
    pub cleaned_pointers: AtomicU64,
}

impl CleanupMonitor for CleanupCounters {
    fn cleanup_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn cleanup_finished(
        &self,
        pages_scanned: u64,
        tree_nodes: u64,
        cleaned_pointers: u64,
        _duration_millis: u64,
    ) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        self.pages_scanned.fetch_add(pages_scanned, Ordering::Relaxed);
        self.tree_nodes.fetch_add(tree_nodes, Ordering::Relaxed);
        self.cleaned_pointers
            .fetch_add(cleaned_pointers, Ordering::Relaxed);
    }

    fn cleanup_failed(&self, _err: &TreeError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// What one cleanup run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupStats {
    pub pages_scanned: u64,
    pub tree_nodes: u64,
    pub cleaned_pointers: u64,
}

/// A fixed number of scoped worker threads running the same job.
pub struct WorkerPool {
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "a worker pool needs at least one thread");
        Self { threads }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `job(worker_index)` on every worker and wait for all of them.
    ///
    /// The first failing worker's error is returned with the errors of
    /// the other failed workers chained to it. A panicking worker counts
    /// as failed.
    pub fn run<F>(&self, job: F) -> TreeResult
    where
        F: Fn(usize) -> TreeResult + Sync,
    {
        let job = &job;
        let results = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..self.threads)
                .map(|worker| s.spawn(move |_| job(worker)))
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| match handle.join() {
                    Ok(result) => result,
                    Err(_) => Err(TreeError::new(
                        ErrorKind::CleanupFailed,
                        &format!("worker {} panicked", worker),
                    )),
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| {
            TreeError::new(ErrorKind::CleanupFailed, "worker scope panicked")
        })?;

        let mut first: Option<TreeError> = None;
        for err in results.into_iter().filter_map(Result::err) {
            first = Some(match first {
                None => err,
                Some(first) => first.chain(&err),
            });
        }
        match first {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(TreeConfig::default().cleaner_threads)
    }
}

/// Purges pointers left behind by a run that crashed before its next
/// checkpoint.
///
/// Such pointers carry a generation strictly between the stable and the
/// unstable generation of the restarted store. Nobody can tell whether
/// what they point at was ever completely written, so every slot in
/// that state is overwritten with the empty triplet. Runs once at
/// startup, before any reader or writer touches the tree, over the
/// page range `[low_tree_node_id, high_tree_node_id)`.
pub struct CrashGenerationCleaner<'a, F: ?Sized> {
    paged_file: &'a F,
    layout: NodeLayout,
    low_tree_node_id: PageId,
    high_tree_node_id: PageId,
    generation: Generation,
    monitor: &'a dyn CleanupMonitor,
    min_batch: u64,
    max_batch: u64,
}

impl<'a, F: PagedFile + ?Sized> CrashGenerationCleaner<'a, F> {
    pub fn new(
        paged_file: &'a F,
        layout: NodeLayout,
        low_tree_node_id: PageId,
        high_tree_node_id: PageId,
        generation: Generation,
        monitor: &'a dyn CleanupMonitor,
        config: &TreeConfig,
    ) -> Self {
        assert!(
            is_node(low_tree_node_id),
            "page {} can't hold a tree node",
            low_tree_node_id
        );
        Self {
            paged_file,
            layout,
            low_tree_node_id,
            high_tree_node_id,
            generation,
            monitor,
            min_batch: config.min_cleaner_batch,
            max_batch: config.max_cleaner_batch,
        }
    }

    fn page_range(&self) -> u64 {
        self.high_tree_node_id.saturating_sub(self.low_tree_node_id)
    }

    /// Pages per batch for `threads` workers.
    pub fn batch_size(&self, threads: usize) -> u64 {
        let pages = self.page_range();
        let batch = pages / (BATCHES_PER_WORKER * threads as u64);
        cmp::min(cmp::max(batch, self.min_batch), self.max_batch)
    }

    pub fn clean(&self, pool: &WorkerPool) -> TreeResult<CleanupStats> {
        self.monitor.cleanup_started();
        assert!(
            self.generation.has_crash_zone(),
            "no crash generation between {}",
            self.generation
        );

        let start = Instant::now();
        let pages = self.page_range();
        let batch_size = self.batch_size(pool.threads());
        info!(
            "crash generation cleanup started, generation: {}, \
             pages: [{}, {}), batch size: {}, workers: {}",
            self.generation,
            self.low_tree_node_id,
            self.high_tree_node_id,
            batch_size,
            pool.threads()
        );

        let next_id = AtomicU64::new(self.low_tree_node_id);
        let failed = AtomicBool::new(false);
        let tree_nodes = AtomicU64::new(0);
        let cleaned_pointers = AtomicU64::new(0);

        let result = pool.run(|worker| {
            while !failed.load(Ordering::Acquire) {
                let batch_start =
                    next_id.fetch_add(batch_size, Ordering::AcqRel);
                if batch_start >= self.high_tree_node_id {
                    break;
                }
                let batch_end = cmp::min(
                    batch_start + batch_size,
                    self.high_tree_node_id,
                );

                if let Err(e) = self.clean_batch(
                    batch_start,
                    batch_end,
                    &tree_nodes,
                    &cleaned_pointers,
                ) {
                    failed.store(true, Ordering::Release);
                    error!(
                        "cleanup worker {} failed on batch [{}, {}): {}",
                        worker, batch_start, batch_end, e
                    );
                    return Err(e);
                }
            }
            Ok(())
        });

        if let Err(e) = result {
            let err = TreeError::new(
                ErrorKind::CleanupFailed,
                &format!("crash generation cleanup aborted: {}", e),
            );
            err.show_backtrace();
            self.monitor.cleanup_failed(&err);
            return Err(err);
        }

        let stats = CleanupStats {
            pages_scanned: pages,
            tree_nodes: tree_nodes.load(Ordering::Acquire),
            cleaned_pointers: cleaned_pointers.load(Ordering::Acquire),
        };
        let millis = start.elapsed().as_millis() as u64;
        self.monitor.cleanup_finished(
            stats.pages_scanned,
            stats.tree_nodes,
            stats.cleaned_pointers,
            millis,
        );
        info!(
            "crash generation cleanup finished, pages scanned: {}, \
             tree nodes: {}, cleaned pointers: {}, took {} ms",
            stats.pages_scanned,
            stats.tree_nodes,
            stats.cleaned_pointers,
            millis
        );
        Ok(stats)
    }

    fn clean_batch(
        &self,
        batch_start: PageId,
        batch_end: PageId,
        tree_nodes: &AtomicU64,
        cleaned_pointers: &AtomicU64,
    ) -> TreeResult {
        let mut read_cursor =
            self.paged_file.io(batch_start, PagedMode::SharedRead)?;
        let mut local_tree_nodes = 0;
        let mut local_cleaned = 0;

        for page_id in batch_start..batch_end {
            node::go_to(&mut *read_cursor, "cleaned", page_id)?;
            let (is_tree_node, has_crashed) = self.detect(&mut *read_cursor)?;
            if !is_tree_node {
                continue;
            }
            local_tree_nodes += 1;

            if has_crashed {
                let mut write_cursor =
                    self.paged_file.io(page_id, PagedMode::Exclusive)?;
                let cleaned = self.clean_node(&mut *write_cursor)?;
                debug!(
                    "cleaned {} crashed pointers in node {}",
                    cleaned, page_id
                );
                local_cleaned += cleaned;
            }
        }

        tree_nodes.fetch_add(local_tree_nodes, Ordering::AcqRel);
        cleaned_pointers.fetch_add(local_cleaned, Ordering::AcqRel);
        Ok(())
    }

    /// Whether the page is a tree node and, if so, whether it holds at
    /// least one crashed slot. Reads optimistically.
    fn detect(&self, cursor: &mut dyn PageCursor) -> TreeResult<(bool, bool)> {
        let mut result;
        loop {
            result = (false, false);
            if node::is_tree_node(cursor) {
                let key_count = node::key_count(cursor);
                let is_internal = node::is_internal(cursor);
                let has_crashed = self
                    .pointer_offsets(is_internal, key_count)
                    .any(|offset| {
                        has_crashed_slot(cursor, offset, self.generation)
                    });
                result = (true, has_crashed);
            }
            if !cursor.should_retry() {
                break;
            }
        }
        self.check_bounds(cursor)?;
        Ok(result)
    }

    fn clean_node(&self, cursor: &mut dyn PageCursor) -> TreeResult<u64> {
        if !node::is_tree_node(cursor) {
            return Ok(0);
        }
        let key_count = node::key_count(cursor);
        let is_internal = node::is_internal(cursor);

        let mut cleaned = 0;
        for offset in self.pointer_offsets(is_internal, key_count) {
            cursor.set_offset(offset);
            let (state_a, state_b) = gspp::pointer_states(
                cursor,
                self.generation.stable,
                self.generation.unstable,
            );
            let slots = [(Slot::A, state_a), (Slot::B, state_b)];
            for (slot, state) in slots.iter() {
                if *state == PointerState::Crash {
                    cursor.set_offset(offset + slot.offset());
                    gsp::clean(cursor);
                    cleaned += 1;
                }
            }
        }
        self.check_bounds(cursor)?;
        Ok(cleaned)
    }

    /// Offsets of every pointer pair of a node. Children are only
    /// visited as far as the format allows, whatever the key count
    /// claims.
    fn pointer_offsets(
        &self,
        is_internal: bool,
        key_count: usize,
    ) -> impl Iterator<Item = usize> {
        let layout = self.layout;
        let children = if is_internal { key_count + 1 } else { 0 };
        [BYTE_POS_SUCCESSOR, BYTE_POS_LEFTSIBLING, BYTE_POS_RIGHTSIBLING]
            .to_vec()
            .into_iter()
            .chain(
                (0..children)
                    .take_while(move |pos| layout.reasonable_child_count(*pos))
                    .map(move |pos| layout.child_offset(pos)),
            )
    }

    fn check_bounds(&self, cursor: &mut dyn PageCursor) -> TreeResult {
        if cursor.check_and_clear_bounds_flag() {
            return Err(TreeError::new(
                ErrorKind::OutOfBounds,
                &format!(
                    "cursor out of bounds while cleaning node {}",
                    cursor.current_page_id()
                ),
            ));
        }
        Ok(())
    }
}

fn has_crashed_slot(
    cursor: &mut dyn PageCursor,
    offset: usize,
    generation: Generation,
) -> bool {
    cursor.set_offset(offset);
    let (state_a, state_b) =
        gspp::pointer_states(cursor, generation.stable, generation.unstable);
    state_a == PointerState::Crash || state_b == PointerState::Crash
}
