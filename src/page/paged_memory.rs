use std::sync::{
    atomic::{fence, AtomicU64, AtomicU8, Ordering},
    Arc, RwLock,
};

use crossbeam::utils::Backoff;
use log::debug;

use super::{PageCursor, PageId, PagedFile, PagedMode};
use crate::{
    config::TreeConfig,
    error::{ErrorKind, TreeError},
    types::TreeResult,
    utils::HandyRwLock,
};

/// A page with a seqlock style version word.
///
/// An odd version means an exclusive cursor is pinned to the page.
/// Every exclusive pin bumps the version by two in total, which is what
/// optimistic readers validate against.
struct Page {
    version: AtomicU64,
    data: Box<[AtomicU8]>,
}

impl Page {
    fn new(page_size: usize) -> Self {
        let data: Vec<AtomicU8> =
            (0..page_size).map(|_| AtomicU8::new(0)).collect();
        Self {
            version: AtomicU64::new(0),
            data: data.into_boxed_slice(),
        }
    }

    fn lock_exclusive(&self) {
        let backoff = Backoff::new();
        loop {
            let v = self.version.load(Ordering::Relaxed);
            if v & 1 == 0
                && self
                    .version
                    .compare_exchange_weak(
                        v,
                        v + 1,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                fence(Ordering::Release);
                return;
            }
            backoff.snooze();
        }
    }

    fn unlock_exclusive(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Wait until no exclusive cursor is pinned and return the version.
    fn stable_version(&self) -> u64 {
        let backoff = Backoff::new();
        loop {
            let v = self.version.load(Ordering::Acquire);
            if v & 1 == 0 {
                return v;
            }
            backoff.snooze();
        }
    }
}

/// An in-memory paged file.
///
/// Pages are created zeroed. Exclusive cursors grow the file when they
/// are pinned beyond its end, shared cursors don't.
pub struct PagedMemory {
    page_size: usize,
    pages: RwLock<Vec<Arc<Page>>>,
}

impl PagedMemory {
    pub fn new(page_size: usize, page_count: u64) -> Self {
        let file = Self {
            page_size,
            pages: RwLock::new(Vec::new()),
        };
        file.grow_to(page_count);
        file
    }

    /// A file of `page_count` pages of the configured page size.
    pub fn from_config(config: &TreeConfig, page_count: u64) -> Self {
        Self::new(config.page_size, page_count)
    }

    pub fn grow_to(&self, page_count: u64) {
        let mut pages = self.pages.wl();
        while (pages.len() as u64) < page_count {
            pages.push(Arc::new(Page::new(self.page_size)));
        }
    }

    fn page(&self, page_id: PageId) -> Option<Arc<Page>> {
        self.pages.rl().get(page_id as usize).cloned()
    }

    pub fn cursor(&self, mode: PagedMode) -> MemoryPageCursor<'_> {
        MemoryPageCursor {
            file: self,
            mode,
            page: None,
            page_id: 0,
            offset: 0,
            version: 0,
            out_of_bounds: false,
        }
    }
}

impl PagedFile for PagedMemory {
    fn io(
        &self,
        page_id: PageId,
        mode: PagedMode,
    ) -> TreeResult<Box<dyn PageCursor + '_>> {
        let mut cursor = self.cursor(mode);
        if !cursor.next(page_id)? {
            return Err(TreeError::new(
                ErrorKind::OutOfBounds,
                &format!(
                    "page {} is beyond the end of the file ({} pages)",
                    page_id,
                    self.page_count()
                ),
            ));
        }
        Ok(Box::new(cursor))
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.pages.rl().len() as u64
    }
}

pub struct MemoryPageCursor<'a> {
    file: &'a PagedMemory,
    mode: PagedMode,
    page: Option<Arc<Page>>,
    page_id: PageId,
    offset: usize,

    /// Version observed when the page was pinned, shared mode only.
    version: u64,
    out_of_bounds: bool,
}

impl MemoryPageCursor<'_> {
    fn release(&mut self) {
        if let Some(page) = self.page.take() {
            if self.mode == PagedMode::Exclusive {
                page.unlock_exclusive();
            }
        }
    }
}

impl PageCursor for MemoryPageCursor<'_> {
    fn next(&mut self, page_id: PageId) -> TreeResult<bool> {
        self.release();

        let page = match self.file.page(page_id) {
            Some(page) => page,
            None => match self.mode {
                PagedMode::SharedRead => return Ok(false),
                PagedMode::Exclusive => {
                    debug!("growing paged memory to fit page {}", page_id);
                    self.file.grow_to(page_id + 1);
                    match self.file.page(page_id) {
                        Some(page) => page,
                        None => return Ok(false),
                    }
                }
            },
        };

        match self.mode {
            PagedMode::SharedRead => self.version = page.stable_version(),
            PagedMode::Exclusive => page.lock_exclusive(),
        }

        self.page = Some(page);
        self.page_id = page_id;
        self.offset = 0;
        Ok(true)
    }

    fn current_page_id(&self) -> PageId {
        self.page_id
    }

    fn mode(&self) -> PagedMode {
        self.mode
    }

    fn page_size(&self) -> usize {
        self.file.page_size
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn get_byte(&mut self) -> u8 {
        let value = match &self.page {
            Some(page) if self.offset < self.file.page_size => {
                page.data[self.offset].load(Ordering::Relaxed)
            }
            _ => {
                self.out_of_bounds = true;
                return 0;
            }
        };
        self.offset += 1;
        value
    }

    fn put_byte(&mut self, value: u8) {
        assert_eq!(
            self.mode,
            PagedMode::Exclusive,
            "write through a {} cursor",
            self.mode
        );
        match &self.page {
            Some(page) if self.offset < self.file.page_size => {
                page.data[self.offset].store(value, Ordering::Relaxed);
            }
            _ => {
                self.out_of_bounds = true;
                return;
            }
        }
        self.offset += 1;
    }

    fn should_retry(&mut self) -> bool {
        if self.mode == PagedMode::Exclusive {
            return false;
        }

        fence(Ordering::Acquire);
        let page = match &self.page {
            Some(page) => page,
            None => return false,
        };
        if page.version.load(Ordering::Relaxed) == self.version {
            return false;
        }

        self.version = page.stable_version();
        self.offset = 0;
        self.out_of_bounds = false;
        true
    }

    fn check_and_clear_bounds_flag(&mut self) -> bool {
        let flag = self.out_of_bounds;
        self.out_of_bounds = false;
        flag
    }
}

impl Drop for MemoryPageCursor<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
