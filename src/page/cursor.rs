use super::{PageId, PagedMode};
use crate::types::TreeResult;

/// A cursor pinned to one page at a time.
///
/// Multi-byte values are big-endian. Reads and writes beyond the page
/// do not panic, they raise a bounds flag which callers check with
/// [`PageCursor::check_and_clear_bounds_flag`] after their
/// [`PageCursor::should_retry`] loop.
pub trait PageCursor {
    /// Pin the cursor to `page_id`, releasing the previous page.
    ///
    /// Returns `false` if the page doesn't exist and can't be created
    /// in this cursor's mode.
    fn next(&mut self, page_id: PageId) -> TreeResult<bool>;

    fn current_page_id(&self) -> PageId;

    fn mode(&self) -> PagedMode;

    fn page_size(&self) -> usize;

    fn offset(&self) -> usize;

    fn set_offset(&mut self, offset: usize);

    fn get_byte(&mut self) -> u8;

    fn put_byte(&mut self, value: u8);

    /// Validate everything read since the page was pinned (or since
    /// the last retry). On `true` the offset is reset to 0 and the
    /// caller must redo its reads.
    fn should_retry(&mut self) -> bool;

    fn check_and_clear_bounds_flag(&mut self) -> bool;

    fn get_short(&mut self) -> u16 {
        let hi = self.get_byte() as u16;
        let lo = self.get_byte() as u16;
        (hi << 8) | lo
    }

    fn put_short(&mut self, value: u16) {
        for b in value.to_be_bytes().iter() {
            self.put_byte(*b);
        }
    }

    fn get_int(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        for b in buf.iter_mut() {
            *b = self.get_byte();
        }
        u32::from_be_bytes(buf)
    }

    fn put_int(&mut self, value: u32) {
        for b in value.to_be_bytes().iter() {
            self.put_byte(*b);
        }
    }

    /// Read a 6-byte value stored as the low int followed by the high
    /// short.
    fn get_6b_long(&mut self) -> u64 {
        let lsb = self.get_int() as u64;
        let msb = self.get_short() as u64;
        (msb << 32) | lsb
    }

    fn put_6b_long(&mut self, value: u64) {
        assert!(
            value >> 48 == 0,
            "value {:#x} doesn't fit in 6 bytes",
            value
        );
        self.put_int(value as u32);
        self.put_short((value >> 32) as u16);
    }

    fn get_bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.get_byte()).collect()
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.put_byte(*b);
        }
    }
}

/// A file of fixed size pages handing out cursors.
pub trait PagedFile: Sync {
    fn io(
        &self,
        page_id: PageId,
        mode: PagedMode,
    ) -> TreeResult<Box<dyn PageCursor + '_>>;

    fn page_size(&self) -> usize;

    /// One past the highest allocated page id.
    fn page_count(&self) -> u64;
}
