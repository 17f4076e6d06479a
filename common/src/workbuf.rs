/*++

Licensed under the Apache-2.0 license.

File Name:

    workbuf.rs

Abstract:

    Scratch-memory bump allocator for the boot-long work buffer.

--*/

use crate::memops::{align_skip, round_up};
use veriboot_error::{VeribootError, VeribootResult};

/// Alignment of every allocation.  Must be a power of two.
pub const WORKBUF_ALIGN: usize = 8;

/// Bump allocator over an externally provided byte region.
///
/// Allocations hand back offsets rather than borrows so that several of
/// them can be live at once and so the shared state can record them
/// across pipeline stages.  Frees must occur in strict LIFO order; the
/// allocator keeps no headers and trusts its callers to honor that.
pub struct Workbuf<'a> {
    buf: &'a mut [u8],
    used: usize,
}

impl<'a> Workbuf<'a> {
    /// Wrap `buf`, skipping leading bytes until the base is aligned.  A
    /// region too small to align degenerates to a zero-size buffer.
    pub fn init(buf: &'a mut [u8]) -> Workbuf<'a> {
        let skip = match align_skip(
            buf.as_ptr() as u64,
            buf.len() as u64,
            WORKBUF_ALIGN as u64,
            0,
        ) {
            Ok(skip) => skip as usize,
            Err(_) => buf.len(),
        };
        Workbuf {
            buf: &mut buf[skip..],
            used: 0,
        }
    }

    /// Allocate `size` bytes; returns the offset of the new allocation.
    /// The top advances by `size` rounded up to `WORKBUF_ALIGN`, so the
    /// next allocation is aligned too.
    pub fn alloc(&mut self, size: usize) -> VeribootResult<usize> {
        let rounded = round_up(size, WORKBUF_ALIGN);
        if rounded > self.buf.len() - self.used {
            return Err(VeribootError::WORKBUF_EXHAUSTED);
        }

        let offset = self.used;
        self.used += rounded;
        Ok(offset)
    }

    /// Free the most recent `size`-byte allocation.  Caller-enforced
    /// LIFO; freeing out of order corrupts later allocations.
    pub fn free(&mut self, size: usize) {
        let rounded = round_up(size, WORKBUF_ALIGN);
        debug_assert!(rounded <= self.used);
        self.used = self.used.saturating_sub(rounded);
    }

    /// Resize the most recent allocation.  Frees `old_size` and then
    /// allocates `new_size`; the returned offset is identical to the old
    /// one whenever the allocation succeeds.
    pub fn realloc(&mut self, old_size: usize, new_size: usize) -> VeribootResult<usize> {
        self.free(old_size);
        self.alloc(new_size)
    }

    /// Bytes allocated so far (rounded).
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.used
    }

    /// Read access to an allocation recorded as (offset, len).
    pub fn get(&self, offset: usize, len: usize) -> &[u8] {
        &self.buf[offset..offset + len]
    }

    /// Write access to an allocation recorded as (offset, len).
    pub fn get_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.buf[offset..offset + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_advances_aligned() {
        let mut mem = [0u8; 256];
        let mut wb = Workbuf::init(&mut mem);

        let a = wb.alloc(5).unwrap();
        let b = wb.alloc(16).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 8);
        assert_eq!(wb.used(), 24);
    }

    #[test]
    fn test_alloc_exhausted() {
        let mut mem = [0u8; 64];
        let mut wb = Workbuf::init(&mut mem);
        let avail = wb.remaining() & !(WORKBUF_ALIGN - 1);

        assert!(wb.alloc(avail).is_ok());
        assert_eq!(wb.alloc(1), Err(VeribootError::WORKBUF_EXHAUSTED));
    }

    #[test]
    fn test_free_rewinds() {
        let mut mem = [0u8; 128];
        let mut wb = Workbuf::init(&mut mem);

        let a = wb.alloc(24).unwrap();
        let b = wb.alloc(10).unwrap();
        wb.free(10);
        let c = wb.alloc(40).unwrap();
        assert_eq!(b, c);
        wb.free(40);
        wb.free(24);
        assert_eq!(wb.used(), 0);
        let d = wb.alloc(8).unwrap();
        assert_eq!(a, d);
    }

    #[test]
    fn test_realloc_same_offset() {
        let mut mem = [0u8; 128];
        let mut wb = Workbuf::init(&mut mem);

        let _ = wb.alloc(16).unwrap();
        let old = wb.alloc(20).unwrap();
        let new = wb.realloc(20, 48).unwrap();
        assert_eq!(old, new);
    }

    #[test]
    fn test_realloc_too_big_fails() {
        let mut mem = [0u8; 64];
        let mut wb = Workbuf::init(&mut mem);
        let avail = wb.remaining();

        let _ = wb.alloc(8).unwrap();
        assert_eq!(
            wb.realloc(8, avail * 2),
            Err(VeribootError::WORKBUF_EXHAUSTED)
        );
        // The failed realloc already freed the old allocation
        assert_eq!(wb.used(), 0);
    }

    #[test]
    fn test_get_round_trip() {
        let mut mem = [0u8; 64];
        let mut wb = Workbuf::init(&mut mem);

        let off = wb.alloc(4).unwrap();
        wb.get_mut(off, 4).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(wb.get(off, 4), &[1, 2, 3, 4]);
    }
}
