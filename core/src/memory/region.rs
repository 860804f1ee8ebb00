// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Lazily paged memory regions.
//!
//! Every on-device RAM (EWRAM, IWRAM, VRAM, palette, OAM) is a `MemRegion`:
//! a page index whose 4 KiB pages are allocated on first write. Reads from a
//! page that was never written return zeroes, which is observably equivalent
//! to zero-initialized RAM while keeping startup RSS low and save states
//! highly compressible.

use crate::bits::Halves;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: u32 = 12;

type Page = Box<[u8; PAGE_SIZE]>;

pub struct MemRegion {
    size: usize,
    pages: Vec<Option<Page>>,
    used_pages: usize,
}

impl MemRegion {
    pub fn new(size: usize) -> Self {
        let page_count = (size + PAGE_SIZE - 1) >> PAGE_SHIFT;
        Self {
            size,
            pages: (0..page_count).map(|_| None).collect(),
            used_pages: 0,
        }
    }

    /// Size of the region in bytes. Offsets passed to the accessors must
    /// already be masked to this.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of pages that have been materialized by writes.
    pub fn used_pages(&self) -> usize {
        self.used_pages
    }

    /// Free every page, returning the region to its power-on state.
    pub fn reset(&mut self) {
        for page in &mut self.pages {
            *page = None;
        }
        self.used_pages = 0;
    }

    fn page(&self, offs: usize) -> Option<&Page> {
        self.pages[offs >> PAGE_SHIFT].as_ref()
    }

    fn page_mut(&mut self, offs: usize) -> &mut Page {
        let page = &mut self.pages[offs >> PAGE_SHIFT];
        if page.is_none() {
            *page = Some(Box::new([0; PAGE_SIZE]));
            self.used_pages += 1;
        }
        page.as_mut().unwrap()
    }

    #[inline]
    pub fn read8(&self, offs: usize) -> u8 {
        match self.page(offs) {
            Some(page) => page[offs & (PAGE_SIZE - 1)],
            None => 0,
        }
    }

    /// Read a half-word, LE. `offs` must be 2-aligned; aligned accesses
    /// never straddle a page.
    #[inline]
    pub fn read16(&self, offs: usize) -> u16 {
        match self.page(offs) {
            Some(page) => {
                let o = offs & (PAGE_SIZE - 1);
                u16::from_halves(page[o], page[o + 1])
            }
            None => 0,
        }
    }

    /// Read a word, LE. `offs` must be 4-aligned.
    #[inline]
    pub fn read32(&self, offs: usize) -> u32 {
        u32::from_halves(self.read16(offs), self.read16(offs + 2))
    }

    #[inline]
    pub fn write8(&mut self, offs: usize, value: u8) {
        let page = self.page_mut(offs);
        page[offs & (PAGE_SIZE - 1)] = value;
    }

    #[inline]
    pub fn write16(&mut self, offs: usize, value: u16) {
        let page = self.page_mut(offs);
        let o = offs & (PAGE_SIZE - 1);
        page[o] = value.lo();
        page[o + 1] = value.hi();
    }

    #[inline]
    pub fn write32(&mut self, offs: usize, value: u32) {
        self.write16(offs, value.lo());
        self.write16(offs + 2, value.hi());
    }

    /// Copy the full region contents into a linear buffer, unmapped pages
    /// reading as zeroes. Used by the save-state encoder.
    pub fn copy_to(&self, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.size);
        for (idx, chunk) in dst.chunks_mut(PAGE_SIZE).enumerate() {
            match &self.pages[idx] {
                Some(page) => chunk.copy_from_slice(&page[..chunk.len()]),
                None => chunk.fill(0),
            }
        }
    }

    /// Replace the region contents from a linear buffer. All-zero pages are
    /// not materialized.
    pub fn load_from(&mut self, src: &[u8]) {
        debug_assert_eq!(src.len(), self.size);
        self.reset();
        for (idx, chunk) in src.chunks(PAGE_SIZE).enumerate() {
            if chunk.iter().all(|b| *b == 0) {
                continue;
            }
            let page = self.pages[idx].get_or_insert_with(|| Box::new([0; PAGE_SIZE]));
            page[..chunk.len()].copy_from_slice(chunk);
            self.used_pages += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_pages_read_zero() {
        let region = MemRegion::new(32 * 1024);
        assert_eq!(region.read8(0x1234), 0);
        assert_eq!(region.read32(0x7FFC), 0);
        assert_eq!(region.used_pages(), 0);
    }

    #[test]
    fn writes_allocate_single_pages() {
        let mut region = MemRegion::new(256 * 1024);
        region.write16(0x2_0000, 0xBEEF);
        assert_eq!(region.read16(0x2_0000), 0xBEEF);
        assert_eq!(region.used_pages(), 1);

        region.write8(0x2_0FFF, 0x42);
        assert_eq!(region.used_pages(), 1);
        region.write8(0x2_1000, 0x42);
        assert_eq!(region.used_pages(), 2);
    }

    #[test]
    fn round_trips_through_linear_copy() {
        let mut region = MemRegion::new(8 * 1024);
        region.write32(0x10, 0xCAFE_F00D);
        region.write8(0x1FFF, 0xAB);

        let mut buf = vec![0; 8 * 1024];
        region.copy_to(&mut buf);

        let mut other = MemRegion::new(8 * 1024);
        other.load_from(&buf);
        assert_eq!(other.read32(0x10), 0xCAFE_F00D);
        assert_eq!(other.read8(0x1FFF), 0xAB);
        // The all-zero second page must not have been materialized.
        assert_eq!(other.used_pages(), 1);
    }
}
