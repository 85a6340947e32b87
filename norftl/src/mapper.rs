//! Wear levelling by logical-to-physical page indirection.
//!
//! ```text
//! Logical view:             Physical layout:
//! ┌──────────────┐          ┌────────────────────────┐
//! │ page 0       │ ───┐     │ hdr │ body  (phys 0)   │
//! ├──────────────┤    └────►│ hdr │ body  (phys 3)   │
//! │ page 1       │ ───┐     │ hdr │ body  (phys 2)   │
//! ├──────────────┤    └────►│ ... │ free pool ...    │
//! │ page 2       │          ├────────────────────────┤
//! └──────────────┘          │ format signature page  │
//!                           └────────────────────────┘
//! ```
//!
//! Each physical page carries a 2-byte header binding it to a logical
//! page. The binding is rewired on every erase and relocation, so erases
//! spread across the free pool instead of hammering one cell. The map is
//! rebuilt from the headers on every mount; nothing lives only in RAM.

use alloc::vec;
use alloc::vec::Vec;

use rand_core::RngCore;

use crate::device::{check_page_window, FlashDevice, TransferHandler};
use crate::error::FlashError;
use crate::relocate::{copy_page_between, write_verify_relocate, STACK_BUFFER_SIZE};

/// Bytes of in-band metadata at the start of every physical page.
const HEADER_SIZE: u32 = 2;

/// Header value marking a formatted device, stored on the signature page.
const FORMAT_SIGNATURE: u16 = 0x2FFF;

/// A pristine (never written) header.
const HEADER_PRISTINE: u16 = 0xFFFF;

/// Use-state bit pattern `0b01` in bits 15..14: the page backs the logical
/// page named by bits 13..0.
const HEADER_IN_USE: u16 = 0x4000;

/// Mask of the logical-page-index field.
const HEADER_INDEX_MASK: u16 = 0x3FFF;

fn header_in_use(header: u16) -> bool {
    // 0b11 = pristine, 0b00 = retired awaiting erase; only 0b01 is live.
    header >> 14 == 0b01
}

fn header_logical(header: u16) -> u32 {
    (header & HEADER_INDEX_MASK) as u32
}

/// A wear-levelled view of `logical_pages` pages backed by a larger
/// physical device.
///
/// The last physical page is the format-signature page; the remaining
/// pages form the pool backing logical pages. Exposed pages are two bytes
/// smaller than physical ones (the header), and there are fewer of them
/// than physical pages, so at least one pool page is always free to
/// relocate into.
///
/// Allocation picks a pseudo-random starting point in the pool per
/// allocation, which is what levels wear; callers supply the random
/// source and must not assume which physical page backs a logical one.
pub struct LogicalPageMapper<F, R> {
    flash: F,
    logical_pages: u32,
    /// `map[logical]` is the backing physical page, or the pool-size
    /// sentinel (the signature page index) when unallocated.
    map: Vec<u16>,
    /// Bit per physical pool page, set while bound to a logical page.
    in_use: Vec<u8>,
    rng: R,
}

impl<F: FlashDevice, R: RngCore> LogicalPageMapper<F, R> {
    /// Mounts a mapper over `flash`, formatting first if the signature
    /// page says the device has never been formatted.
    ///
    /// Requires `1 <= logical_pages <= flash.page_count() - 2` (one page
    /// for the signature, at least one spare in the pool) and a logical
    /// page count that fits the 14-bit header field.
    pub fn new(flash: F, logical_pages: u32, rng: R) -> Result<Self, FlashError> {
        let physical_pages = flash.page_count();
        if logical_pages == 0
            || physical_pages < 3
            || logical_pages > physical_pages - 2
            || logical_pages > HEADER_INDEX_MASK as u32
            || physical_pages - 1 > HEADER_INDEX_MASK as u32
            || flash.page_size() <= HEADER_SIZE
        {
            return Err(FlashError::InvalidAddress);
        }

        let mut mapper = Self {
            flash,
            logical_pages,
            map: vec![0; logical_pages as usize],
            in_use: vec![0; (physical_pages as usize + 7) / 8],
            rng,
        };
        mapper.format_if_needed()?;
        mapper.rebuild_allocation()?;
        Ok(mapper)
    }

    /// Consumes the mapper and returns the underlying device.
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// First physical page index that cannot back a logical page: the
    /// signature page, also used as the "unallocated" sentinel.
    fn max_page(&self) -> u32 {
        self.flash.page_count() - 1
    }

    /// Erases and signs the device unless the signature page already
    /// carries the format signature. Returns whether a format ran.
    ///
    /// Pages already reading all-`0xFF` are skipped, so re-mounting an
    /// interrupted format does not double-erase.
    fn format_if_needed(&mut self) -> Result<bool, FlashError> {
        let max = self.max_page();
        if self.read_header(max)? == FORMAT_SIGNATURE {
            return Ok(false);
        }

        #[cfg(feature = "log")]
        log::debug!("no format signature, erasing {} pages", max);

        for page in (0..max).rev() {
            self.erase_page_if_necessary(page)?;
        }
        if self.page_is_dirty(max)? {
            self.flash.erase_page(self.flash.page_address(max))?;
        }
        self.write_header(max, FORMAT_SIGNATURE)?;
        Ok(true)
    }

    /// Whether any byte of physical page `page` differs from the erased
    /// state.
    fn page_is_dirty(&mut self, page: u32) -> Result<bool, FlashError> {
        let mut buf = [0u8; STACK_BUFFER_SIZE];
        let mut address = self.flash.page_address(page);
        let end = address + self.flash.page_size();

        while address < end {
            let chunk = (buf.len() as u32).min(end - address) as usize;
            self.flash.read_page(&mut buf[..chunk], address)?;
            if buf[..chunk].iter().any(|&b| b != 0xFF) {
                return Ok(true);
            }
            address += chunk as u32;
        }
        Ok(false)
    }

    /// Returns physical page `page` to the pristine state, skipping the
    /// erase when it already is, and marks it free.
    fn erase_page_if_necessary(&mut self, page: u32) -> Result<(), FlashError> {
        if self.page_is_dirty(page)? {
            self.flash.erase_page(self.flash.page_address(page))?;
        }
        self.set_in_use(page, false);
        Ok(())
    }

    /// Rebuilds the logical map and free pool from the page headers.
    ///
    /// The scan walks physical pages downward from `P-2` to `0` and
    /// overwrites earlier claims, so if two physical pages ever claim the
    /// same logical page (an interrupted relocation), the lowest-indexed
    /// one wins.
    fn rebuild_allocation(&mut self) -> Result<(), FlashError> {
        let sentinel = self.max_page() as u16;
        self.map.fill(sentinel);

        for page in (0..self.max_page()).rev() {
            let header = self.read_header(page)?;
            let live = header_in_use(header);
            self.set_in_use(page, live);
            if live {
                let logical = header_logical(header);
                if logical < self.logical_pages {
                    self.map[logical as usize] = page as u16;
                }
            }
        }
        Ok(())
    }

    fn read_header(&mut self, page: u32) -> Result<u16, FlashError> {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        let address = self.flash.page_address(page);
        self.flash.read_page(&mut bytes, address)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn write_header(&mut self, page: u32, header: u16) -> Result<(), FlashError> {
        let address = self.flash.page_address(page);
        self.flash.write_page(&header.to_le_bytes(), address)
    }

    fn set_in_use(&mut self, page: u32, in_use: bool) {
        let mask = 1u8 << (page & 7);
        if in_use {
            self.in_use[(page >> 3) as usize] |= mask;
        } else {
            self.in_use[(page >> 3) as usize] &= !mask;
        }
    }

    fn is_in_use(&self, page: u32) -> bool {
        self.in_use[(page >> 3) as usize] & (1 << (page & 7)) != 0
    }

    /// Finds the first free pool page at or after `offset`, wrapping.
    fn next_free_page(&self, offset: u32) -> Result<u32, FlashError> {
        let max = self.max_page();
        for i in 0..max {
            let page = (i + offset) % max;
            if !self.is_in_use(page) {
                return Ok(page);
            }
        }
        #[cfg(feature = "log")]
        log::warn!("page pool exhausted");
        Err(FlashError::AllocationFailed)
    }

    /// Binds a fresh physical page to `logical` and returns it.
    ///
    /// The search starts at a random pool offset; headers are written
    /// last, so an interruption leaves the page unbound, not corrupt.
    fn allocate(&mut self, logical: u32) -> Result<u32, FlashError> {
        let offset = self.rng.next_u32() % self.max_page();
        let free = self.next_free_page(offset)?;
        self.set_in_use(free, true);
        // a clean header implies a clean page; anything else needs erasing
        if self.read_header(free)? != HEADER_PRISTINE {
            self.flash.erase_page(self.flash.page_address(free))?;
        }
        self.map[logical as usize] = free as u16;
        self.write_header(free, HEADER_IN_USE | logical as u16)?;
        Ok(free)
    }

    /// The physical page backing `logical`, allocating on first touch.
    fn fetch_allocate(&mut self, logical: u32) -> Result<u32, FlashError> {
        let physical = self.map[logical as usize] as u32;
        if physical == self.max_page() {
            self.allocate(logical)
        } else {
            Ok(physical)
        }
    }

    /// Maps a logical byte address to its physical address, past the
    /// header of the backing page.
    fn physical_address(&mut self, address: u32) -> Result<u32, FlashError> {
        let page_size = self.page_size();
        let logical = address / page_size;
        let offset = address % page_size;
        let physical = self.fetch_allocate(logical)?;
        Ok(self.flash.page_address(physical) + offset + HEADER_SIZE)
    }

    /// Flags a retired physical page as dead (use-state `0b00`) so a
    /// remount cannot resurrect its stale binding. An AND write; no erase.
    fn retire(&mut self, page: u32) -> Result<(), FlashError> {
        self.set_in_use(page, false);
        self.write_header(page, 0x0000)
    }
}

impl<F: FlashDevice, R: RngCore> FlashDevice for LogicalPageMapper<F, R> {
    fn page_size(&self) -> u32 {
        self.flash.page_size() - HEADER_SIZE
    }

    fn page_count(&self) -> u32 {
        self.logical_pages
    }

    /// Erases the logical page containing `address`.
    ///
    /// The old backing page is erased and returned to the pool, and a
    /// fresh page is bound immediately so the next write pays no
    /// allocation cost. Erasing a never-allocated page succeeds as a
    /// no-op: the page already reads all-`0xFF`.
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        let logical = address / self.page_size();
        if logical >= self.logical_pages {
            return Err(FlashError::InvalidAddress);
        }
        let physical = self.map[logical as usize] as u32;
        if physical == self.max_page() {
            return Ok(());
        }
        self.map[logical as usize] = self.max_page() as u16;
        self.flash.erase_page(self.flash.page_address(physical))?;
        self.set_in_use(physical, false);
        self.allocate(logical)?;
        Ok(())
    }

    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_page_window(self, address, data.len())?;
        let dest = self.physical_address(address)?;
        self.flash.write_page(data, dest)
    }

    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        check_page_window(self, address, data.len())?;
        let src = self.physical_address(address)?;
        self.flash.read_page(data, src)
    }

    fn write_erase_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_page_window(self, address, data.len())?;
        let mut scratch = [0u8; STACK_BUFFER_SIZE];
        write_verify_relocate(self, data, address, &mut scratch)
    }

    /// Rebuilds a page by remapping: the body streams through `handler`
    /// into a freshly bound pool page and the old page is retired without
    /// an erase. This is what makes rewrites cheap — the erase is deferred
    /// until the retired page is picked again.
    fn copy_page(
        &mut self,
        address: u32,
        handler: &mut TransferHandler<'_>,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        let page_size = self.page_size();
        let logical = address / page_size;
        if logical >= self.logical_pages {
            return Err(FlashError::InvalidAddress);
        }
        let old = self.map[logical as usize] as u32;
        if old == self.max_page() {
            return Err(FlashError::InvalidAddress);
        }

        let new = self.allocate(logical)?;
        copy_page_between(
            &mut self.flash,
            old,
            new,
            HEADER_SIZE,
            page_size,
            handler,
            scratch,
        )?;
        self.retire(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeFlashDevice;
    use rand_core::SeedableRng;
    use rand_pcg::Pcg32;

    fn rng() -> Pcg32 {
        Pcg32::seed_from_u64(42)
    }

    fn mapper(
        pages: u32,
        page_size: u32,
        logical: u32,
    ) -> LogicalPageMapper<FakeFlashDevice, Pcg32> {
        let mut fake = FakeFlashDevice::new(pages, page_size);
        fake.erase_all();
        LogicalPageMapper::new(fake, logical, rng()).unwrap()
    }

    #[test]
    fn test_geometry() {
        let mapper = mapper(6, 50, 4);
        assert_eq!(mapper.max_page(), 5);
        assert_eq!(mapper.page_size(), 48);
        assert_eq!(mapper.page_count(), 4);
        assert_eq!(mapper.length(), 4 * 48);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let fake = FakeFlashDevice::new(6, 50);
        // no room for signature page plus a spare
        assert!(LogicalPageMapper::new(fake, 5, rng()).is_err());
        let fake = FakeFlashDevice::new(6, 50);
        assert!(LogicalPageMapper::new(fake, 0, rng()).is_err());
        let fake = FakeFlashDevice::new(2, 50);
        assert!(LogicalPageMapper::new(fake, 1, rng()).is_err());
        // page too small to hold a header and any data
        let fake = FakeFlashDevice::new(6, 2);
        assert!(LogicalPageMapper::new(fake, 4, rng()).is_err());
    }

    #[test]
    fn test_page_is_dirty_small_page() {
        let mut mapper = mapper(6, 50, 4);
        assert!(!mapper.page_is_dirty(0).unwrap());
        mapper.write_header(0, 0x1234).unwrap();
        assert!(mapper.page_is_dirty(0).unwrap());
    }

    #[test]
    fn test_page_is_dirty_page_larger_than_scratch() {
        let size = STACK_BUFFER_SIZE as u32 * 2 + 50;
        let mut mapper = mapper(6, size, 4);
        assert!(!mapper.page_is_dirty(0).unwrap());
        // dirty only in the tail chunk past the scratch-buffer multiple
        let tail = mapper.flash.page_address(1) - 2;
        mapper.flash.write_page(&[0xF0], tail).unwrap();
        assert!(mapper.page_is_dirty(0).unwrap());
    }

    #[test]
    fn test_fresh_map_points_at_sentinel() {
        let mapper = mapper(40, 50, 20);
        for logical in 0..20usize {
            assert_eq!(mapper.map[logical], 39);
        }
    }

    #[test]
    fn test_format_writes_signature() {
        let mut mapper = mapper(6, 50, 4);
        assert_eq!(mapper.read_header(5).unwrap(), FORMAT_SIGNATURE);
    }

    #[test]
    fn test_remount_does_not_erase_again() {
        let mapper = mapper(6, 50, 4);
        let fake = mapper.into_inner();
        let erases = fake.total_erase_count();
        let mapper = LogicalPageMapper::new(fake, 4, rng()).unwrap();
        assert_eq!(mapper.into_inner().total_erase_count(), erases);
    }

    #[test]
    fn test_format_erases_junk_device() {
        // factory-fresh junk everywhere: format must erase every page
        let fake = FakeFlashDevice::new(6, 50);
        let mut mapper = LogicalPageMapper::new(fake, 4, rng()).unwrap();
        assert_eq!(mapper.read_header(5).unwrap(), FORMAT_SIGNATURE);
        for page in 0..5 {
            assert_eq!(mapper.read_header(page).unwrap(), HEADER_PRISTINE);
        }
    }

    #[test]
    fn test_allocation_writes_live_header() {
        let mut mapper = mapper(6, 50, 4);
        mapper.write_page(b"x", 0).unwrap();
        let physical = mapper.map[0] as u32;
        assert_ne!(physical, 5);
        assert!(mapper.is_in_use(physical));
        let header = mapper.read_header(physical).unwrap();
        assert!(header_in_use(header));
        assert_eq!(header_logical(header), 0);
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut mapper = mapper(40, 50, 20);
        mapper.write_erase_page(b"Hello", 75).unwrap();
        let mut buf = [0u8; 5];
        mapper.read_page(&mut buf, 75).unwrap();
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn test_destructive_rewrite_relocates() {
        let mut mapper = mapper(6, 50, 4);
        mapper.write_erase_page(&[0x0F], 10).unwrap();
        let first = mapper.map[0];
        // 0xF0 needs bits set that 0x0F cleared
        mapper.write_erase_page(&[0xF0], 10).unwrap();
        assert_eq!(mapper.read_byte(10).unwrap(), 0xF0);
        assert_ne!(mapper.map[0], first, "rewrite should remap the page");
    }

    #[test]
    fn test_relocation_preserves_rest_of_page() {
        let mut mapper = mapper(6, 50, 4);
        mapper.write_erase_page(b"abcdef", 0).unwrap();
        mapper.write_erase_page(&[0x00], 2).unwrap();
        mapper.write_erase_page(&[0xFF], 2).unwrap(); // forces relocation
        let mut buf = [0u8; 6];
        mapper.read_page(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"ab\xffdef");
    }

    #[test]
    fn test_erase_unallocated_page_is_noop() {
        let mut mapper = mapper(6, 50, 4);
        mapper.erase_page(0).unwrap();
        assert_eq!(mapper.read_byte(0).unwrap(), 0xFF);
    }

    #[test]
    fn test_erase_rebinds_fresh_page() {
        let mut mapper = mapper(6, 50, 4);
        mapper.write_erase_page(&[0x42], 0).unwrap();
        mapper.erase_page(0).unwrap();
        assert_eq!(mapper.read_byte(0).unwrap(), 0xFF);
        assert_ne!(mapper.map[0], 5, "erase should pre-allocate a new page");
    }

    #[test]
    fn test_retired_page_is_dead_on_remount() {
        let mut mapper = mapper(6, 50, 4);
        mapper.write_erase_page(&[0x0F], 0).unwrap();
        mapper.write_erase_page(&[0xF0], 0).unwrap(); // remaps, retiring one page
        let live = mapper.map[0];
        let mut mapper = LogicalPageMapper::new(mapper.into_inner(), 4, rng()).unwrap();
        assert_eq!(mapper.map[0], live);
        assert_eq!(mapper.read_byte(0).unwrap(), 0xF0);
    }

    #[test]
    fn test_rejects_page_crossing_write() {
        let mut mapper = mapper(6, 50, 4);
        // logical page size is 48; this write would cross into page 1
        assert_eq!(
            mapper.write_erase_page(&[0u8; 10], 44),
            Err(FlashError::InvalidAddress)
        );
    }
}
