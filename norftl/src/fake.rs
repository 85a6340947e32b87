//! In-memory emulated NOR flash for tests and host-side tooling.

use alloc::vec::Vec;

use crate::device::{check_range, FlashDevice, TransferHandler};
use crate::error::FlashError;

/// A heap-backed flash device emulating NOR semantics.
///
/// Plain writes are ANDed into the backing store and erases reset whole
/// pages to `0xFF`, so every bit-clearing subtlety of real flash is
/// reproduced. The backing store starts out filled with junk, the same as
/// a factory-fresh chip of unknown history; call
/// [`erase_all`](Self::erase_all) before first use.
///
/// Per-page erase counters are kept so tests can assert wear behavior.
pub struct FakeFlashDevice {
    page_count: u32,
    page_size: u32,
    data: Vec<u8>,
    erase_counts: Vec<u32>,
}

impl FakeFlashDevice {
    /// Creates a device of `page_count` pages of `page_size` bytes each.
    pub fn new(page_count: u32, page_size: u32) -> Self {
        let len = (page_count * page_size) as usize;
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            data.push((i as u8).wrapping_mul(31) ^ 0x5A);
        }
        Self {
            page_count,
            page_size,
            data,
            erase_counts: alloc::vec![0; page_count as usize],
        }
    }

    /// Resets the whole device to the erased state.
    ///
    /// Does not touch the erase counters.
    pub fn erase_all(&mut self) {
        self.data.fill(0xFF);
    }

    /// How many times the page at index `page` has been erased.
    pub fn erase_count(&self, page: u32) -> u32 {
        self.erase_counts[page as usize]
    }

    /// Total erases issued across all pages.
    pub fn total_erase_count(&self) -> u32 {
        self.erase_counts.iter().sum()
    }
}

impl FlashDevice for FakeFlashDevice {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if !self.is_page_address(address) || address >= self.length() {
            return Err(FlashError::InvalidAddress);
        }
        let start = address as usize;
        let end = start + self.page_size as usize;
        self.data[start..end].fill(0xFF);
        self.erase_counts[(address / self.page_size) as usize] += 1;
        Ok(())
    }

    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        let start = address as usize;
        for (cell, byte) in self.data[start..start + data.len()].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }

    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        let start = address as usize;
        data.copy_from_slice(&self.data[start..start + data.len()]);
        Ok(())
    }

    /// Direct overwrite, bypassing the AND semantics.
    ///
    /// Mirrors the word-granular programming of the real chip: the window
    /// must start at an even address and have even length.
    fn write_erase_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        if address % 2 != 0 || data.len() % 2 != 0 {
            return Err(FlashError::InvalidAddress);
        }
        let start = address as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn copy_page(
        &mut self,
        _address: u32,
        _handler: &mut TransferHandler<'_>,
        _scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        Err(FlashError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_size() {
        let fake = FakeFlashDevice::new(100, 202);
        assert_eq!(fake.length(), 20200);

        let fake = FakeFlashDevice::new(6, 2 + 20 * 8);
        assert_eq!(fake.length(), (20 * 8 + 2) * 6);
    }

    #[test]
    fn test_erase_all_reads_ff_everywhere() {
        let mut fake = FakeFlashDevice::new(40, 50);
        fake.erase_all();
        let mut buf = [0u8; 50];
        for page in 0..fake.page_count() {
            let address = fake.page_address(page);
            fake.read_page(&mut buf, address).unwrap();
            assert!(buf.iter().all(|&b| b == 0xFF), "page {} not erased", page);
        }
    }

    #[test]
    fn test_write_is_bitwise_and() {
        let mut fake = FakeFlashDevice::new(2, 64);
        fake.erase_all();
        fake.write_page(&[0b1100_1100], 5).unwrap();
        fake.write_page(&[0b1010_1010], 5).unwrap();
        assert_eq!(fake.read_byte(5).unwrap(), 0b1000_1000);
    }

    #[test]
    fn test_erase_page_requires_alignment() {
        let mut fake = FakeFlashDevice::new(2, 64);
        assert_eq!(fake.erase_page(1), Err(FlashError::InvalidAddress));
        assert_eq!(fake.erase_page(128), Err(FlashError::InvalidAddress));
        fake.erase_page(64).unwrap();
        assert_eq!(fake.erase_count(1), 1);
        assert_eq!(fake.erase_count(0), 0);
    }

    #[test]
    fn test_write_erase_requires_even_window() {
        let mut fake = FakeFlashDevice::new(2, 64);
        fake.erase_all();
        assert_eq!(
            fake.write_erase_page(&[0, 0], 1),
            Err(FlashError::InvalidAddress)
        );
        assert_eq!(
            fake.write_erase_page(&[0], 2),
            Err(FlashError::InvalidAddress)
        );
        // direct write can set bits again
        fake.write_page(&[0x00, 0x00], 2).unwrap();
        fake.write_erase_page(&[0xAB, 0xCD], 2).unwrap();
        let mut buf = [0u8; 2];
        fake.read_page(&mut buf, 2).unwrap();
        assert_eq!(buf, [0xAB, 0xCD]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut fake = FakeFlashDevice::new(2, 64);
        let mut buf = [0u8; 4];
        assert_eq!(
            fake.read_page(&mut buf, 126),
            Err(FlashError::InvalidAddress)
        );
        assert_eq!(
            fake.write_page(&buf, 126),
            Err(FlashError::InvalidAddress)
        );
    }
}
