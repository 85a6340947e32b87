//! Lifts the single-page restriction from an underlying device.

use crate::device::{check_range, FlashDevice, TransferHandler};
use crate::error::FlashError;

/// A wrapper that splits transfers at page boundaries.
///
/// The wrapped device keeps its geometry; reads, writes and rewrites of
/// any length and offset are chopped into page-local chunks and delegated
/// one by one. `erase_page` and `copy_page` are inherently page-local and
/// forward unchanged.
pub struct PageSpan<F> {
    flash: F,
}

impl<F: FlashDevice> PageSpan<F> {
    /// Wraps `flash`.
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Consumes the wrapper and returns the inner device.
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Splits `[address, address + len)` into page-local chunks and hands
    /// each `(chunk_range, address)` pair to `op`.
    fn chunked(
        &mut self,
        address: u32,
        len: usize,
        mut op: impl FnMut(&mut F, core::ops::Range<usize>, u32) -> Result<(), FlashError>,
    ) -> Result<(), FlashError> {
        let page_size = self.flash.page_size();
        let mut offset = address % page_size;
        let mut address = address;
        let mut done = 0usize;

        while done < len {
            let chunk = ((page_size - offset) as usize).min(len - done);
            op(&mut self.flash, done..done + chunk, address)?;
            address += chunk as u32;
            done += chunk;
            offset = 0;
        }
        Ok(())
    }
}

impl<F: FlashDevice> FlashDevice for PageSpan<F> {
    fn page_size(&self) -> u32 {
        self.flash.page_size()
    }

    fn page_count(&self) -> u32 {
        self.flash.page_count()
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        self.flash.erase_page(address)
    }

    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        self.chunked(address, data.len(), |flash, range, address| {
            flash.write_page(&data[range], address)
        })
    }

    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        let len = data.len();
        self.chunked(address, len, |flash, range, address| {
            flash.read_page(&mut data[range], address)
        })
    }

    fn write_erase_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        self.chunked(address, data.len(), |flash, range, address| {
            flash.write_erase_page(&data[range], address)
        })
    }

    fn copy_page(
        &mut self,
        address: u32,
        handler: &mut TransferHandler<'_>,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        self.flash.copy_page(address, handler, scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeFlashDevice;

    #[test]
    fn test_write_and_read_across_pages() {
        let mut fake = FakeFlashDevice::new(4, 16);
        fake.erase_all();
        let mut span = PageSpan::new(fake);

        let data: [u8; 40] = core::array::from_fn(|i| i as u8);
        span.write_page(&data, 10).unwrap();

        let mut buf = [0u8; 40];
        span.read_page(&mut buf, 10).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_chunks_respect_page_boundaries() {
        // verify the boundary math by checking where the bytes landed
        let mut fake = FakeFlashDevice::new(3, 16);
        fake.erase_all();
        let mut span = PageSpan::new(fake);
        span.write_page(&[1, 2, 3, 4], 14).unwrap();

        let mut fake = span.into_inner();
        assert_eq!(fake.read_byte(14).unwrap(), 1);
        assert_eq!(fake.read_byte(15).unwrap(), 2);
        assert_eq!(fake.read_byte(16).unwrap(), 3);
        assert_eq!(fake.read_byte(17).unwrap(), 4);
    }

    #[test]
    fn test_out_of_range_still_rejected() {
        let mut fake = FakeFlashDevice::new(2, 16);
        fake.erase_all();
        let mut span = PageSpan::new(fake);
        assert_eq!(
            span.write_page(&[0u8; 8], 28),
            Err(FlashError::InvalidAddress)
        );
    }
}
