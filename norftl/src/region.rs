//! Page-aligned windows onto an underlying device.

use crate::device::{check_range, FlashDevice, TransferHandler};
use crate::error::FlashError;

/// A contiguous, page-aligned sub-range of another flash device.
///
/// Addresses `[0, end - base)` map to `[base, end)` on the inner device.
/// Every recipe in this crate is rooted in a region, so the layers above
/// never see absolute chip addresses.
pub struct FlashRegion<F> {
    flash: F,
    base: u32,
    end: u32,
}

impl<F: FlashDevice> FlashRegion<F> {
    /// Creates a region spanning all of `flash`.
    pub fn whole(flash: F) -> Self {
        let end = flash.length();
        Self { flash, base: 0, end }
    }

    /// Creates a region over `[start, end)` of `flash`.
    ///
    /// Both bounds must be page-aligned and `end` must not exceed the
    /// device length; otherwise [`FlashError::InvalidAddress`].
    pub fn new(flash: F, start: u32, end: u32) -> Result<Self, FlashError> {
        if start >= end
            || !flash.is_page_address(start)
            || !flash.is_page_address(end)
            || end > flash.length()
        {
            return Err(FlashError::InvalidAddress);
        }
        Ok(Self { flash, base: start, end })
    }

    /// Creates a nested region over `[start, end)` of this region,
    /// borrowing the same underlying device.
    pub fn subregion(&mut self, start: u32, end: u32) -> Result<FlashRegion<&mut F>, FlashError> {
        let size = self.end - self.base;
        if start >= end
            || !self.flash.is_page_address(start)
            || !self.flash.is_page_address(end)
            || end > size
        {
            return Err(FlashError::InvalidAddress);
        }
        Ok(FlashRegion {
            flash: &mut self.flash,
            base: self.base + start,
            end: self.base + end,
        })
    }

    /// Consumes the region and returns the inner device.
    pub fn into_inner(self) -> F {
        self.flash
    }

    fn translate(&self, address: u32) -> u32 {
        self.base + address
    }
}

impl<F: FlashDevice> FlashDevice for FlashRegion<F> {
    fn page_size(&self) -> u32 {
        self.flash.page_size()
    }

    fn page_count(&self) -> u32 {
        (self.end - self.base) / self.flash.page_size()
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if !self.is_page_address(address) || address >= self.length() {
            return Err(FlashError::InvalidAddress);
        }
        let dest = self.translate(address);
        self.flash.erase_page(dest)
    }

    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        let dest = self.translate(address);
        self.flash.write_page(data, dest)
    }

    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        let dest = self.translate(address);
        self.flash.read_page(data, dest)
    }

    fn write_erase_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        let dest = self.translate(address);
        self.flash.write_erase_page(data, dest)
    }

    fn copy_page(
        &mut self,
        address: u32,
        handler: &mut TransferHandler<'_>,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        if address >= self.length() {
            return Err(FlashError::InvalidAddress);
        }
        let dest = self.translate(address);
        self.flash.copy_page(dest, handler, scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeFlashDevice;

    fn fake() -> FakeFlashDevice {
        let mut fake = FakeFlashDevice::new(8, 64);
        fake.erase_all();
        fake
    }

    #[test]
    fn test_rejects_unaligned_bounds() {
        assert!(FlashRegion::new(fake(), 10, 128).is_err());
        assert!(FlashRegion::new(fake(), 0, 100).is_err());
        assert!(FlashRegion::new(fake(), 128, 64).is_err());
        assert!(FlashRegion::new(fake(), 0, 64 * 9).is_err());
        assert!(FlashRegion::new(fake(), 64, 256).is_ok());
    }

    #[test]
    fn test_translates_addresses() {
        let mut region = FlashRegion::new(fake(), 128, 256).unwrap();
        assert_eq!(region.page_count(), 2);
        assert_eq!(region.length(), 128);

        region.write_page(b"hi", 0).unwrap();
        let mut fake = region.into_inner();
        let mut buf = [0u8; 2];
        fake.read_page(&mut buf, 128).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn test_rejects_out_of_window_access() {
        let mut region = FlashRegion::new(fake(), 128, 256).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            region.read_page(&mut buf, 126),
            Err(FlashError::InvalidAddress)
        );
        assert_eq!(region.erase_page(128), Err(FlashError::InvalidAddress));
        assert_eq!(region.erase_page(32), Err(FlashError::InvalidAddress));
        region.erase_page(64).unwrap();
    }

    #[test]
    fn test_subregion_nests() {
        let mut region = FlashRegion::new(fake(), 64, 64 * 7).unwrap();
        {
            let mut sub = region.subregion(64, 192).unwrap();
            assert_eq!(sub.page_count(), 2);
            sub.write_page(b"abc", 0).unwrap();
        }
        let mut buf = [0u8; 3];
        region.read_page(&mut buf, 64).unwrap();
        assert_eq!(&buf, b"abc");

        assert!(region.subregion(10, 64).is_err());
        assert!(region.subregion(0, 64 * 8).is_err());
    }
}
