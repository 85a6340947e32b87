//! Copy-on-write rewrites using one reserved scratch page.

use crate::device::{check_page_window, check_range, FlashDevice, TransferHandler};
use crate::error::FlashError;
use crate::relocate::{copy_page_between, write_verify_relocate, STACK_BUFFER_SIZE};

/// The minimal rewrite-capable layer: the last underlying page is held
/// back as scratch, and a page rebuild bounces the content off it.
///
/// Every destructive rewrite costs two erases (scratch and source), and
/// the scratch page absorbs an erase for every rebuild anywhere in the
/// device, so this layer suits low-write-rate data only. The page mapper
/// is the wear-friendly alternative.
pub struct SinglePageWear<F> {
    flash: F,
}

impl<F: FlashDevice> SinglePageWear<F> {
    /// Wraps `flash`, reserving its last page.
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Consumes the wrapper and returns the inner device.
    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F: FlashDevice> FlashDevice for SinglePageWear<F> {
    fn page_size(&self) -> u32 {
        self.flash.page_size()
    }

    fn page_count(&self) -> u32 {
        self.flash.page_count() - 1
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if !self.is_page_address(address) || address >= self.length() {
            return Err(FlashError::InvalidAddress);
        }
        self.flash.erase_page(address)
    }

    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        self.flash.write_page(data, address)
    }

    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        self.flash.read_page(data, address)
    }

    fn write_erase_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_page_window(self, address, data.len())?;
        let mut scratch = [0u8; STACK_BUFFER_SIZE];
        write_verify_relocate(self, data, address, &mut scratch)
    }

    /// Rebuilds in place via the reserved page: erase scratch, stream the
    /// source through `handler` into scratch, erase the source, stream
    /// back verbatim.
    fn copy_page(
        &mut self,
        address: u32,
        handler: &mut TransferHandler<'_>,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        if address >= self.length() {
            return Err(FlashError::InvalidAddress);
        }
        let page_size = self.page_size();
        let source = address / page_size;
        let reserved = self.page_count();

        self.flash.erase_page(reserved * page_size)?;
        copy_page_between(&mut self.flash, source, reserved, 0, page_size, handler, scratch)?;
        self.flash.erase_page(source * page_size)?;
        copy_page_between(
            &mut self.flash,
            reserved,
            source,
            0,
            page_size,
            &mut |_, _: &mut [u8]| {},
            scratch,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeFlashDevice;

    fn wear() -> SinglePageWear<FakeFlashDevice> {
        let mut fake = FakeFlashDevice::new(4, 64);
        fake.erase_all();
        SinglePageWear::new(fake)
    }

    #[test]
    fn test_reserves_last_page() {
        let wear = wear();
        assert_eq!(wear.page_count(), 3);
        assert_eq!(wear.length(), 3 * 64);
    }

    #[test]
    fn test_reserved_page_not_addressable() {
        let mut wear = wear();
        let mut buf = [0u8; 1];
        assert_eq!(
            wear.read_page(&mut buf, 3 * 64),
            Err(FlashError::InvalidAddress)
        );
        assert_eq!(wear.erase_page(3 * 64), Err(FlashError::InvalidAddress));
    }

    #[test]
    fn test_destructive_rewrite_in_place() {
        let mut wear = wear();
        wear.write_erase_page(b"first", 10).unwrap();
        wear.write_erase_page(b"SECON", 10).unwrap();
        let mut buf = [0u8; 5];
        wear.read_page(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"SECON");
    }

    #[test]
    fn test_rewrite_preserves_rest_of_page() {
        let mut wear = wear();
        wear.write_erase_page(b"abcdef", 0).unwrap();
        wear.write_erase_page(b"XY", 2).unwrap();
        let mut buf = [0u8; 6];
        wear.read_page(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"abXYef");
    }

    #[test]
    fn test_rebuild_uses_scratch_page_erases() {
        let mut wear = wear();
        wear.write_erase_page(&[0x00], 0).unwrap();
        wear.write_erase_page(&[0xFF], 0).unwrap(); // needs a rebuild
        let fake = wear.into_inner();
        assert_eq!(fake.erase_count(3), 1, "scratch page erased once");
        assert_eq!(fake.erase_count(0), 1, "source page erased once");
    }
}
