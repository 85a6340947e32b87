//! Adapter for `embedded-storage` NOR flash drivers.

use embedded_storage::nor_flash::NorFlash;

use crate::device::{check_range, FlashDevice, TransferHandler};
use crate::error::FlashError;

/// The bottom of a stack: any [`embedded_storage`] NOR flash driver
/// exposed as a [`FlashDevice`].
///
/// Pages are the driver's erase sectors. The raw chip cannot set cleared
/// bits or relocate, so [`write_erase_page`](FlashDevice::write_erase_page)
/// and [`copy_page`](FlashDevice::copy_page) report
/// [`FlashError::Unsupported`]; those capabilities come from the layers
/// stacked above.
pub struct NorFlashDevice<F> {
    flash: F,
}

impl<F: NorFlash> NorFlashDevice<F> {
    /// Wraps `flash`.
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Consumes the adapter and returns the driver.
    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F: NorFlash> FlashDevice for NorFlashDevice<F> {
    fn page_size(&self) -> u32 {
        F::ERASE_SIZE as u32
    }

    fn page_count(&self) -> u32 {
        (self.flash.capacity() / F::ERASE_SIZE) as u32
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if !self.is_page_address(address) || address >= self.length() {
            return Err(FlashError::InvalidAddress);
        }
        self.flash
            .erase(address, address + F::ERASE_SIZE as u32)
            .map_err(|_| FlashError::Device)
    }

    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        self.flash.write(address, data).map_err(|_| FlashError::Device)
    }

    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        check_range(self, address, data.len())?;
        self.flash.read(address, data).map_err(|_| FlashError::Device)
    }

    fn write_erase_page(&mut self, _data: &[u8], _address: u32) -> Result<(), FlashError> {
        Err(FlashError::Unsupported)
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
