//! The `FlashDevice` contract shared by every layer of a stack.
//!
//! A stack is built by wrapping: each translating layer owns an inner
//! device and implements the same trait, so any recipe from the crate
//! root can be capped by further layers or handed directly to a client.

use crate::error::FlashError;

/// Transformation applied to each chunk of a page while it is relocated.
///
/// The handler receives the chunk's byte offset within the page body and
/// the chunk itself, and may mutate the chunk in place before it is
/// written to the destination page.
pub type TransferHandler<'a> = dyn FnMut(u32, &mut [u8]) + 'a;

/// A page-erase flash device.
///
/// # Flash semantics
///
/// At every layer an erased page reads as all `0xFF`, and a plain
/// [`write_page`](Self::write_page) can only clear bits (the result is the
/// bitwise AND of the previous content and the data). Setting a cleared
/// bit requires [`erase_page`](Self::erase_page) on the containing page,
/// or [`write_erase_page`](Self::write_erase_page), which relocates or
/// erases behind the scenes so that the write window reads back exactly as
/// written.
///
/// Unless the layer documents otherwise (see
/// [`PageSpan`](crate::PageSpan)), the address range of a single transfer
/// must lie within one page.
pub trait FlashDevice {
    /// The size of each page in bytes.
    fn page_size(&self) -> u32;

    /// The number of pages in this device.
    fn page_count(&self) -> u32;

    /// Resets the page at `address` to all `0xFF`.
    ///
    /// Fails with [`FlashError::InvalidAddress`] if `address` is not
    /// page-aligned or lies outside the device.
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError>;

    /// Writes `data` at `address` without erasing.
    ///
    /// The stored result is the bitwise AND of the previous content and
    /// `data`; whether the write "takes" depends on the current state of
    /// the page.
    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError>;

    /// Reads `data.len()` bytes starting at `address`.
    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError>;

    /// Writes `data` at `address`, erasing or relocating beforehand if
    /// needed so that a subsequent read returns exactly `data`.
    fn write_erase_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError>;

    /// Rebuilds the page containing `address` by streaming its contents
    /// through `handler` in `scratch`-sized chunks.
    ///
    /// How the rebuilt content lands depends on the layer: the page mapper
    /// remaps to a fresh physical page, the single-page-wear layer bounces
    /// the content off its reserved scratch page. Raw devices report
    /// [`FlashError::Unsupported`].
    ///
    /// Handlers must not call back into the same device.
    fn copy_page(
        &mut self,
        address: u32,
        handler: &mut TransferHandler<'_>,
        scratch: &mut [u8],
    ) -> Result<(), FlashError>;

    /// The device length in bytes: `page_count() * page_size()`.
    fn length(&self) -> u32 {
        self.page_address(self.page_count())
    }

    /// Converts a page index into its starting byte address.
    fn page_address(&self, page: u32) -> u32 {
        page * self.page_size()
    }

    /// Whether `address` is the start of a page.
    fn is_page_address(&self, address: u32) -> bool {
        address % self.page_size() == 0
    }

    /// Rewrite-capable write; alias for
    /// [`write_erase_page`](Self::write_erase_page).
    fn write(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        self.write_erase_page(data, address)
    }

    /// Alias for [`read_page`](Self::read_page).
    fn read(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        self.read_page(data, address)
    }

    /// Rewrites the single byte at `address`.
    fn write_byte(&mut self, value: u8, address: u32) -> Result<(), FlashError> {
        self.write_erase_page(core::slice::from_ref(&value), address)
    }

    /// Reads the single byte at `address`.
    fn read_byte(&mut self, address: u32) -> Result<u8, FlashError> {
        let mut value = 0xFF;
        self.read_page(core::slice::from_mut(&mut value), address)?;
        Ok(value)
    }
}

impl<D: FlashDevice + ?Sized> FlashDevice for &mut D {
    fn page_size(&self) -> u32 {
        (**self).page_size()
    }

    fn page_count(&self) -> u32 {
        (**self).page_count()
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        (**self).erase_page(address)
    }

    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        (**self).write_page(data, address)
    }

    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        (**self).read_page(data, address)
    }

    fn write_erase_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        (**self).write_erase_page(data, address)
    }

    fn copy_page(
        &mut self,
        address: u32,
        handler: &mut TransferHandler<'_>,
        scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        (**self).copy_page(address, handler, scratch)
    }
}

/// Checks that `[address, address + len)` lies inside the device.
pub(crate) fn check_range<D: FlashDevice + ?Sized>(
    dev: &D,
    address: u32,
    len: usize,
) -> Result<(), FlashError> {
    let len = u32::try_from(len).map_err(|_| FlashError::InvalidAddress)?;
    match address.checked_add(len) {
        Some(end) if end <= dev.length() => Ok(()),
        _ => Err(FlashError::InvalidAddress),
    }
}

/// Checks that `[address, address + len)` lies inside the device and does
/// not cross a page boundary.
pub(crate) fn check_page_window<D: FlashDevice + ?Sized>(
    dev: &D,
    address: u32,
    len: usize,
) -> Result<(), FlashError> {
    check_range(dev, address, len)?;
    if (address % dev.page_size()) as usize + len > dev.page_size() as usize {
        return Err(FlashError::InvalidAddress);
    }
    Ok(())
}
