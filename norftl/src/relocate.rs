//! The shared copy-on-write write path.
//!
//! Layers that can rebuild a page ([`LogicalPageMapper`] by remapping,
//! [`SinglePageWear`] via its reserved scratch page) all write through the
//! same verify-then-relocate loop: write, read back, and if the flash
//! could not take the data, relocate the page with the pending write
//! window blanked and retry on the fresh page.
//!
//! [`LogicalPageMapper`]: crate::LogicalPageMapper
//! [`SinglePageWear`]: crate::SinglePageWear

use crate::device::{FlashDevice, TransferHandler};
use crate::error::FlashError;

/// Scratch buffer size used by the write-verify and relocation loops.
///
/// Must be a multiple of the 8-byte slot size so slot-store relocation
/// never splits a slot across chunks.
pub const STACK_BUFFER_SIZE: usize = 128;

/// A byte range within a page body that relocation must not copy.
///
/// Chunks streamed through [`exclude_blank_handler`] have the covered
/// bytes forced to `0xFF`, so the destination page stays erased exactly
/// where the caller is about to write.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExcludeRegion {
    /// First excluded page offset.
    pub start: u32,
    /// One past the last excluded page offset.
    pub end: u32,
}

impl ExcludeRegion {
    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Blanks the excluded portion of `chunk`, which starts at
    /// `page_offset` within the page body.
    pub fn blank(&self, page_offset: u32, chunk: &mut [u8]) {
        for (i, byte) in chunk.iter_mut().enumerate() {
            if self.contains(page_offset + i as u32) {
                *byte = 0xFF;
            }
        }
    }
}

/// Writes `data` at `address` on `dev`, relocating the page whenever the
/// flash cannot take the data by AND alone.
///
/// The loop writes and verifies in `scratch`-sized chunks. On a verify
/// mismatch the page is rebuilt through `dev`'s own
/// [`copy_page`](FlashDevice::copy_page) with the still-pending portion of
/// the write window blanked to `0xFF`; the bytes already verified are
/// carried over as ordinary page content. The write then resumes on the
/// fresh page.
///
/// The window must lie within a single page of `dev`; callers check this
/// before delegating here.
pub(crate) fn write_verify_relocate<D: FlashDevice + ?Sized>(
    dev: &mut D,
    data: &[u8],
    address: u32,
    scratch: &mut [u8],
) -> Result<(), FlashError> {
    let mut data = data;
    let mut address = address;

    'relocated: loop {
        let page_offset = address % dev.page_size();
        let mut offset = 0usize;

        while offset < data.len() {
            let chunk = scratch.len().min(data.len() - offset);
            let dest = address + offset as u32;

            dev.write_page(&data[offset..offset + chunk], dest)?;
            dev.read_page(&mut scratch[..chunk], dest)?;

            if scratch[..chunk] != data[offset..offset + chunk] {
                // The page holds bits the write needed set. Rebuild it
                // with the pending window blanked, then resume there.
                let exclude = ExcludeRegion {
                    start: page_offset + offset as u32,
                    end: page_offset + data.len() as u32,
                };
                dev.copy_page(
                    address,
                    &mut |chunk_offset, buf: &mut [u8]| exclude.blank(chunk_offset, buf),
                    scratch,
                )?;

                data = &data[offset..];
                address += offset as u32;
                continue 'relocated;
            }

            offset += chunk;
        }

        return Ok(());
    }
}

/// Streams `len` bytes from the body of `src_page` to the body of
/// `dest_page` on `dev`, passing each chunk through `handler`.
///
/// `body_offset` shifts both endpoints past any per-page metadata the
/// caller maintains.
pub(crate) fn copy_page_between<D: FlashDevice + ?Sized>(
    dev: &mut D,
    src_page: u32,
    dest_page: u32,
    body_offset: u32,
    len: u32,
    handler: &mut TransferHandler<'_>,
    scratch: &mut [u8],
) -> Result<(), FlashError> {
    let src_base = dev.page_address(src_page) + body_offset;
    let dest_base = dev.page_address(dest_page) + body_offset;
    let mut offset = 0u32;

    while offset < len {
        let chunk = (scratch.len() as u32).min(len - offset) as usize;
        dev.read_page(&mut scratch[..chunk], src_base + offset)?;
        handler(offset, &mut scratch[..chunk]);
        dev.write_page(&scratch[..chunk], dest_base + offset)?;
        offset += chunk as u32;
    }

    Ok(())
}
