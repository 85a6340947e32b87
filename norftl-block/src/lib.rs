//! 512-byte-sector block device facade over a `norftl` stack.
//!
//! FAT libraries speak in sectors; the wear-levelled stacks speak in
//! byte-addressable logical pages. [`FlashBlockDevice`] bridges the two by
//! implementing [`block_device_driver::BlockDevice`] with 512-byte blocks
//! over any spanning-capable [`FlashDevice`], and [`fat_region`] builds
//! the whole recommended stack in one call, applying the boot-sector
//! format policy on the way up.
//!
//! Filesystem creation itself belongs to the FAT library; when
//! [`fat_region`] reports [`FormatOutcome::Formatted`], run its `mkfs`
//! before mounting.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

use aligned::{Aligned, A4};
use block_device_driver::BlockDevice;
use rand_core::RngCore;

use norftl::stacks::{self, WearLevelStack};
use norftl::{FlashDevice, FlashError};

/// Sector size presented to the FAT layer.
pub const SECTOR_SIZE: usize = 512;

/// Offset of the two boot-signature bytes within sector 0.
const BOOT_SIGNATURE_OFFSET: u32 = 510;

/// The BIOS boot signature closing a valid boot sector.
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Low-level format policy applied by [`fat_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormatMode {
    /// Never touch the device; report [`FormatOutcome::NoFilesystem`]
    /// when the boot signature is missing.
    Never,
    /// Format only when sector 0 carries neither a boot signature nor
    /// the erased pattern.
    IfNeeded,
    /// Format unconditionally.
    Always,
}

/// What [`fat_region`] found, and did, on the way up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormatOutcome {
    /// A boot signature is present; mount directly.
    Ready,
    /// The device is blank or was just low-level formatted; run the FAT
    /// library's `mkfs` before mounting.
    Formatted,
    /// No filesystem and formatting was not permitted.
    NoFilesystem,
}

/// Exposes a [`FlashDevice`] as a 512-byte block device.
///
/// The wrapped device must accept transfers that span its pages (wrap it
/// in [`norftl::PageSpan`] if in doubt): logical page sizes are generally
/// not sector multiples, so sectors routinely straddle page boundaries.
pub struct FlashBlockDevice<D> {
    flash: D,
}

impl<D: FlashDevice> FlashBlockDevice<D> {
    /// Wraps `flash`.
    pub fn new(flash: D) -> Self {
        Self { flash }
    }

    /// Consumes the facade and returns the wrapped device.
    pub fn into_inner(self) -> D {
        self.flash
    }

    /// Number of whole sectors the device can hold.
    pub fn sector_count(&self) -> u32 {
        self.flash.length() / SECTOR_SIZE as u32
    }

    /// Sectors per erase unit of the wrapped device.
    pub fn blocks_per_page(&self) -> u32 {
        self.flash.page_size() / SECTOR_SIZE as u32
    }
}

impl<D: FlashDevice> BlockDevice<SECTOR_SIZE> for FlashBlockDevice<D> {
    type Error = FlashError;
    type Align = A4;

    async fn read(
        &mut self,
        block_address: u32,
        data: &mut [Aligned<Self::Align, [u8; SECTOR_SIZE]>],
    ) -> Result<(), Self::Error> {
        for (i, block) in data.iter_mut().enumerate() {
            let address = (block_address + i as u32) * SECTOR_SIZE as u32;
            self.flash.read(&mut block[..], address)?;
        }
        Ok(())
    }

    async fn write(
        &mut self,
        block_address: u32,
        data: &[Aligned<Self::Align, [u8; SECTOR_SIZE]>],
    ) -> Result<(), Self::Error> {
        for (i, block) in data.iter().enumerate() {
            let address = (block_address + i as u32) * SECTOR_SIZE as u32;
            self.flash.write(&block[..], address)?;
        }
        Ok(())
    }

    async fn size(&mut self) -> Result<u64, Self::Error> {
        Ok(self.flash.length() as u64)
    }
}

/// The block device type produced by [`fat_region`].
pub type FatRegion<F, R> = FlashBlockDevice<WearLevelStack<F, R>>;

/// Builds the wear-levelled FAT stack over `[start, end)` of `flash` and
/// applies the format policy.
///
/// The stack reserves two spare pages for wear levelling. The probe reads
/// the two boot-signature bytes of sector 0: `0x55 0xAA` means a
/// filesystem is present, all-`0xFF` means the region is blank, anything
/// else is junk that [`FormatMode::IfNeeded`] clears by erasing every
/// logical page.
pub fn fat_region<F, R>(
    flash: F,
    start: u32,
    end: u32,
    mode: FormatMode,
    rng: R,
) -> Result<(FatRegion<F, R>, FormatOutcome), FlashError>
where
    F: FlashDevice,
    R: RngCore,
{
    let mut stack = stacks::wear_level_erase(flash, start, end, 2, rng)?;

    let mut signature = [0u8; 2];
    stack.read(&mut signature, BOOT_SIGNATURE_OFFSET)?;

    let outcome = match mode {
        FormatMode::Never => {
            if signature == BOOT_SIGNATURE {
                FormatOutcome::Ready
            } else {
                FormatOutcome::NoFilesystem
            }
        }
        FormatMode::IfNeeded => {
            if signature == BOOT_SIGNATURE {
                FormatOutcome::Ready
            } else {
                if signature != [0xFF, 0xFF] {
                    low_level_format(&mut stack)?;
                }
                FormatOutcome::Formatted
            }
        }
        FormatMode::Always => {
            low_level_format(&mut stack)?;
            FormatOutcome::Formatted
        }
    };

    Ok((FlashBlockDevice::new(stack), outcome))
}

/// Erases every logical page of the stack.
fn low_level_format<D: FlashDevice>(stack: &mut D) -> Result<(), FlashError> {
    let page_size = stack.page_size();
    for page in 0..stack.page_count() {
        stack.erase_page(page * page_size)?;
    }
    Ok(())
}
