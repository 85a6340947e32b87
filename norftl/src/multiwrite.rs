//! Redundant slot storage: seven destructive rewrites per byte without an
//! erase.
//!
//! Each exposed logical byte owns an 8-byte slot in the underlying page.
//! The first slot byte is a bitmap — bit `i` is cleared once data byte
//! `i + 1` has been written — and the remaining seven bytes hold
//! successive values of the logical byte. A rewrite that plain AND cannot
//! express just claims the next slot byte; only when all seven are spent
//! does the page need rebuilding, which the underlying layer does by
//! relocation while this layer compacts every slot back to a single entry.

use crate::device::{check_page_window, FlashDevice, TransferHandler};
use crate::error::FlashError;
use crate::relocate::{ExcludeRegion, STACK_BUFFER_SIZE};

/// Bytes of underlying storage per exposed logical byte.
pub(crate) const SLOT_SIZE: usize = 8;

const SLOT_SHIFT: u32 = 3;

/// Value bytes in a slot (everything but the bitmap).
const DATA_BYTES_PER_SLOT: usize = 7;

/// Index of the slot byte currently holding the value.
///
/// The lowest set bitmap bit marks the live entry; a pristine bitmap
/// (`0xFF`) yields index 0, the bitmap itself, which conveniently reads
/// as the erased value. A fully zeroed bitmap (possible only through raw
/// AND writes) clamps to the last entry.
fn slot_index(bitmap: u8) -> usize {
    (bitmap.trailing_zeros() as usize).min(DATA_BYTES_PER_SLOT)
}

/// Reads the current value of a slot.
pub(crate) fn read_slot(slot: &[u8]) -> u8 {
    slot[slot_index(slot[0])]
}

/// Writes `value` into `slot`, claiming the next entry if the current one
/// cannot absorb the write by AND.
///
/// Returns `false` when the slot is exhausted. With `in_place` the AND
/// result is accepted even when it differs from `value` — the raw-write
/// path uses this to model plain flash semantics, and it never fails.
pub(crate) fn write_slot(value: u8, slot: &mut [u8], in_place: bool) -> bool {
    let bitmap = slot[0];
    if bitmap == 0xFF {
        if value != 0xFF {
            slot[1] = value;
            slot[0] = 0xFE;
        }
        return true;
    }

    let index = slot_index(bitmap);
    slot[index] &= value;
    if slot[index] == value || in_place {
        return true;
    }
    if index < DATA_BYTES_PER_SLOT {
        slot[0] = bitmap << 1;
        slot[index + 1] = value;
        return true;
    }
    false
}

/// Rewrites `slot` as a fresh single-entry slot holding its current value.
pub(crate) fn compact_slot(slot: &mut [u8]) {
    let value = read_slot(slot);
    slot.fill(0xFF);
    write_slot(value, slot, false);
}

/// A multi-write store over a page device.
///
/// Page count is unchanged; exposed pages are an eighth of the underlying
/// size. Relocation is delegated downward, so the layer below must
/// support [`copy_page`](FlashDevice::copy_page) for rewrites beyond the
/// seventh to succeed.
pub struct MultiWriteStore<F> {
    flash: F,
}

impl<F: FlashDevice> MultiWriteStore<F> {
    /// Wraps `flash`.
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Consumes the wrapper and returns the inner device.
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Maps a logical byte address to the underlying address of its slot.
    fn to_physical(&self, address: u32) -> u32 {
        let size = self.page_size();
        let page = address / size;
        let offset = address % size;
        self.flash.page_address(page) + (offset << SLOT_SHIFT)
    }

    /// Relocation handler: compacts every slot except those in `exclude`
    /// (in logical-byte units), which are blanked for the pending write.
    fn compact_page_handler(exclude: &ExcludeRegion, chunk_offset: u32, chunk: &mut [u8]) {
        let whole = chunk.len() & !(SLOT_SIZE - 1);
        for i in (0..whole).step_by(SLOT_SIZE) {
            let logical = (chunk_offset + i as u32) >> SLOT_SHIFT;
            let slot = &mut chunk[i..i + SLOT_SIZE];
            if exclude.contains(logical) {
                slot.fill(0xFF);
            } else {
                compact_slot(slot);
            }
        }
    }

    fn write_erase_slots(
        &mut self,
        data: &[u8],
        address: u32,
        buf: &mut [u8],
    ) -> Result<(), FlashError> {
        let mut data = data;
        let mut address = address;

        'relocated: loop {
            let mut offset = 0usize;

            while offset < data.len() {
                let logical_chunk = (buf.len() >> SLOT_SHIFT).min(data.len() - offset);
                let base_chunk = logical_chunk << SLOT_SHIFT;
                let dest = self.to_physical(address + offset as u32);
                self.flash.read_page(&mut buf[..base_chunk], dest)?;

                for i in 0..logical_chunk {
                    let slot = &mut buf[i << SLOT_SHIFT..(i + 1) << SLOT_SHIFT];
                    if write_slot(data[offset + i], slot, false) {
                        continue;
                    }

                    // Slot exhausted. Flush the slots already claimed in
                    // this chunk, then have the layer below rebuild the
                    // page with every other slot compacted and the
                    // pending window blanked.
                    if i > 0 {
                        self.flash.write_page(&buf[..i << SLOT_SHIFT], dest)?;
                    }
                    let done = offset + i;
                    let page_offset = address % self.page_size();
                    let exclude = ExcludeRegion {
                        start: page_offset + done as u32,
                        end: page_offset + data.len() as u32,
                    };
                    let target = self.to_physical(address);
                    self.flash.copy_page(
                        target,
                        &mut |chunk_offset, chunk: &mut [u8]| {
                            Self::compact_page_handler(&exclude, chunk_offset, chunk)
                        },
                        buf,
                    )?;

                    data = &data[done..];
                    address += done as u32;
                    continue 'relocated;
                }

                self.flash.write_page(&buf[..base_chunk], dest)?;
                offset += logical_chunk;
            }

            return Ok(());
        }
    }
}

impl<F: FlashDevice> FlashDevice for MultiWriteStore<F> {
    fn page_size(&self) -> u32 {
        self.flash.page_size() >> SLOT_SHIFT
    }

    fn page_count(&self) -> u32 {
        self.flash.page_count()
    }

    /// Erases by erasing the corresponding underlying page.
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        self.flash.erase_page(self.to_physical(address))
    }

    /// Raw write path: every slot takes the AND of its current value, the
    /// same observable behavior a plain flash write would have.
    fn write_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_page_window(self, address, data.len())?;
        let mut buf = [0u8; STACK_BUFFER_SIZE];
        let mut offset = 0usize;

        while offset < data.len() {
            let logical_chunk = (buf.len() >> SLOT_SHIFT).min(data.len() - offset);
            let base_chunk = logical_chunk << SLOT_SHIFT;
            let dest = self.to_physical(address + offset as u32);
            self.flash.read_page(&mut buf[..base_chunk], dest)?;

            for i in 0..logical_chunk {
                let slot = &mut buf[i << SLOT_SHIFT..(i + 1) << SLOT_SHIFT];
                write_slot(data[offset + i], slot, true);
            }

            self.flash.write_page(&buf[..base_chunk], dest)?;
            offset += logical_chunk;
        }
        Ok(())
    }

    fn read_page(&mut self, data: &mut [u8], address: u32) -> Result<(), FlashError> {
        check_page_window(self, address, data.len())?;
        let mut buf = [0u8; STACK_BUFFER_SIZE];
        let mut offset = 0usize;

        while offset < data.len() {
            let logical_chunk = (buf.len() >> SLOT_SHIFT).min(data.len() - offset);
            let base_chunk = logical_chunk << SLOT_SHIFT;
            let src = self.to_physical(address + offset as u32);
            self.flash.read_page(&mut buf[..base_chunk], src)?;

            for i in 0..logical_chunk {
                data[offset + i] = read_slot(&buf[i << SLOT_SHIFT..(i + 1) << SLOT_SHIFT]);
            }
            offset += logical_chunk;
        }
        Ok(())
    }

    fn write_erase_page(&mut self, data: &[u8], address: u32) -> Result<(), FlashError> {
        check_page_window(self, address, data.len())?;
        let mut buf = [0u8; STACK_BUFFER_SIZE];
        self.write_erase_slots(data, address, &mut buf)
    }

    /// Not supported; rebuilding goes through the layer below via the
    /// compacting relocation in the write path.
    fn copy_page(
        &mut self,
        _address: u32,
        _handler: &mut TransferHandler<'_>,
        _scratch: &mut [u8],
    ) -> Result<(), FlashError> {
        Err(FlashError::Unsupported)
    }
}
