//! A producer/consumer byte log over a page-erase device.

use crate::device::FlashDevice;
use crate::error::FlashError;

/// A circular FIFO of bytes stored in flash.
///
/// The writer erases each destination page as it enters it, so the
/// reader's current page is off limits: when the writer catches up to the
/// page the reader is inside, [`write`](Self::write) accepts nothing
/// until the reader moves on. Both sides make short transfers near the
/// wrap point and expect the caller to loop.
///
/// Pointers live only in RAM; the log does not survive a restart.
pub struct CircularBuffer<F> {
    flash: F,
    write_ptr: u32,
    read_ptr: u32,
    capacity: u32,
    size: u32,
}

impl<F: FlashDevice> CircularBuffer<F> {
    /// Creates a buffer over all of `flash`.
    ///
    /// Requires at least two pages: with a single page the writer could
    /// never erase without taking the reader's page.
    pub fn new(flash: F) -> Result<Self, FlashError> {
        if flash.page_count() < 2 {
            return Err(FlashError::InvalidAddress);
        }
        let capacity = flash.length();
        Ok(Self {
            flash,
            write_ptr: 0,
            read_ptr: 0,
            capacity,
            size: 0,
        })
    }

    /// Consumes the buffer and returns the inner device.
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Bytes currently stored and readable.
    pub fn available(&self) -> u32 {
        self.size
    }

    /// Total byte capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Appends up to `buf.len()` bytes, returning how many were accepted.
    ///
    /// `Ok(0)` means no progress: the buffer is full, or the writer is
    /// parked at the boundary of the page the reader is inside. A single
    /// call accepts at most the contiguous run up to the wrap point or
    /// the reader's page; loop to push the rest.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, FlashError> {
        if buf.is_empty() || self.size == self.capacity {
            return Ok(0);
        }
        let page_size = self.flash.page_size();
        let writable = if self.write_ptr >= self.read_ptr {
            self.capacity - self.write_ptr
        } else {
            // stop at the reader's page: erasing it would eat unread data
            (self.read_ptr - self.read_ptr % page_size) - self.write_ptr
        };

        let accepted = writable.min(buf.len() as u32) as usize;
        let mut remaining = accepted;
        let mut done = 0usize;

        while remaining > 0 {
            let offset = self.write_ptr % page_size;
            let chunk = ((page_size - offset) as usize).min(remaining);
            if offset == 0 {
                self.flash.erase_page(self.write_ptr)?;
            }
            self.flash.write_page(&buf[done..done + chunk], self.write_ptr)?;
            self.write_ptr += chunk as u32;
            done += chunk;
            remaining -= chunk;
        }

        if self.write_ptr == self.capacity {
            self.write_ptr = 0;
        }
        self.size += accepted as u32;
        Ok(accepted)
    }

    /// Removes up to `buf.len()` bytes into `buf`, returning how many
    /// were produced. `Ok(0)` means the buffer is empty.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FlashError> {
        if buf.is_empty() || self.size == 0 {
            return Ok(0);
        }
        let page_size = self.flash.page_size();
        let readable = if self.write_ptr > self.read_ptr {
            self.write_ptr - self.read_ptr
        } else {
            self.capacity - self.read_ptr
        };

        let produced = readable.min(buf.len() as u32) as usize;
        let mut remaining = produced;
        let mut done = 0usize;

        while remaining > 0 {
            let offset = self.read_ptr % page_size;
            let chunk = ((page_size - offset) as usize).min(remaining);
            self.flash.read_page(&mut buf[done..done + chunk], self.read_ptr)?;
            self.read_ptr += chunk as u32;
            done += chunk;
            remaining -= chunk;
        }

        if self.read_ptr == self.capacity {
            self.read_ptr = 0;
        }
        self.size -= produced as u32;
        Ok(produced)
    }
}
