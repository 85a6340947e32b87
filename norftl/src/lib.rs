//! Flash translation layers for external NOR flash.
//!
//! Raw flash is a hostile place for application data: writes can only
//! clear bits, erases work on whole pages, and every cell tolerates a
//! limited number of erases. This crate turns such a device into storage
//! an application can actually use, by stacking small translating layers
//! that all speak the same [`FlashDevice`] contract:
//!
//! | Need | Stack (top → bottom) | Factory |
//! |---|---|---|
//! | EEPROM-style byte rewrites | `PageSpan → MultiWriteStore → LogicalPageMapper → FlashRegion` | [`stacks::address_erase`] |
//! | Wear-levelled storage | `PageSpan → LogicalPageMapper → FlashRegion` | [`stacks::wear_level_erase`] |
//! | Minimal rewrite support | `PageSpan → SinglePageWear → FlashRegion` | [`stacks::single_page_erase`] |
//! | FAT block device | `LogicalPageMapper → FlashRegion` (see the `norftl-block` crate) | — |
//! | Byte log | `CircularBuffer` over `FlashRegion` | [`stacks::circular_buffer`] |
//!
//! The bottom of every stack is an [`embedded_storage`] NOR driver wrapped
//! in [`NorFlashDevice`], or [`FakeFlashDevice`] on the host.
//!
//! # Example
//!
//! ```
//! use norftl::{stacks, FlashDevice, FakeFlashDevice};
//! use rand_core::SeedableRng;
//!
//! let mut chip = FakeFlashDevice::new(128, 4096);
//! chip.erase_all();
//!
//! let rng = rand_pcg::Pcg32::seed_from_u64(1);
//! let mut eeprom = stacks::address_erase(chip, 0, 128 * 4096, 2, rng).unwrap();
//!
//! eeprom.write(b"counter", 100).unwrap();
//! eeprom.write(b"updated", 100).unwrap(); // no erase needed
//!
//! let mut buf = [0u8; 7];
//! eeprom.read(&mut buf, 100).unwrap();
//! assert_eq!(&buf, b"updated");
//! ```
//!
//! # What this crate does not do
//!
//! No transactions or multi-page crash atomicity: a power cut in the
//! middle of a rewrite can leave that page partially written (the page
//! mapper itself recovers, application data in flight does not). No
//! checksums or ECC, and no locking — stacks are single-owner,
//! single-threaded.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod circular;
pub mod device;
pub mod error;
#[cfg(feature = "alloc")]
pub mod fake;
#[cfg(feature = "alloc")]
pub mod mapper;
pub mod multiwrite;
pub mod nor;
pub mod region;
mod relocate;
pub mod span;
pub mod stacks;
pub mod wear;

pub use circular::CircularBuffer;
pub use device::{FlashDevice, TransferHandler};
pub use error::FlashError;
#[cfg(feature = "alloc")]
pub use fake::FakeFlashDevice;
#[cfg(feature = "alloc")]
pub use mapper::LogicalPageMapper;
pub use multiwrite::MultiWriteStore;
pub use nor::NorFlashDevice;
pub use region::FlashRegion;
pub use relocate::STACK_BUFFER_SIZE;
pub use span::PageSpan;
pub use wear::SinglePageWear;

// Re-export the raw-driver trait crate so integrators need not name it.
pub use embedded_storage;
