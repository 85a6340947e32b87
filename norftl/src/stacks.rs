//! Composition recipes for the common client stacks.
//!
//! Each factory validates the region geometry, builds the layers bottom-up
//! and returns the fully typed stack. The caller owns the root device and
//! passes it by value; thanks to the blanket `&mut` impl a mutable borrow
//! works too, so one physical chip can serve different stacks over
//! disjoint regions one at a time.

use rand_core::RngCore;

use crate::circular::CircularBuffer;
use crate::device::FlashDevice;
use crate::error::FlashError;
use crate::region::FlashRegion;
use crate::span::PageSpan;
use crate::wear::SinglePageWear;

#[cfg(feature = "alloc")]
use crate::mapper::LogicalPageMapper;
#[cfg(feature = "alloc")]
use crate::multiwrite::MultiWriteStore;

/// Stack built by [`single_page_erase`].
pub type SinglePageStack<F> = PageSpan<SinglePageWear<FlashRegion<F>>>;

/// Stack built by [`wear_level_erase`].
#[cfg(feature = "alloc")]
pub type WearLevelStack<F, R> = PageSpan<LogicalPageMapper<FlashRegion<F>, R>>;

/// Stack built by [`address_erase`].
#[cfg(feature = "alloc")]
pub type AddressEraseStack<F, R> = PageSpan<MultiWriteStore<LogicalPageMapper<FlashRegion<F>, R>>>;

/// A plain page-aligned window onto `flash`, with raw flash semantics.
pub fn user_region<F: FlashDevice>(
    flash: F,
    start: u32,
    end: u32,
) -> Result<FlashRegion<F>, FlashError> {
    FlashRegion::new(flash, start, end)
}

/// Byte-addressable storage where destructive rewrites bounce pages off
/// one reserved scratch page.
///
/// Cheapest in space, hardest on the scratch page; only suitable when
/// rewrites are rare over the device lifetime.
pub fn single_page_erase<F: FlashDevice>(
    flash: F,
    start: u32,
    end: u32,
) -> Result<SinglePageStack<F>, FlashError> {
    let region = FlashRegion::new(flash, start, end)?;
    Ok(PageSpan::new(SinglePageWear::new(region)))
}

/// Byte-addressable storage with page rewrites wear-levelled across
/// `free_pages` spare pages (at least two).
#[cfg(feature = "alloc")]
pub fn wear_level_erase<F, R>(
    flash: F,
    start: u32,
    end: u32,
    free_pages: u32,
    rng: R,
) -> Result<WearLevelStack<F, R>, FlashError>
where
    F: FlashDevice,
    R: RngCore,
{
    let mapper = wear_level_mapper(flash, start, end, free_pages, rng)?;
    Ok(PageSpan::new(mapper))
}

/// Byte-addressable storage where up to seven destructive rewrites of any
/// byte cost no erase at all, at an 8x space premium, with erases beyond
/// that wear-levelled. The closest thing to EEPROM this crate offers.
#[cfg(feature = "alloc")]
pub fn address_erase<F, R>(
    flash: F,
    start: u32,
    end: u32,
    free_pages: u32,
    rng: R,
) -> Result<AddressEraseStack<F, R>, FlashError>
where
    F: FlashDevice,
    R: RngCore,
{
    let mapper = wear_level_mapper(flash, start, end, free_pages, rng)?;
    Ok(PageSpan::new(MultiWriteStore::new(mapper)))
}

/// A producer/consumer byte log with page-granular reclamation.
/// Needs at least two pages.
pub fn circular_buffer<F: FlashDevice>(
    flash: F,
    start: u32,
    end: u32,
) -> Result<CircularBuffer<FlashRegion<F>>, FlashError> {
    CircularBuffer::new(FlashRegion::new(flash, start, end)?)
}

#[cfg(feature = "alloc")]
fn wear_level_mapper<F, R>(
    flash: F,
    start: u32,
    end: u32,
    free_pages: u32,
    rng: R,
) -> Result<LogicalPageMapper<FlashRegion<F>, R>, FlashError>
where
    F: FlashDevice,
    R: RngCore,
{
    let region = FlashRegion::new(flash, start, end)?;
    let pages = region.page_count();
    if free_pages < 2 || free_pages >= pages {
        return Err(FlashError::InvalidAddress);
    }
    LogicalPageMapper::new(region, pages - free_pages, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeFlashDevice;
    use rand_core::SeedableRng;
    use rand_pcg::Pcg32;

    const PAGE: u32 = 4096;

    fn chip() -> FakeFlashDevice {
        let mut fake = FakeFlashDevice::new(128, PAGE);
        fake.erase_all();
        fake
    }

    fn rng() -> Pcg32 {
        Pcg32::seed_from_u64(7)
    }

    #[test]
    fn test_create_address_erase_segment() {
        let stack = address_erase(chip(), PAGE * 20, PAGE * 100, 2, rng()).unwrap();
        assert_eq!(stack.page_count(), 78);
    }

    #[test]
    fn test_create_address_erase_non_page_boundary_fails() {
        assert_eq!(
            address_erase(chip(), PAGE * 20 + 50, PAGE * 100, 2, rng()).err(),
            Some(FlashError::InvalidAddress)
        );
    }

    #[test]
    fn test_create_wear_level_erase_segment() {
        let stack = wear_level_erase(chip(), PAGE * 20, PAGE * 40, 2, rng()).unwrap();
        assert_eq!(stack.page_count(), 18);
        assert_eq!(stack.page_size(), PAGE - 2);
    }

    #[test]
    fn test_create_wear_level_erase_non_page_address_fails() {
        assert!(wear_level_erase(chip(), PAGE * 20 + 20, PAGE * 40, 2, rng()).is_err());
    }

    #[test]
    fn test_wear_level_requires_two_free_pages() {
        assert!(wear_level_erase(chip(), 0, PAGE * 10, 1, rng()).is_err());
        assert!(wear_level_erase(chip(), 0, PAGE * 10, 10, rng()).is_err());
        assert!(wear_level_erase(chip(), 0, PAGE * 10, 2, rng()).is_ok());
    }

    #[test]
    fn test_create_single_page_erase() {
        let stack = single_page_erase(chip(), PAGE * 20, PAGE * 100).unwrap();
        assert_eq!(stack.page_count(), 79);
        assert!(single_page_erase(chip(), PAGE * 20 + 20, PAGE * 100).is_err());
    }

    #[test]
    fn test_create_circular_buffer() {
        let buf = circular_buffer(chip(), 0, PAGE * 10).unwrap();
        assert_eq!(buf.capacity(), PAGE * 10);
        assert!(circular_buffer(chip(), 0, PAGE).is_err());
        assert!(circular_buffer(chip(), 2 * PAGE + 20, 4 * PAGE + 20).is_err());
    }

    #[test]
    fn test_user_region_is_raw() {
        let mut region = user_region(chip(), 0, PAGE * 4).unwrap();
        assert_eq!(region.page_count(), 4);
        // raw semantics: plain writes AND, no relocation underneath
        region.write_page(&[0x0F], 0).unwrap();
        region.write_page(&[0xF0], 0).unwrap();
        assert_eq!(region.read_byte(0).unwrap(), 0x00);
    }
}
