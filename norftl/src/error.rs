//! Error type shared by every layer of a device stack.

use core::fmt;

/// Errors reported by [`FlashDevice`](crate::FlashDevice) operations.
///
/// Every layer in a stack reports through this one enum; an error raised
/// deep in a stack surfaces unchanged at the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum FlashError {
    /// An address or length argument fell outside the device, an erase
    /// address was not page-aligned, or a transfer crossed a page boundary
    /// in a layer that forbids spanning.
    InvalidAddress,

    /// The page mapper found no free physical page to back an allocation.
    AllocationFailed,

    /// All seven rewrite slots for a logical byte are consumed.
    ///
    /// Normally swallowed by relocation; it surfaces only when the
    /// underlying layer cannot relocate either.
    SlotExhausted,

    /// The operation is not supported by this device (for example
    /// relocation on a raw flash driver).
    Unsupported,

    /// The underlying flash driver reported a failure.
    Device,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress => write!(f, "address out of range or misaligned"),
            Self::AllocationFailed => write!(f, "no free physical page available"),
            Self::SlotExhausted => write!(f, "all rewrite slots consumed"),
            Self::Unsupported => write!(f, "operation not supported by this device"),
            Self::Device => write!(f, "underlying flash driver error"),
        }
    }
}

impl core::error::Error for FlashError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let msg = format!("{}", FlashError::InvalidAddress);
        assert!(msg.contains("address"));

        let msg = format!("{}", FlashError::SlotExhausted);
        assert!(msg.contains("slots"));
    }
}
