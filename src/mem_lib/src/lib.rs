//==================================================================================================
// Configuration
//==================================================================================================
#![deny(clippy::all)]

//==================================================================================================
// Imports
//==================================================================================================
use ::anyhow::Result;

//==================================================================================================
// Constants
//==================================================================================================
/// Guest page size. Physical translation is page-granular.
pub const PAGE_SIZE: u64 = 0x1000;
/// Mask selecting the in-page offset bits of an address.
pub const PAGE_MASK: u64 = 0xFFF;

//==================================================================================================
// Enum
//==================================================================================================
/// The three flavors of guest memory access the emulator reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Load,
    Store,
    Fetch,
}

//==================================================================================================
// Structures
//==================================================================================================
/// Represents one guest memory access of a replayable workload.
#[derive(Clone, Copy, Debug)]
pub struct Access {
    access_vaddr: u64,
    access_size: u64,
    access_kind: AccessKind,
}

//==================================================================================================
// Implementations
//==================================================================================================
impl AccessKind {
    pub fn is_store(&self) -> bool {
        matches!(self, AccessKind::Store)
    }
}

impl Access {
    pub fn new(vaddr: u64, size: u64, kind: AccessKind) -> Result<Self> {
        // Sanity Check: widths must split cleanly across page boundaries.
        if size == 0 || !size.is_power_of_two() {
            return Err(anyhow::anyhow!(
                "access size ({}) must be a power of 2",
                size
            ));
        }

        Ok(Self {
            access_vaddr: vaddr,
            access_size: size,
            access_kind: kind,
        })
    }

    pub fn access_vaddr(&self) -> u64 {
        self.access_vaddr
    }

    pub fn access_size(&self) -> u64 {
        self.access_size
    }

    pub fn access_kind(&self) -> AccessKind {
        self.access_kind
    }
}

/// True when the `size`-byte access at `vaddr` touches two guest pages.
pub fn crosses_page(vaddr: u64, size: u64) -> bool {
    (vaddr & PAGE_MASK) + size >= PAGE_SIZE
}

/// True when `vaddr` is not naturally aligned for a `size`-byte access.
pub fn misaligned(vaddr: u64, size: u64) -> bool {
    (size - 1) & vaddr != 0
}

//==================================================================================================
// Unit Tests
//==================================================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_crossing_predicate() {
        assert!(crosses_page(0xFFE, 4));
        assert!(crosses_page(0xFFF, 1));
        assert!(!crosses_page(0xFF8, 8));
        assert!(!crosses_page(0x1000, 8));
    }

    #[test]
    fn alignment_predicate() {
        assert!(misaligned(0xFFE, 4));
        assert!(!misaligned(0xFFC, 4));
        assert!(!misaligned(0x1000, 8));
        // Single-byte accesses are always aligned.
        assert!(!misaligned(0xFFF, 1));
    }

    #[test]
    fn access_rejects_non_power_of_two_sizes() {
        assert!(Access::new(0x1000, 3, AccessKind::Load).is_err());
        assert!(Access::new(0x1000, 0, AccessKind::Store).is_err());
        assert!(Access::new(0x1000, 8, AccessKind::Fetch).is_ok());
    }

    #[test]
    fn access_getters_round_trip() {
        let access = Access::new(0x4000_0040, 4, AccessKind::Store).unwrap();
        assert_eq!(access.access_vaddr(), 0x4000_0040);
        assert_eq!(access.access_size(), 4);
        assert_eq!(access.access_kind(), AccessKind::Store);
        assert!(access.access_kind().is_store());
    }
}
