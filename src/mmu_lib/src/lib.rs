//==================================================================================================
// Configuration
//==================================================================================================
#![deny(clippy::all)]

//==================================================================================================
// Imports
//==================================================================================================
use ::anyhow::Result;
use log::debug;
use mem_lib::PAGE_MASK;

//==================================================================================================
// Enum
//==================================================================================================
/// Outcome of a guest-physical translation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslateResult {
    /// The physical address backing the queried virtual address.
    Hit(u64),
    /// No mapping; the access never happened as far as tracing is concerned.
    Fault,
}

//==================================================================================================
// Traits
//==================================================================================================
/// The emulator-side collaborator that resolves guest physical addresses.
/// The tracing pipeline queries it with a page-aligned virtual address.
pub trait AddressTranslator {
    fn guest_paddr(&self, vaddr: u64) -> TranslateResult;
}

//==================================================================================================
// Structures
//==================================================================================================
/// Translator for which physical and virtual addresses coincide.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTranslator;

/// Maps one contiguous virtual window onto one contiguous physical window,
/// faulting outside it.
#[derive(Clone, Copy, Debug)]
pub struct LinearTranslator {
    virt_base: u64,
    phys_base: u64,
    window_size: u64,
}

//==================================================================================================
// Implementations
//==================================================================================================
impl IdentityTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl AddressTranslator for IdentityTranslator {
    fn guest_paddr(&self, vaddr: u64) -> TranslateResult {
        TranslateResult::Hit(vaddr)
    }
}

impl LinearTranslator {
    pub fn new(virt_base: u64, phys_base: u64, window_size: u64) -> Result<Self> {
        debug!(
            "[MMU] linear window 0x{:x} -> 0x{:x} ({} bytes)",
            virt_base, phys_base, window_size,
        );

        // Sanity Check
        if virt_base & PAGE_MASK != 0 || phys_base & PAGE_MASK != 0 {
            return Err(anyhow::anyhow!(
                "translation window bases (0x{:x}, 0x{:x}) must be page aligned",
                virt_base,
                phys_base
            ));
        }
        if window_size == 0 {
            return Err(anyhow::anyhow!("translation window must not be empty"));
        }

        Ok(Self {
            virt_base,
            phys_base,
            window_size,
        })
    }

    pub fn window_size(&self) -> u64 {
        self.window_size
    }
}

impl AddressTranslator for LinearTranslator {
    fn guest_paddr(&self, vaddr: u64) -> TranslateResult {
        if vaddr < self.virt_base || vaddr - self.virt_base >= self.window_size {
            return TranslateResult::Fault;
        }

        TranslateResult::Hit(vaddr - self.virt_base + self.phys_base)
    }
}
