//! PSP address space constants

/// Mask that folds the cached/uncached/kernel mirrors onto physical addresses
pub const ADDRESS_MASK: u32 = 0x3FFF_FFFF;

/// Scratchpad RAM
pub const SCRATCHPAD_BASE: u32 = 0x0001_0000;
pub const SCRATCHPAD_SIZE: u32 = 0x0000_4000;

/// Embedded DRAM used by the GE for framebuffers
pub const VRAM_BASE: u32 = 0x0400_0000;
pub const VRAM_SIZE: u32 = 0x0020_0000;

/// Main RAM (kernel + user partitions)
pub const RAM_BASE: u32 = 0x0800_0000;
pub const RAM_SIZE: u32 = 0x0200_0000;

/// Start of the user partition inside main RAM
pub const USER_MEM_BASE: u32 = 0x0880_0000;

/// Fold an address onto its physical mirror
#[inline(always)]
pub fn mask_address(addr: u32) -> u32 {
    addr & ADDRESS_MASK
}
