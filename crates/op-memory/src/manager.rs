//! Guest memory implementation

use crate::constants::*;
use bytemuck::Pod;
use op_core::error::MemoryError;
use parking_lot::RwLock;
use std::sync::Arc;

/// Memory region descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Base address (physical, already masked)
    pub base: u32,
    /// Size in bytes
    pub size: u32,
    /// Region name
    pub name: &'static str,
}

impl MemoryRegion {
    /// Exclusive end address
    pub fn end(&self) -> u64 {
        self.base as u64 + self.size as u64
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && (addr as u64) < self.end()
    }
}

struct RegionStorage {
    info: MemoryRegion,
    bytes: RwLock<Vec<u8>>,
}

/// Emulated PSP memory
///
/// Each region is backed by its own buffer; a range is only valid if it lies
/// entirely inside one region. Ranges are never allowed to straddle unmapped
/// memory.
pub struct GuestMemory {
    regions: Vec<RegionStorage>,
}

impl GuestMemory {
    /// Create memory with the standard PSP regions
    pub fn new() -> Arc<Self> {
        Self::with_regions(&[
            MemoryRegion {
                base: SCRATCHPAD_BASE,
                size: SCRATCHPAD_SIZE,
                name: "Scratchpad",
            },
            MemoryRegion {
                base: VRAM_BASE,
                size: VRAM_SIZE,
                name: "VRAM",
            },
            MemoryRegion {
                base: RAM_BASE,
                size: RAM_SIZE,
                name: "Main Memory",
            },
        ])
    }

    /// Create memory with a custom region map
    pub fn with_regions(regions: &[MemoryRegion]) -> Arc<Self> {
        let regions = regions
            .iter()
            .map(|info| {
                tracing::debug!(
                    "Mapping {} at 0x{:08x} (0x{:x} bytes)",
                    info.name,
                    info.base,
                    info.size
                );
                RegionStorage {
                    info: *info,
                    bytes: RwLock::new(vec![0u8; info.size as usize]),
                }
            })
            .collect();

        Arc::new(Self { regions })
    }

    /// Get memory regions
    pub fn regions(&self) -> Vec<MemoryRegion> {
        self.regions.iter().map(|r| r.info).collect()
    }

    fn region_for(&self, addr: u32) -> Option<&RegionStorage> {
        self.regions.iter().find(|r| r.info.contains(addr))
    }

    /// Number of bytes of `[addr, addr + size)` that are mapped contiguously
    /// from `addr`. Returns 0 if `addr` itself is unmapped.
    pub fn valid_size(&self, addr: u32, size: u32) -> u32 {
        let addr = mask_address(addr);
        match self.region_for(addr) {
            Some(region) => {
                let available = region.info.end() - addr as u64;
                (size as u64).min(available) as u32
            }
            None => 0,
        }
    }

    /// Whether the whole range is mapped
    pub fn is_valid_range(&self, addr: u32, size: u32) -> bool {
        size > 0 && self.valid_size(addr, size) == size
    }

    fn checked_region(&self, addr: u32, size: u32) -> Result<(&RegionStorage, usize), MemoryError> {
        let masked = mask_address(addr);
        let region = self
            .region_for(masked)
            .ok_or(MemoryError::InvalidAddress(addr))?;
        if (masked as u64 + size as u64) > region.info.end() {
            return Err(MemoryError::OutOfRange { addr, size });
        }
        Ok((region, (masked - region.info.base) as usize))
    }

    /// Copy data from memory
    pub fn read_bytes(&self, addr: u32, size: u32) -> Result<Vec<u8>, MemoryError> {
        let (region, offset) = self.checked_region(addr, size)?;
        let bytes = region.bytes.read();
        Ok(bytes[offset..offset + size as usize].to_vec())
    }

    /// Copy data to memory
    pub fn write_bytes(&self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let size = u32::try_from(data.len()).map_err(|_| MemoryError::OutOfRange {
            addr,
            size: u32::MAX,
        })?;
        let (region, offset) = self.checked_region(addr, size)?;
        let mut bytes = region.bytes.write();
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Fill a range with a byte value
    pub fn fill(&self, addr: u32, value: u8, size: u32) -> Result<(), MemoryError> {
        let (region, offset) = self.checked_region(addr, size)?;
        let mut bytes = region.bytes.write();
        bytes[offset..offset + size as usize].fill(value);
        Ok(())
    }

    /// Read a little-endian value from memory
    pub fn read<T: Pod>(&self, addr: u32) -> Result<T, MemoryError> {
        let size = std::mem::size_of::<T>() as u32;
        let (region, offset) = self.checked_region(addr, size)?;
        let bytes = region.bytes.read();
        Ok(bytemuck::pod_read_unaligned(
            &bytes[offset..offset + size as usize],
        ))
    }

    /// Write a little-endian value to memory
    pub fn write<T: Pod>(&self, addr: u32, value: T) -> Result<(), MemoryError> {
        self.write_bytes(addr, bytemuck::bytes_of(&value))
    }

    /// Run `f` over the mapped prefix of `[addr, addr + size)`.
    ///
    /// Returns `None` if `addr` is unmapped. The slice handed to `f` may be
    /// shorter than `size` when the range runs off the end of its region.
    pub fn with_slice<R>(&self, addr: u32, size: u32, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let masked = mask_address(addr);
        let region = self.region_for(masked)?;
        let len = self.valid_size(masked, size) as usize;
        let offset = (masked - region.info.base) as usize;
        let bytes = region.bytes.read();
        Some(f(&bytes[offset..offset + len]))
    }
}
