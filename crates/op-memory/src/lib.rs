//! Guest memory for oxidized-psp
//!
//! A flat byte space covering the PSP's scratchpad, VRAM and main RAM.
//! Every address and size coming from the guest is untrusted: accesses are
//! either clipped to their region or rejected with a `MemoryError`.

pub mod constants;
pub mod manager;

pub use constants::*;
pub use manager::{GuestMemory, MemoryRegion};
