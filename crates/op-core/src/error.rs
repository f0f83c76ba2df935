//! Error types for the oxidized-psp emulator

use crate::config::GpuBackend;
use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Guest memory errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Invalid address: 0x{0:08x}")]
    InvalidAddress(u32),

    #[error("Access out of range at 0x{addr:08x} (size 0x{size:x})")]
    OutOfRange { addr: u32, size: u32 },
}

/// GE graphics errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("GPU backend {0:?} is not available in this build")]
    BackendUnavailable(GpuBackend),

    #[error("GPU backend {0:?} requires a graphics context")]
    MissingContext(GpuBackend),

    #[error("GPU is already initialized")]
    AlreadyInitialized,

    #[error("GPU is not initialized")]
    NotInitialized,

    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(u64),

    #[error("Device lost")]
    DeviceLost,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Vulkan error: {0}")]
    Vulkan(String),
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::InvalidAddress(0x12345678);
        assert_eq!(format!("{}", err), "Invalid address: 0x12345678");

        let err = MemoryError::OutOfRange {
            addr: 0x0880_0000,
            size: 0x40,
        };
        assert_eq!(
            format!("{}", err),
            "Access out of range at 0x08800000 (size 0x40)"
        );

        let err = GpuError::BackendUnavailable(GpuBackend::DirectX9);
        assert_eq!(
            format!("{}", err),
            "GPU backend DirectX9 is not available in this build"
        );
    }

    #[test]
    fn test_error_conversion() {
        let gpu_err = GpuError::DeviceLost;
        let emu_err: EmulatorError = gpu_err.into();
        assert!(matches!(emu_err, EmulatorError::Gpu(GpuError::DeviceLost)));

        let mem_err = MemoryError::InvalidAddress(0);
        let emu_err: EmulatorError = mem_err.into();
        assert!(matches!(emu_err, EmulatorError::Memory(_)));
    }
}
