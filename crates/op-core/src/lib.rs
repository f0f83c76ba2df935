//! Core emulator logic for oxidized-psp
//!
//! This crate provides the foundational types, error handling,
//! configuration, logging and the parallel-loop pool used by the other crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod thread_pool;

pub use config::{Config, GpuBackend, GpuConfig, LogLevel};
pub use error::{EmulatorError, GpuError, MemoryError, Result};
pub use thread_pool::ThreadPool;
