//! GPU lifecycle state machine
//!
//! `Uninitialized -> Initializing -> Ready -> ShuttingDown -> Uninitialized`.
//! [`GpuSystem`] owns the single live backend; it is passed to whatever
//! drives the emulation loop instead of living in a global.

use crate::backend::{create_backend, GpuInterface};
use crate::context::GraphicsContext;
use crate::readiness::ReadyProbe;
use op_core::{Config, GpuError};
use op_memory::GuestMemory;
use std::sync::Arc;
use std::time::Duration;

/// First sleep of the shutdown wait
const SHUTDOWN_POLL_MIN: Duration = Duration::from_millis(1);
/// Longest sleep of the shutdown wait
const SHUTDOWN_POLL_MAX: Duration = Duration::from_millis(10);

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
}

/// Owner of the one live GPU backend
#[derive(Default)]
pub struct GpuSystem {
    state: LifecycleState,
    backend: Option<Box<dyn GpuInterface>>,
}

impl GpuSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Create the backend selected by `config.gpu.backend`.
    ///
    /// The selector is read once here. Fails without side effects when a
    /// backend is already live or the requested one can not be built.
    pub fn init(
        &mut self,
        context: Option<Arc<dyn GraphicsContext>>,
        memory: Arc<GuestMemory>,
        config: &Config,
    ) -> Result<(), GpuError> {
        if matches!(self.state, LifecycleState::Initializing | LifecycleState::Ready) || self.backend.is_some() {
            tracing::error!("GPU init requested while already {:?}", self.state);
            return Err(GpuError::AlreadyInitialized);
        }

        let kind = config.gpu.backend;
        self.state = LifecycleState::Initializing;
        tracing::info!("Initializing GPU: {} backend", kind.name());

        match create_backend(kind, context, memory, config) {
            Ok(backend) => {
                self.backend = Some(backend);
                self.state = LifecycleState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::error!("GPU init failed: {}", e);
                self.state = LifecycleState::Uninitialized;
                Err(e)
            }
        }
    }

    /// Whether the backend finished its warm-up. `false` without a backend.
    pub fn is_ready(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_ready())
    }

    /// Readiness view for a host thread
    pub fn ready_probe(&self) -> Option<ReadyProbe> {
        self.backend.as_ref().map(|b| b.ready_probe())
    }

    pub fn backend(&self) -> Option<&dyn GpuInterface> {
        self.backend.as_deref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut (dyn GpuInterface + 'static)> {
        self.backend.as_deref_mut()
    }

    /// Cancel any warm-up, wait until the backend reports ready, then drop it.
    ///
    /// The wait sleeps with a backoff from 1 ms doubling to 10 ms. A
    /// cancelled warm-up always ends ready, so the loop terminates.
    pub fn shutdown(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            self.state = LifecycleState::Uninitialized;
            return;
        };
        self.state = LifecycleState::ShuttingDown;
        tracing::info!("Shutting down {} backend", backend.kind().name());

        backend.cancel_ready();
        let mut delay = SHUTDOWN_POLL_MIN;
        let mut waits = 0u32;
        while !backend.is_ready() {
            std::thread::sleep(delay);
            delay = (delay * 2).min(SHUTDOWN_POLL_MAX);
            waits += 1;
        }
        if waits > 0 {
            tracing::debug!("Backend became ready after {} polls", waits);
        }

        let stats = backend.stats();
        drop(backend);
        tracing::info!("GPU shut down ({})", stats);
        self.state = LifecycleState::Uninitialized;
    }
}

impl Drop for GpuSystem {
    fn drop(&mut self) {
        if self.backend.is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{create_context, WindowSystem};
    use op_core::GpuBackend;

    fn config(backend: GpuBackend) -> Config {
        let mut config = Config::default();
        config.gpu.backend = backend;
        config
    }

    #[test]
    fn test_init_and_shutdown() {
        let mut gpu = GpuSystem::new();
        assert_eq!(gpu.state(), LifecycleState::Uninitialized);
        gpu.init(None, GuestMemory::new(), &config(GpuBackend::Null)).unwrap();
        assert_eq!(gpu.state(), LifecycleState::Ready);
        assert!(gpu.is_ready());

        gpu.shutdown();
        assert_eq!(gpu.state(), LifecycleState::Uninitialized);
        assert!(gpu.backend().is_none());
        assert!(!gpu.is_ready());
    }

    #[test]
    fn test_second_init_is_rejected() {
        let mut gpu = GpuSystem::new();
        gpu.init(None, GuestMemory::new(), &config(GpuBackend::Null)).unwrap();
        let again = gpu.init(None, GuestMemory::new(), &config(GpuBackend::Null));
        assert!(matches!(again, Err(GpuError::AlreadyInitialized)));
        assert_eq!(gpu.state(), LifecycleState::Ready);
    }

    #[test]
    fn test_failed_init_leaves_uninitialized() {
        let mut gpu = GpuSystem::new();
        let context = create_context(WindowSystem::Headless, 480, 272).unwrap();
        let result = gpu.init(Some(context), GuestMemory::new(), &config(GpuBackend::DirectX9));
        assert!(matches!(result, Err(GpuError::BackendUnavailable(GpuBackend::DirectX9))));
        assert_eq!(gpu.state(), LifecycleState::Uninitialized);
        assert!(gpu.backend().is_none());

        // A later init with a buildable backend succeeds
        assert!(gpu.init(None, GuestMemory::new(), &config(GpuBackend::Null)).is_ok());
    }

    #[test]
    fn test_missing_context_is_rejected() {
        let mut gpu = GpuSystem::new();
        let result = gpu.init(None, GuestMemory::new(), &config(GpuBackend::Software));
        assert!(matches!(result, Err(GpuError::MissingContext(GpuBackend::Software))));
    }

    #[test]
    fn test_shutdown_without_backend_is_noop() {
        let mut gpu = GpuSystem::new();
        gpu.shutdown();
        assert_eq!(gpu.state(), LifecycleState::Uninitialized);
    }
}
