//! Asynchronous backend readiness
//!
//! A backend may warm up on a background worker. Completion is published
//! through an atomic flag that the emulation thread polls; cancellation is
//! cooperative and still ends with the flag set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Cloneable read-only view of a ready flag
#[derive(Debug, Clone)]
pub struct ReadyProbe {
    flag: Arc<AtomicBool>,
}

impl ReadyProbe {
    pub fn is_ready(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Cooperative cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Sets the ready flag when dropped, so a worker reports ready on every exit
/// path including cancellation and panics.
struct ReadyGuard(Arc<AtomicBool>);

impl Drop for ReadyGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Background warm-up task
pub struct WarmUp {
    ready: Arc<AtomicBool>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl WarmUp {
    /// Already-complete warm-up for backends with nothing to prepare
    pub fn ready() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            cancel: CancelToken::new(),
            handle: None,
        }
    }

    /// Run `work` on a named worker thread. The worker should check the
    /// token between units of work.
    pub fn spawn<F>(name: &str, work: F) -> Self
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        let ready = Arc::new(AtomicBool::new(false));
        let cancel = CancelToken::new();

        let guard = ReadyGuard(Arc::clone(&ready));
        let token = cancel.clone();
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _guard = guard;
            work(&token);
        });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                // The closure (and the guard inside it) is dropped, which
                // already marked the task ready
                tracing::warn!("Failed to spawn {} worker: {}", name, e);
                None
            }
        };

        Self {
            ready,
            cancel,
            handle,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn probe(&self) -> ReadyProbe {
        ReadyProbe {
            flag: Arc::clone(&self.ready),
        }
    }
}

impl Drop for WarmUp {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if self.is_ready() {
                if handle.join().is_err() {
                    tracing::warn!("Warm-up worker panicked");
                }
            } else {
                tracing::debug!("Detaching unfinished warm-up worker");
            }
        }
    }
}
