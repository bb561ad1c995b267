//! Store readiness.

use std::sync::{PoisonError, RwLock};

/// Reports whether the backing store is usable.
pub trait ReadinessSource: Send + Sync {
    fn is_ready(&self) -> bool;
}

/// Readiness flag flipped once by the store bootstrap.
///
/// Starts not ready.
#[derive(Debug, Default)]
pub struct ReadinessFlag {
    ready: RwLock<bool>,
}

impl ReadinessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag that is already ready.
    pub fn ready() -> Self {
        Self {
            ready: RwLock::new(true),
        }
    }

    pub fn mark_ready(&self) {
        *self.ready.write().unwrap_or_else(PoisonError::into_inner) = true;
        tracing::info!("template store is ready");
    }
}

impl ReadinessSource for ReadinessFlag {
    fn is_ready(&self) -> bool {
        *self.ready.read().unwrap_or_else(PoisonError::into_inner)
    }
}
