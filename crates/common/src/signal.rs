//! One-way stop signal shared between the streaming driver and its
//! supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable, idempotent cancellation flag.
///
/// Either side may raise it; once raised it stays raised for the lifetime
/// of the session.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `true` if this call was the one that
    /// raised it.
    pub fn raise(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
