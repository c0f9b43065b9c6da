//! ==============================================================================
//! channel.rs - latest-value cell shared between a sampler and its readers
//! ==============================================================================
//!
//! purpose:
//!     one SensorChannel per sensor. its sampling task publishes, the
//!     aggregator reads. newest value always wins, nothing is queued.
//!
//! locking:
//!     every channel has its own mutex, held only while copying the value in
//!     or out. no lock spans several channels, so a
//!     snapshot can mix readings taken up to one sampling period apart.
//!
//! ==============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

pub struct SensorChannel<T> {
    value: Mutex<T>,
    published: AtomicBool,
}

impl<T: Copy> SensorChannel<T> {
    /// create a channel that reads as `default` until the first publish
    pub fn new(default: T) -> Self {
        Self {
            value: Mutex::new(default),
            published: AtomicBool::new(false),
        }
    }

    /// replace the stored value. never blocks on anything but the copy.
    pub fn publish(&self, value: T) {
        *self.guard() = value;
        self.published.store(true, Ordering::Release);
    }

    /// most recently published value, or the default
    pub fn read(&self) -> T {
        *self.guard()
    }

    pub fn has_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    // poison is harmless here: the value is Copy and written in one store
    fn guard(&self) -> MutexGuard<'_, T> {
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Copy + Default> Default for SensorChannel<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
