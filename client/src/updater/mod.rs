use std::sync::{Mutex, MutexGuard, PoisonError};

mod downloader;
pub mod events;
pub mod manifest;
pub mod progress;
pub mod registry;
pub mod session;
pub mod version;

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
