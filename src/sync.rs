use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex guarding plain data. A panic elsewhere never leaves the
/// data half-written at an unlock point, so poison is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
