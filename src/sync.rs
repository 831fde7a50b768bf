//! Lock helpers that recover from poisoning.
//!
//! Every guarded structure in this crate (mount table, folder caches, source
//! templates) stays consistent across a panic in another thread: updates are
//! single assignments or whole-entry inserts.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

pub(crate) fn read_or_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        log::warn!("rwlock was poisoned, recovering");
        poisoned.into_inner()
    })
}

pub(crate) fn write_or_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        log::warn!("rwlock was poisoned, recovering");
        poisoned.into_inner()
    })
}
