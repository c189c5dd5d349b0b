//! Poison-tolerant access to std locks guarding shared proxy state.
//!
//! A panic while holding one of these locks leaves the guarded value intact
//! (lifecycle phase, in-memory outbox), so callers keep going with the
//! last written state instead of propagating the panic to every request.

use std::sync::{
    LockResult, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use tracing::warn;

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), owner, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), owner, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    owner: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), owner, op, "mutex.lock")
}

fn recover<G>(
    result: LockResult<G>,
    owner: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned: PoisonError<G>| {
        warn!(
            op,
            owner,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned lock; continuing with last written state"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn poisoned_rwlock_keeps_last_value() {
        let lock = Arc::new(RwLock::new(1_u32));
        let clone = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let mut guard = clone.write().unwrap();
            *guard = 7;
            panic!("poison");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*rw_read(&lock, "test", "read"), 7);
        *rw_write(&lock, "test", "write") = 9;
        assert_eq!(*rw_read(&lock, "test", "read"), 9);
    }
}
