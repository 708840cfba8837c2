//! Per-article write serialization

use std::collections::{BTreeSet, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Set of article ids currently being written
///
/// A batch acquires all of its keys in one step, so two overlapping batches
/// can never each hold part of the other's keys.
#[derive(Default)]
pub struct KeyLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until none of `keys` is held, then hold them all
    pub fn acquire<'a, I>(&'a self, keys: I) -> KeyGuard<'a>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();

        let mut held = self.lock_held();
        while keys.iter().any(|k| held.contains(k)) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.extend(keys.iter().cloned());

        KeyGuard { locks: self, keys }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.lock_held().contains(key)
    }

    // The set only ever holds plain ids, so a poisoned lock is still consistent
    fn lock_held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases its keys on drop
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    keys: BTreeSet<String>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.lock_held();
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}
