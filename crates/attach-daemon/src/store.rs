//! Process-wide shared property store.
//!
//! One store instance is shared by every session (and by whatever else
//! in the host process publishes properties, such as a management
//! endpoint advertising its address). All access goes through a single
//! mutex; [`PropertyStore::get_or_try_insert_with`] keeps the whole
//! read-miss-compute-write sequence under the lock so concurrent
//! sessions cannot compute the same derived value twice.

use std::sync::{Mutex, MutexGuard, PoisonError};

use attach_core::PropertyBundle;

/// Shared, lock-protected property bundle.
#[derive(Default)]
pub struct PropertyStore {
    inner: Mutex<PropertyBundle>,
}

impl PropertyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the given entries.
    #[must_use]
    pub fn seeded(bundle: PropertyBundle) -> Self {
        Self {
            inner: Mutex::new(bundle),
        }
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(ToString::to_string)
    }

    /// Insert or replace a value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key, value);
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> PropertyBundle {
        self.lock().clone()
    }

    /// Return the value under `key`, computing and storing it on a miss.
    ///
    /// The lock is held across the whole sequence. A failed computation
    /// stores nothing, so a later call retries.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `init`.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &str,
        init: impl FnOnce() -> Result<String, E>,
    ) -> Result<String, E> {
        let mut inner = self.lock();
        if let Some(value) = inner.get(key) {
            return Ok(value.to_string());
        }
        let value = init()?;
        inner.insert(key, value.clone());
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, PropertyBundle> {
        // A poisoned bundle is still just strings; keep serving it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let store = PropertyStore::new();
        assert_eq!(store.get("a"), None);
        store.set("a", "1");
        assert_eq!(store.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_get_or_try_insert_with_computes_once() {
        let store = PropertyStore::new();
        let mut calls = 0;

        for _ in 0..2 {
            let value: Result<String, std::convert::Infallible> = store
                .get_or_try_insert_with("derived", || {
                    calls += 1;
                    Ok("computed".to_string())
                });
            assert_eq!(value.unwrap(), "computed");
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_computation_is_not_cached() {
        let store = PropertyStore::new();

        let failed: Result<String, &str> =
            store.get_or_try_insert_with("derived", || Err("not ready"));
        assert_eq!(failed, Err("not ready"));

        let ok: Result<String, &str> = store.get_or_try_insert_with("derived", || Ok("ready".into()));
        assert_eq!(ok.unwrap(), "ready");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = PropertyStore::new();
        store.set("a", "1");
        let snapshot = store.snapshot();
        store.set("a", "2");
        assert_eq!(snapshot.get("a"), Some("1"));
    }
}
