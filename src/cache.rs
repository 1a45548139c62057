//! Process-wide memo for configuration lookups, with request coalescing.
//!
//! ## Semantics
//!
//! * At most one fetch per key is in flight. Callers that arrive while it
//!   runs wait on the same shared future instead of starting their own.
//! * Successful results are kept until invalidated. There is no TTL.
//! * Failed fetches are not stored; the next caller fetches again.
//! * [`CoalescingCache::invalidate`] during a fetch drops the pending entry.
//!   The waiters still receive the result, but it is never stored.
//! * [`CoalescingCache::set_locale`] clears everything when the locale
//!   actually changes.
//!
//! The cache is a cheap `Clone` handle; clones share the same entries. It is
//! meant to be created once and injected into consumers such as
//! [`crate::upload::UploadOrchestrator`] and [`crate::library::DocumentLibrary`].

use crate::client::DocumentApi;
use crate::error::ProofError;
use crate::models::{DocumentSubtypeConfig, SubtypeKey};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ProofError>>>;

enum Slot<V> {
    Ready(V),
    Pending { id: u64, fetch: SharedFetch<V> },
}

struct Inner<K, V> {
    entries: HashMap<K, Slot<V>>,
    next_id: u64,
    locale: Option<String>,
}

/// Keyed memo with one in-flight fetch per key.
pub struct CoalescingCache<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> Clone for CoalescingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for CoalescingCache<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_id: 0,
                locale: None,
            })),
        }
    }
}

/// Issuance policies keyed by `(docType, docSubtype)`.
///
/// `None` records that the backend has no policy for the key.
pub type PolicyCache = CoalescingCache<SubtypeKey, Option<DocumentSubtypeConfig>>;

impl<K, V> CoalescingCache<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached value for `key`, or run `fetch` to produce it.
    ///
    /// `fetch` is only called when there is neither a stored value nor an
    /// in-flight fetch for `key`.
    pub async fn get<F, Fut>(&self, key: &K, fetch: F) -> Result<V, ProofError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProofError>> + Send + 'static,
    {
        let (id, pending) = {
            let mut inner = self.lock();
            match inner.entries.get(key) {
                Some(Slot::Ready(value)) => {
                    debug!("Cache hit for {}", key);
                    return Ok(value.clone());
                }
                Some(Slot::Pending { id, fetch }) => {
                    debug!("Joining in-flight fetch for {}", key);
                    (*id, fetch.clone())
                }
                None => {
                    debug!("Cache miss for {}", key);
                    let id = inner.next_id;
                    inner.next_id += 1;
                    let shared = fetch().boxed().shared();
                    inner.entries.insert(
                        key.clone(),
                        Slot::Pending {
                            id,
                            fetch: shared.clone(),
                        },
                    );
                    (id, shared)
                }
            }
        };

        let result = pending.await;

        // Only the entry created for this fetch may be settled; an
        // invalidation in between leaves it absent or replaced.
        let mut inner = self.lock();
        let still_current = matches!(
            inner.entries.get(key),
            Some(Slot::Pending { id: current, .. }) if *current == id
        );
        if still_current {
            match &result {
                Ok(value) => {
                    inner.entries.insert(key.clone(), Slot::Ready(value.clone()));
                }
                Err(e) => {
                    debug!("Fetch for {} failed, not cached: {}", key, e);
                    inner.entries.remove(key);
                }
            }
        }
        result
    }

    /// `true` when a value (not a pending fetch) is stored for `key`.
    pub fn contains(&self, key: &K) -> bool {
        matches!(self.lock().entries.get(key), Some(Slot::Ready(_)))
    }

    /// Forget `key`, including any fetch still running for it.
    pub fn invalidate(&self, key: &K) {
        if self.lock().entries.remove(key).is_some() {
            debug!("Invalidated {}", key);
        }
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.lock();
        let n = inner.entries.len();
        inner.entries.clear();
        debug!("Invalidated {} cache entries", n);
    }

    /// Record the active locale. A change clears the whole cache.
    ///
    /// Returns `true` if the cache was cleared.
    pub fn set_locale(&self, locale: &str) -> bool {
        let mut inner = self.lock();
        if inner.locale.as_deref() == Some(locale) {
            return false;
        }
        let first = inner.locale.is_none();
        inner.locale = Some(locale.to_string());
        if first {
            return false;
        }
        inner.entries.clear();
        debug!("Locale changed to {}; cache cleared", locale);
        true
    }
}

impl PolicyCache {
    /// Issuance policy for `key`, fetched from `api` on a miss.
    pub async fn policy(
        &self,
        api: &Arc<dyn DocumentApi>,
        key: &SubtypeKey,
    ) -> Result<Option<DocumentSubtypeConfig>, ProofError> {
        let api = Arc::clone(api);
        let owned = key.clone();
        self.get(key, move || async move { api.fetch_policy(&owned).await })
            .await
    }

    /// Switch `api` to `locale`, then clear cached policies if it changed,
    /// so refetches are made in the new language.
    ///
    /// Returns `true` if the cache was cleared.
    pub fn switch_locale(&self, api: &Arc<dyn DocumentApi>, locale: &str) -> bool {
        api.set_locale(locale);
        self.set_locale(locale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = Result<u32, ProofError>> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache: CoalescingCache<String, u32> = CoalescingCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = "academic/marksheet".to_string();

        let results = futures::future::join_all(
            (0..5).map(|_| cache.get(&key, || counting_fetch(&calls, 7))),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for r in results {
            assert_eq!(assert_ok!(r), 7);
        }
        assert!(cache.contains(&key));

        // later calls are served from memory
        assert_eq!(assert_ok!(cache.get(&key, || counting_fetch(&calls, 9)).await), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: CoalescingCache<String, u32> = CoalescingCache::new();
        let key = "identity/passport".to_string();

        let first = cache
            .get(&key, || async { Err(ProofError::network(Some(503), vec![])) })
            .await;
        assert_err!(first);
        assert!(!cache.contains(&key));

        let second = cache.get(&key, || async { Ok(3) }).await;
        assert_eq!(assert_ok!(second), 3);
    }

    #[tokio::test]
    async fn invalidation_during_fetch_discards_stale_result() {
        let cache: CoalescingCache<String, u32> = CoalescingCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = "academic/degree".to_string();

        let background = {
            let cache = cache.clone();
            let key = key.clone();
            let fetch = counting_fetch(&calls, 1);
            tokio::spawn(async move { cache.get(&key, || fetch).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.invalidate(&key);

        // the waiter still gets its answer
        assert_eq!(assert_ok!(assert_ok!(background.await)), 1);
        // but it was not stored
        assert!(!cache.contains(&key));
        assert_eq!(assert_ok!(cache.get(&key, || counting_fetch(&calls, 2)).await), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn locale_change_clears_everything() {
        let cache: CoalescingCache<String, u32> = CoalescingCache::new();
        assert!(!cache.set_locale("en"));
        assert_ok!(cache.get(&"a".to_string(), || async { Ok(1) }).await);
        assert_ok!(cache.get(&"b".to_string(), || async { Ok(2) }).await);

        assert!(!cache.set_locale("en"));
        assert!(cache.contains(&"a".to_string()));

        assert!(cache.set_locale("hi"));
        assert!(!cache.contains(&"a".to_string()));
        assert!(!cache.contains(&"b".to_string()));
    }

    #[test]
    fn invalidate_all_empties_the_cache() {
        let cache: CoalescingCache<String, u32> = CoalescingCache::new();
        tokio_test::block_on(async {
            assert_ok!(cache.get(&"a".to_string(), || async { Ok(1) }).await);
        });
        cache.invalidate_all();
        assert!(!cache.contains(&"a".to_string()));
    }
}
