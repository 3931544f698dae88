//! Cached happening list
//!
//! The first [`HappeningManager::load`] blocks on the service. Later loads
//! return the cached list at once and refresh it on a background thread.
//! Concurrent first loads coalesce: one caller fetches, the others poll
//! the `loading` flag.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use crate::domain::{Happening, HappeningListOptions, HappeningPatch};
use crate::storage::{HappeningService, Result, StorageError};

/// Number of happenings kept in the cache
const LOAD_LIMIT: usize = 20;

/// Delay between checks while another caller is loading
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Cache {
    cached: Vec<Happening>,
    loaded: bool,
    loading: bool,
}

/// Called with the fresh list after a background refresh replaced the cache
pub type RefreshNotify = Arc<dyn Fn(&[Happening]) + Send + Sync>;

#[derive(Clone)]
pub struct HappeningManager {
    service: Arc<dyn HappeningService>,
    cache: Arc<RwLock<Cache>>,
    notify: Option<RefreshNotify>,
}

impl HappeningManager {
    pub fn new(service: Arc<dyn HappeningService>) -> Self {
        Self {
            service,
            cache: Arc::new(RwLock::new(Cache::default())),
            notify: None,
        }
    }

    /// Sets the callback fired when a background refresh lands
    pub fn with_notify(mut self, notify: RefreshNotify) -> Self {
        self.notify = Some(notify);
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Cache>> {
        self.cache
            .read()
            .map_err(|_| StorageError::Internal("happening cache lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Cache>> {
        self.cache
            .write()
            .map_err(|_| StorageError::Internal("happening cache lock poisoned".into()))
    }

    fn fetch(&self) -> Result<Vec<Happening>> {
        let opts = HappeningListOptions {
            limit: LOAD_LIMIT,
            ..HappeningListOptions::default()
        };
        let (mut list, _) = self.service.list(&opts)?;
        list.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    /// Returns the happenings in ascending create_time order
    pub fn load(&self) -> Result<Vec<Happening>> {
        loop {
            {
                let cache = self.read()?;
                if cache.loaded {
                    let cached = cache.cached.clone();
                    drop(cache);
                    self.spawn_refresh();
                    return Ok(cached);
                }
            }

            {
                let mut cache = self.write()?;
                if cache.loaded {
                    continue;
                }
                if !cache.loading {
                    cache.loading = true;
                    break;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }

        let fetched = self.fetch();
        let mut cache = self.write()?;
        cache.loading = false;
        let list = fetched?;
        cache.cached = list.clone();
        cache.loaded = true;
        tracing::debug!(count = list.len(), "happenings loaded");
        Ok(list)
    }

    fn spawn_refresh(&self) {
        let manager = self.clone();
        let spawned = thread::Builder::new()
            .name("lifelog-happening-refresh".into())
            .spawn(move || match manager.fetch() {
                Ok(list) => {
                    if let Ok(mut cache) = manager.write() {
                        if cache.loaded {
                            cache.cached = list.clone();
                        }
                    }
                    if let Some(notify) = &manager.notify {
                        notify(&list);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "happening refresh failed"),
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "failed to spawn happening refresh");
        }
    }

    fn resort(cache: &mut Cache) {
        cache
            .cached
            .sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));
    }

    pub fn add(&self, content: &str) -> Result<Happening> {
        let happening = self.service.add(Happening::new(content))?;
        let mut cache = self.write()?;
        if cache.loaded {
            cache.cached.push(happening.clone());
            Self::resort(&mut cache);
        }
        Ok(happening)
    }

    pub fn update(&self, id: i64, patch: &HappeningPatch) -> Result<Happening> {
        let happening = self.service.update(id, patch)?;
        let mut cache = self.write()?;
        if cache.loaded {
            if let Some(slot) = cache.cached.iter_mut().find(|h| h.id == id) {
                *slot = happening.clone();
            }
            Self::resort(&mut cache);
        }
        Ok(happening)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        self.service.delete(id)?;
        let mut cache = self.write()?;
        if cache.loaded {
            cache.cached.retain(|h| h.id != id);
        }
        Ok(())
    }

    /// Forces the next load to fetch synchronously
    pub fn invalidate_cache(&self) -> Result<()> {
        let mut cache = self.write()?;
        cache.loaded = false;
        cache.cached.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Counts list calls and delays them
    struct Slow {
        inner: SqliteStore,
        lists: AtomicUsize,
        delay: Duration,
    }

    impl HappeningService for Slow {
        fn list(&self, opts: &HappeningListOptions) -> Result<(Vec<Happening>, u64)> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            HappeningService::list(&self.inner, opts)
        }
        fn add(&self, happening: Happening) -> Result<Happening> {
            HappeningService::add(&self.inner, happening)
        }
        fn update(&self, id: i64, patch: &HappeningPatch) -> Result<Happening> {
            HappeningService::update(&self.inner, id, patch)
        }
        fn delete(&self, id: i64) -> Result<()> {
            HappeningService::delete(&self.inner, id)
        }
    }

    fn slow(delay_ms: u64) -> Arc<Slow> {
        Arc::new(Slow {
            inner: SqliteStore::open_in_memory().unwrap(),
            lists: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[test]
    fn load_returns_ascending_by_create_time() {
        let store = slow(0);
        let now = Utc::now();
        for (content, age) in [("newest", 1), ("oldest", 3), ("middle", 2)] {
            let mut h = Happening::new(content);
            h.create_time = now - ChronoDuration::hours(age);
            HappeningService::add(&store.inner, h).unwrap();
        }

        let manager = HappeningManager::new(store);
        let list = manager.load().unwrap();
        let contents: Vec<_> = list.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["oldest", "middle", "newest"]);
    }

    #[test]
    fn concurrent_first_loads_fetch_once() {
        let store = slow(50);
        let manager = HappeningManager::new(store.clone());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = manager.clone();
                thread::spawn(move || m.load().unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // One synchronous fetch; later callers may have seen the cache and
        // spawned refreshes, which start after the first load finished.
        assert!(store.lists.load(Ordering::SeqCst) >= 1);
        let cache = manager.cache.read().unwrap();
        assert!(cache.loaded);
        assert!(!cache.loading);
    }

    #[test]
    fn cached_load_refreshes_in_background() {
        let store = slow(0);
        let (tx, rx) = mpsc::channel();
        let manager = HappeningManager::new(store.clone()).with_notify(Arc::new(move |_: &[Happening]| {
            let _ = tx.send(());
        }));

        assert!(manager.load().unwrap().is_empty());
        HappeningService::add(&store.inner, Happening::new("written elsewhere")).unwrap();

        // Served from cache, then refreshed.
        assert!(manager.load().unwrap().is_empty());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(manager.load().unwrap().len(), 1);
    }

    #[test]
    fn mutations_update_loaded_cache() {
        let manager = HappeningManager::new(slow(0));
        manager.load().unwrap();

        let a = manager.add("first").unwrap();
        let b = manager.add("second").unwrap();
        manager.update(a.id, &HappeningPatch::content("first, edited")).unwrap();
        manager.delete(b.id).unwrap();

        let cached = manager.cache.read().unwrap().cached.clone();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].content, "first, edited");
    }

    #[test]
    fn invalidate_forces_fetch() {
        let store = slow(0);
        let manager = HappeningManager::new(store.clone());
        manager.load().unwrap();
        manager.invalidate_cache().unwrap();
        assert!(!manager.cache.read().unwrap().loaded);

        HappeningService::add(&store.inner, Happening::new("x")).unwrap();
        assert_eq!(manager.load().unwrap().len(), 1);
    }
}
