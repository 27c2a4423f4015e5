use crate::{Dataset, QueryEngine, QueryError};
use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// Sentinel meaning the cache has never been populated.
const UNSET: i64 = i64::MIN;

/// Process-wide cache of the latest timestamp a dataset covers.
///
/// Reads are lock-free. One background thread refreshes the value
/// periodically; a stale value only makes coverage checks more
/// conservative, never incorrect.
#[derive(Debug)]
pub struct CoverageCache {
    dataset: Dataset,
    latest: AtomicI64,
}

impl CoverageCache {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            latest: AtomicI64::new(UNSET),
        }
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    /// Last successfully fetched value, if any. Never blocks.
    pub fn get(&self) -> Option<i64> {
        match self.latest.load(Ordering::Relaxed) {
            UNSET => None,
            t => Some(t),
        }
    }

    /// Queries the backend and stores the result.
    pub fn refresh<Q: QueryEngine + ?Sized>(&self, query: &Q) -> Result<i64, QueryError> {
        let latest = query.latest_timestamp(self.dataset)?;
        self.latest.store(latest, Ordering::Relaxed);
        Ok(latest)
    }

    /// Cached value, falling back to a live query on a cold cache.
    pub fn latest_or_fetch<Q: QueryEngine + ?Sized>(&self, query: &Q) -> Result<i64, QueryError> {
        match self.get() {
            Some(t) => Ok(t),
            None => self.refresh(query),
        }
    }

    /// Spawns the periodic refresh thread. A failed refresh keeps the
    /// previous value.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        query: Arc<dyn QueryEngine>,
        period: Duration,
    ) -> thread::JoinHandle<()> {
        let cache = Arc::clone(self);
        thread::spawn(move || loop {
            match cache.refresh(query.as_ref()) {
                Ok(latest) => debug!("{:?} coverage now ends at {latest}", cache.dataset),
                Err(e) => warn!("{:?} coverage refresh failed: {e}", cache.dataset),
            }
            thread::sleep(period);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::CoverageCache;
    use crate::{BBox, Dataset, DatasetStore, GridSpec, GridStore};
    use std::collections::BTreeMap;

    fn store(latest: i64) -> GridStore {
        let grid = GridSpec::from_scale(
            BBox {
                w: 0.0,
                s: 0.0,
                e: 1.0,
                n: 1.0,
            },
            1.0,
        )
        .unwrap();
        let mut land = DatasetStore::new(grid);
        land.push_snapshot(latest, BTreeMap::new());
        let mut store = GridStore::default();
        store.land = Some(land);
        store
    }

    #[test]
    fn cold_cache_falls_back_to_live_query() {
        let cache = CoverageCache::new(Dataset::Land);
        assert_eq!(cache.get(), None);
        assert_eq!(cache.latest_or_fetch(&store(7200)).unwrap(), 7200);
        assert_eq!(cache.get(), Some(7200));
    }

    #[test]
    fn failed_refresh_keeps_previous_value() {
        let cache = CoverageCache::new(Dataset::Land);
        cache.refresh(&store(3600)).unwrap();
        assert!(cache.refresh(&GridStore::default()).is_err());
        assert_eq!(cache.get(), Some(3600));
    }
}
