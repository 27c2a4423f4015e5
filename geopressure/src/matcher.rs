use crate::{EngineError, Observation};
use log::debug;
use reanalysis::{CoverageCache, Dataset, QueryEngine, Snapshot};

/// Maximum |Δt| between an observation and its matched snapshot.
pub const MATCH_TOLERANCE_S: i64 = 3600;

/// An observation joined with its nearest-in-time snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub obs: Observation,
    pub snapshot: Snapshot,
}

/// Nearest-timestamp join between observations and a reanalysis
/// collection.
pub struct TemporalMatcher<'a, Q: QueryEngine + ?Sized> {
    query: &'a Q,
    dataset: Dataset,
}

impl<'a, Q: QueryEngine + ?Sized> TemporalMatcher<'a, Q> {
    pub fn new(query: &'a Q, dataset: Dataset) -> Self {
        Self { query, dataset }
    }

    /// Rejects requests reaching past the end of the dataset before
    /// any matching work is done.
    ///
    /// Reads the coverage cache when one is supplied, falling back to
    /// a live query on a cold cache.
    pub fn check_coverage(
        &self,
        end: i64,
        cache: Option<&CoverageCache>,
    ) -> Result<(), EngineError> {
        let latest = match cache {
            Some(cache) => cache.latest_or_fetch(self.query)?,
            None => self.query.latest_timestamp(self.dataset)?,
        };
        if end > latest {
            return Err(EngineError::Coverage { latest });
        }
        Ok(())
    }

    pub fn match_one(&self, obs: &Observation) -> Result<Option<MatchedPair>, EngineError> {
        let snapshot = self
            .query
            .match_nearest(self.dataset, obs.time, MATCH_TOLERANCE_S)?;
        Ok(snapshot.map(|snapshot| MatchedPair {
            obs: obs.clone(),
            snapshot,
        }))
    }

    /// Matches every observation, dropping those with no snapshot
    /// within tolerance.
    pub fn match_all(&self, observations: &[Observation]) -> Result<Vec<MatchedPair>, EngineError> {
        let mut pairs = Vec::with_capacity(observations.len());
        for obs in observations {
            if let Some(pair) = self.match_one(obs)? {
                pairs.push(pair);
            }
        }
        if pairs.len() < observations.len() {
            debug!(
                "dropped {} of {} observations with no snapshot within {MATCH_TOLERANCE_S}s",
                observations.len() - pairs.len(),
                observations.len()
            );
        }
        Ok(pairs)
    }

    /// Matches every observation, failing on the first one with no
    /// snapshot within tolerance.
    pub fn match_all_strict(
        &self,
        observations: &[Observation],
    ) -> Result<Vec<MatchedPair>, EngineError> {
        observations
            .iter()
            .map(|obs| {
                self.match_one(obs)?.ok_or(EngineError::NoMatch {
                    time: obs.time,
                    tolerance: MATCH_TOLERANCE_S,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{TemporalMatcher, MATCH_TOLERANCE_S};
    use crate::Observation;
    use reanalysis::{BBox, CoverageCache, Dataset, DatasetStore, GridSpec, GridStore};
    use geo::geometry::Coord;
    use std::collections::BTreeMap;

    fn store(times: &[i64]) -> GridStore {
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
        for &t in times {
            land.push_snapshot(t, BTreeMap::new());
        }
        let mut store = GridStore::default();
        store.land = Some(land);
        store
    }

    fn obs(time: i64) -> Observation {
        Observation {
            time,
            pressure: Some(101_325.0),
            coord: Coord { x: 0.5, y: 0.5 },
            label: None,
        }
    }

    #[test]
    fn never_matches_beyond_tolerance() {
        let store = store(&[0, 7200, 14_400]);
        let matcher = TemporalMatcher::new(&store, Dataset::Land);
        for time in (0..20_000).step_by(500) {
            if let Some(pair) = matcher.match_one(&obs(time)).unwrap() {
                assert!((pair.snapshot.time - time).abs() <= MATCH_TOLERANCE_S);
            }
        }
    }

    #[test]
    fn strict_matching_fails_on_gap() {
        let store = store(&[0, 86_400]);
        let matcher = TemporalMatcher::new(&store, Dataset::Land);
        let observations = vec![obs(600), obs(43_200)];
        assert!(matcher.match_all_strict(&observations).is_err());
        // The permissive variant drops the unmatched one instead.
        assert_eq!(matcher.match_all(&observations).unwrap().len(), 1);
    }

    #[test]
    fn coverage_check_fails_fast() {
        let store = store(&[0, 7200]);
        let matcher = TemporalMatcher::new(&store, Dataset::Land);
        assert!(matcher.check_coverage(7200, None).is_ok());
        let err = matcher.check_coverage(10_000, None).unwrap_err();
        assert_eq!(err.to_string(), "dataset not available beyond 7200");

        let cache = CoverageCache::new(Dataset::Land);
        assert!(matcher.check_coverage(10_000, Some(&cache)).is_err());
        assert_eq!(cache.get(), Some(7200));
    }
}
