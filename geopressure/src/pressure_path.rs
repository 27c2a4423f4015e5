//! Reanalysis variables (and altitude) along a known path.

use crate::{
    altitude,
    chunk::{ChunkedExecutor, ColumnSet},
    EngineError, Observation, TemporalMatcher,
};
use reanalysis::{
    CoverageCache, Dataset, GridSpec, QueryEngine, StaticField, SURFACE_PRESSURE, TEMPERATURE_2M,
};

#[derive(Debug, Clone)]
pub struct PressurePathOptions {
    /// Reanalysis band names to extract per observation.
    pub variables: Vec<String>,

    pub dataset: Dataset,

    /// Number of chunks the observation set is split into.
    pub workers: usize,
}

impl Default for PressurePathOptions {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            dataset: Dataset::Both,
            workers: 10,
        }
    }
}

/// Chunked extraction of reanalysis variables along a path of timed
/// observations.
pub struct PressurePathExtractor<'a, Q: QueryEngine + ?Sized> {
    query: &'a Q,
    opts: PressurePathOptions,
}

impl<'a, Q: QueryEngine + ?Sized> PressurePathExtractor<'a, Q> {
    pub fn new(query: &'a Q, opts: PressurePathOptions) -> Self {
        Self { query, opts }
    }

    /// Columns are `time`, each requested variable, and `altitude`
    /// when every observation carries a pressure reading.
    pub fn extract(
        &self,
        observations: &[Observation],
        cache: Option<&CoverageCache>,
    ) -> Result<ColumnSet, EngineError> {
        let matcher = TemporalMatcher::new(self.query, self.opts.dataset);
        let end = observations.iter().map(|obs| obs.time).max().unwrap_or(0);
        matcher.check_coverage(end, cache)?;

        let with_altitude = !observations.is_empty()
            && observations.iter().all(|obs| obs.pressure.is_some());
        let executor = ChunkedExecutor::new(self.opts.workers);
        executor.run(observations, |chunk| self.chunk_columns(chunk, with_altitude))
    }

    fn chunk_columns(
        &self,
        chunk: &[Observation],
        with_altitude: bool,
    ) -> Result<ColumnSet, EngineError> {
        let matcher = TemporalMatcher::new(self.query, self.opts.dataset);
        let pairs = matcher.match_all(chunk)?;

        let mut bands: Vec<String> = Vec::new();
        if with_altitude {
            bands.push(SURFACE_PRESSURE.to_string());
            bands.push(TEMPERATURE_2M.to_string());
        }
        for variable in &self.opts.variables {
            if !bands.contains(variable) {
                bands.push(variable.clone());
            }
        }

        let mut columns = ColumnSet::new();
        let mut push = |key: &str, value: Option<f64>| {
            columns.entry(key.to_string()).or_default().push(value);
        };
        for pair in &pairs {
            let values = self.query.sample_point(&pair.snapshot, &bands, pair.obs.coord)?;
            push("time", Some(pair.obs.time as f64));
            for variable in &self.opts.variables {
                let at = bands.iter().position(|b| b == variable).expect("band added");
                push(variable, values[at]);
            }
            if with_altitude {
                let reference = self.geopotential_at(&pair.obs)?;
                let estimate = match (pair.obs.pressure, values[0], values[1], reference) {
                    (Some(p), Some(p0), Some(t), Some(h0)) => {
                        Some(altitude::barometric_altitude(p, p0, t, h0))
                    }
                    _ => None,
                };
                push("altitude", estimate);
            }
        }
        Ok(columns)
    }

    fn geopotential_at(&self, obs: &Observation) -> Result<Option<f64>, EngineError> {
        let grid = GridSpec::single(obs.coord, 0.01);
        let raster = self.query.static_field(StaticField::Geopotential, &grid)?;
        Ok(raster.cells()[0])
    }
}

#[cfg(test)]
mod tests {
    use super::{PressurePathExtractor, PressurePathOptions};
    use crate::Observation;
    use geo::geometry::Coord;
    use reanalysis::{
        BBox, Dataset, DatasetStore, GridSpec, GridStore, TerrainStore, SURFACE_PRESSURE,
        TEMPERATURE_2M,
    };
    use std::collections::BTreeMap;

    const P0: f64 = 101_325.0;

    fn store() -> GridStore {
        let grid = GridSpec::from_scale(
            BBox {
                w: 0.0,
                s: 0.0,
                e: 2.0,
                n: 2.0,
            },
            1.0,
        )
        .unwrap();
        let mut land = DatasetStore::new(grid);
        for time in [0, 3600, 7200] {
            let mut bands = BTreeMap::new();
            bands.insert(SURFACE_PRESSURE.to_string(), vec![Some(P0); 4]);
            bands.insert(TEMPERATURE_2M.to_string(), vec![Some(288.15); 4]);
            land.push_snapshot(time, bands);
        }
        let mut store = GridStore::default();
        store.land = Some(land);
        store.terrain = Some(TerrainStore {
            grid,
            dem_min: Vec::new(),
            dem_max: Vec::new(),
            geopotential: vec![Some(25.0); 4],
            dem: None,
        });
        store
    }

    fn observations(n: usize) -> Vec<Observation> {
        (0..n)
            .map(|i| Observation {
                time: (i as i64 % 3) * 3600,
                pressure: Some(P0),
                coord: Coord { x: 0.5, y: 0.5 },
                label: None,
            })
            .collect()
    }

    #[test]
    fn columns_cover_every_observation() {
        let store = store();
        let extractor = PressurePathExtractor::new(
            &store,
            PressurePathOptions {
                variables: vec![SURFACE_PRESSURE.to_string()],
                dataset: Dataset::Land,
                workers: 4,
            },
        );
        let observations = observations(11);
        let columns = extractor.extract(&observations, None).unwrap();
        assert_eq!(columns["time"].len(), 11);
        assert_eq!(columns[SURFACE_PRESSURE].len(), 11);
        // Same pressure as the surface puts the device at the
        // geopotential height.
        assert_eq!(columns["altitude"], vec![Some(25.0); 11]);
    }

    #[test]
    fn chunk_count_does_not_change_result() {
        let store = store();
        let observations = observations(23);
        let mut results = Vec::new();
        for workers in [1, 5, 23] {
            let extractor = PressurePathExtractor::new(
                &store,
                PressurePathOptions {
                    variables: vec![TEMPERATURE_2M.to_string()],
                    dataset: Dataset::Land,
                    workers,
                },
            );
            results.push(extractor.extract(&observations, None).unwrap());
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], results[2]);
    }

    #[test]
    fn no_pressure_means_no_altitude_column() {
        let store = store();
        let mut observations = observations(4);
        for obs in &mut observations {
            obs.pressure = None;
        }
        let extractor = PressurePathExtractor::new(
            &store,
            PressurePathOptions {
                variables: vec![SURFACE_PRESSURE.to_string()],
                dataset: Dataset::Land,
                workers: 2,
            },
        );
        let columns = extractor.extract(&observations, None).unwrap();
        assert!(!columns.contains_key("altitude"));
        assert_eq!(columns["time"].len(), 4);
    }
}
