//! Elevation profiles along a sampled path.

use crate::{EngineError, PathSampler};
use reanalysis::{QueryEngine, C};

/// Native DEM resolutions available for percentile reduction, meters.
pub const RESOLUTION_LADDER_M: [C; 5] = [30.0, 90.0, 250.0, 500.0, 1000.0];

/// Picks the coarsest ladder rung not exceeding the requested scale,
/// or the finest rung when the scale is finer than all of them.
pub fn ladder_resolution(scale_m: C) -> C {
    RESOLUTION_LADDER_M
        .iter()
        .copied()
        .filter(|rung| *rung <= scale_m)
        .fold(RESOLUTION_LADDER_M[0], C::max)
}

/// Per-sample elevation percentiles, as parallel arrays sharing index
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationProfile {
    /// Index of the path segment each sample falls on.
    pub stap: Vec<usize>,

    pub lon: Vec<C>,
    pub lat: Vec<C>,

    /// Distance from the start of the path, meters.
    pub distance: Vec<C>,

    /// Requested percentiles, in request order.
    pub percentiles: Vec<f64>,

    /// One column per requested percentile, one row per sample.
    pub elevations: Vec<Vec<Option<f64>>>,

    /// DEM resolution actually used, meters.
    pub resolution: C,
}

pub struct ElevationProfileExtractor<'a, Q: QueryEngine + ?Sized> {
    query: &'a Q,
}

impl<'a, Q: QueryEngine + ?Sized> ElevationProfileExtractor<'a, Q> {
    pub fn new(query: &'a Q) -> Self {
        Self { query }
    }

    pub fn extract(
        &self,
        sampler: &PathSampler,
        scale_m: C,
        sampling_m: C,
        percentiles: &[f64],
    ) -> Result<ElevationProfile, EngineError> {
        let samples = sampler.sample(sampling_m)?;
        let resolution = ladder_resolution(scale_m);
        let points: Vec<_> = samples.iter().map(|s| s.coord).collect();
        let values = self
            .query
            .sample_elevation(&points, resolution, percentiles)?;

        let mut elevations = vec![Vec::with_capacity(samples.len()); percentiles.len()];
        for row in values {
            debug_assert_eq!(row.len(), percentiles.len());
            for (column, value) in elevations.iter_mut().zip(row) {
                column.push(value);
            }
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(ElevationProfile {
            stap: samples
                .iter()
                .map(|s| s.path_position.floor() as usize)
                .collect(),
            lon: samples.iter().map(|s| s.coord.x).collect(),
            lat: samples.iter().map(|s| s.coord.y).collect(),
            distance: samples.iter().map(|s| s.distance).collect(),
            percentiles: percentiles.to_vec(),
            elevations,
            resolution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ladder_resolution, ElevationProfileExtractor};
    use crate::PathSampler;
    use geo::geometry::Coord;
    use reanalysis::{BBox, DemStore, GridSpec, GridStore, TerrainStore};

    #[test]
    fn ladder_picks_coarsest_fitting_rung() {
        assert_eq!(ladder_resolution(100.0), 90.0);
        assert_eq!(ladder_resolution(90.0), 90.0);
        assert_eq!(ladder_resolution(5000.0), 1000.0);
        // Finer than everything: fall back to the finest rung.
        assert_eq!(ladder_resolution(10.0), 30.0);
    }

    fn store() -> GridStore {
        let grid = GridSpec::from_scale(
            BBox {
                w: -1.0,
                s: -1.0,
                e: 1.0,
                n: 1.0,
            },
            5.0,
        )
        .unwrap();
        let cells = (0..grid.len()).map(|i| Some(i as f64)).collect();
        let mut store = GridStore::default();
        store.terrain = Some(TerrainStore {
            grid,
            dem_min: Vec::new(),
            dem_max: Vec::new(),
            geopotential: Vec::new(),
            dem: Some(DemStore { grid, cells }),
        });
        store
    }

    #[test]
    fn single_point_single_percentile() {
        let store = store();
        let sampler = PathSampler::new(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 0.0, y: 0.0 },
        ])
        .unwrap();
        let profile = ElevationProfileExtractor::new(&store)
            .extract(&sampler, 90.0, 10_000.0, &[50.0])
            .unwrap();
        assert_eq!(profile.stap, vec![0]);
        assert_eq!(profile.percentiles, vec![50.0]);
        assert_eq!(profile.elevations.len(), 1);
        assert_eq!(profile.elevations[0].len(), 1);
        assert!(profile.elevations[0][0].is_some());
    }

    #[test]
    fn profile_arrays_share_index_order() {
        let store = store();
        let sampler = PathSampler::new(vec![
            Coord { x: -0.5, y: -0.5 },
            Coord { x: 0.5, y: 0.5 },
        ])
        .unwrap();
        let profile = ElevationProfileExtractor::new(&store)
            .extract(&sampler, 1000.0, 30_000.0, &[10.0, 90.0])
            .unwrap();
        let n = profile.lon.len();
        assert!(n > 2);
        assert_eq!(profile.lat.len(), n);
        assert_eq!(profile.distance.len(), n);
        assert_eq!(profile.stap.len(), n);
        for column in &profile.elevations {
            assert_eq!(column.len(), n);
        }
    }
}
