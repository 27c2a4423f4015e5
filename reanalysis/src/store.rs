//! In-memory grid-store backend.
//!
//! Holds reanalysis snapshots and terrain fields as plain row-major
//! grids. Useful on its own for modest local datasets (it is what the
//! CLI loads from JSON) and as the reference backend for tests.

use crate::{Dataset, GridSpec, QueryEngine, QueryError, Raster, Snapshot, StaticField, C};
use dashmap::DashMap;
use geo::{algorithm::HaversineDistance, geometry::Coord, geometry::Point};
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

/// All bands of one snapshot, on the owning store's grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotGrids {
    /// Snapshot timestamp, unix seconds.
    pub time: i64,

    /// Band name to row-major cells, north row first.
    pub bands: BTreeMap<String, Vec<Option<f64>>>,
}

/// One reanalysis collection: a grid and its time-ordered snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStore {
    pub grid: GridSpec,
    pub snapshots: Vec<SnapshotGrids>,
}

impl DatasetStore {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            snapshots: Vec::new(),
        }
    }

    /// Appends a snapshot, keeping `snapshots` sorted by time.
    pub fn push_snapshot(&mut self, time: i64, bands: BTreeMap<String, Vec<Option<f64>>>) {
        for cells in bands.values() {
            assert_eq!(cells.len(), self.grid.len());
        }
        let at = self.snapshots.partition_point(|s| s.time < time);
        self.snapshots.insert(at, SnapshotGrids { time, bands });
    }

    fn find(&self, time: i64) -> Option<&SnapshotGrids> {
        self.snapshots
            .binary_search_by_key(&time, |s| s.time)
            .ok()
            .map(|i| &self.snapshots[i])
    }

    /// Nearest snapshot time to `time`, with its absolute offset.
    fn nearest(&self, time: i64) -> Option<(i64, i64)> {
        if self.snapshots.is_empty() {
            return None;
        }
        let at = self.snapshots.partition_point(|s| s.time < time);
        let mut best: Option<(i64, i64)> = None;
        for candidate in at.saturating_sub(1)..=at.min(self.snapshots.len() - 1) {
            let t = self.snapshots[candidate].time;
            let dt = (t - time).abs();
            if best.map_or(true, |(_, bdt)| dt < bdt) {
                best = Some((t, dt));
            }
        }
        best
    }

    fn value_at(&self, time: i64, band: &str, coord: Coord<C>) -> Option<Option<f64>> {
        let snapshot = self.find(time)?;
        let cells = snapshot.bands.get(band)?;
        Some(self.grid.index_of(coord).and_then(|i| cells[i]))
    }
}

/// High-resolution ground elevation used for percentile profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemStore {
    pub grid: GridSpec,
    pub cells: Vec<Option<f64>>,
}

/// Static terrain fields on the reanalysis grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainStore {
    pub grid: GridSpec,
    #[serde(default)]
    pub dem_min: Vec<Option<f64>>,
    #[serde(default)]
    pub dem_max: Vec<Option<f64>>,
    #[serde(default)]
    pub geopotential: Vec<Option<f64>>,
    #[serde(default)]
    pub dem: Option<DemStore>,
}

/// A raster published through [`QueryEngine::export_raster`].
///
/// The store keeps exported rasters addressable by URL so callers (and
/// tests) can fetch what a real service would serve over HTTP.
#[derive(Debug, Clone)]
pub struct ExportedRaster {
    pub name: String,
    pub grid: GridSpec,
    pub bands: Vec<(String, Vec<Option<f64>>)>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GridStore {
    #[serde(default)]
    pub land: Option<DatasetStore>,
    #[serde(default)]
    pub single_levels: Option<DatasetStore>,
    #[serde(default)]
    pub terrain: Option<TerrainStore>,

    /// Exported artifacts, keyed by URL. Written concurrently by the
    /// export fan-out.
    #[serde(skip)]
    exports: DashMap<String, ExportedRaster>,

    #[serde(skip)]
    export_seq: AtomicU64,
}

impl GridStore {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, QueryError> {
        let file = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }

    /// Fetches a previously exported raster by its URL.
    pub fn export(&self, url: &str) -> Option<ExportedRaster> {
        self.exports.get(url).map(|e| e.clone())
    }

    /// Stores to read for `dataset`, in fallback priority order.
    fn stores(&self, dataset: Dataset) -> Result<Vec<&DatasetStore>, QueryError> {
        let stores: Vec<&DatasetStore> = match dataset {
            Dataset::Land => self.land.iter().collect(),
            Dataset::SingleLevels => self.single_levels.iter().collect(),
            Dataset::Both => self.land.iter().chain(self.single_levels.iter()).collect(),
        };
        if stores.is_empty() {
            return Err(QueryError::EmptyDataset(dataset));
        }
        Ok(stores)
    }

    fn terrain(&self) -> Result<&TerrainStore, QueryError> {
        self.terrain.as_ref().ok_or(QueryError::NoTerrain)
    }
}

impl QueryEngine for GridStore {
    fn latest_timestamp(&self, dataset: Dataset) -> Result<i64, QueryError> {
        self.stores(dataset)?
            .iter()
            .filter_map(|s| s.snapshots.last().map(|snap| snap.time))
            .max()
            .ok_or(QueryError::EmptyDataset(dataset))
    }

    fn snapshot_times(
        &self,
        dataset: Dataset,
        start: i64,
        end: i64,
    ) -> Result<Vec<i64>, QueryError> {
        let mut times: Vec<i64> = self
            .stores(dataset)?
            .iter()
            .flat_map(|s| s.snapshots.iter().map(|snap| snap.time))
            .filter(|t| (start..=end).contains(t))
            .collect();
        times.sort_unstable();
        times.dedup();
        Ok(times)
    }

    fn match_nearest(
        &self,
        dataset: Dataset,
        time: i64,
        tolerance_s: i64,
    ) -> Result<Option<Snapshot>, QueryError> {
        let best = self
            .stores(dataset)?
            .iter()
            .filter_map(|s| s.nearest(time))
            .min_by_key(|(_, dt)| *dt);
        Ok(best.and_then(|(t, dt)| {
            (dt <= tolerance_s).then_some(Snapshot {
                dataset,
                time: t,
            })
        }))
    }

    fn reduce_region(
        &self,
        snapshot: &Snapshot,
        band: &str,
        grid: &GridSpec,
    ) -> Result<Raster, QueryError> {
        let stores = self.stores(snapshot.dataset)?;
        if !stores
            .iter()
            .any(|s| s.snapshots.iter().any(|snap| snap.bands.contains_key(band)))
        {
            return Err(QueryError::UnknownBand(band.to_string()));
        }
        if !stores.iter().any(|s| s.find(snapshot.time).is_some()) {
            return Err(QueryError::MissingSnapshot(snapshot.time));
        }
        let cells = grid
            .centers()
            .map(|center| {
                stores
                    .iter()
                    .find_map(|s| s.value_at(snapshot.time, band, center).flatten())
            })
            .collect();
        Ok(Raster::new(*grid, cells))
    }

    fn sample_point(
        &self,
        snapshot: &Snapshot,
        bands: &[String],
        coord: Coord<C>,
    ) -> Result<Vec<Option<f64>>, QueryError> {
        let stores = self.stores(snapshot.dataset)?;
        bands
            .iter()
            .map(|band| {
                if !stores
                    .iter()
                    .any(|s| s.snapshots.iter().any(|snap| snap.bands.contains_key(band)))
                {
                    return Err(QueryError::UnknownBand(band.clone()));
                }
                Ok(stores
                    .iter()
                    .find_map(|s| s.value_at(snapshot.time, band, coord).flatten()))
            })
            .collect()
    }

    fn static_field(&self, field: StaticField, grid: &GridSpec) -> Result<Raster, QueryError> {
        let terrain = self.terrain()?;
        let cells = match field {
            StaticField::DemMin => &terrain.dem_min,
            StaticField::DemMax => &terrain.dem_max,
            StaticField::Geopotential => &terrain.geopotential,
        };
        let resampled = grid
            .centers()
            .map(|center| terrain.grid.index_of(center).and_then(|i| cells[i]))
            .collect();
        Ok(Raster::new(*grid, resampled))
    }

    fn sample_elevation(
        &self,
        points: &[Coord<C>],
        scale_m: C,
        percentiles: &[f64],
    ) -> Result<Vec<Vec<Option<f64>>>, QueryError> {
        let dem = self.terrain()?.dem.as_ref().ok_or(QueryError::NoTerrain)?;
        let half = (scale_m * crate::DEGREES_PER_METER / 2.0).max(f64::EPSILON);
        Ok(points
            .iter()
            .map(|point| {
                let mut values: Vec<f64> = dem
                    .grid
                    .centers()
                    .zip(&dem.cells)
                    .filter(|(center, _)| {
                        (center.x - point.x).abs() <= half && (center.y - point.y).abs() <= half
                    })
                    .filter_map(|(_, cell)| *cell)
                    .collect();
                // Fall back to the single containing cell when the
                // window is narrower than the DEM resolution.
                if values.is_empty() {
                    if let Some(v) = dem.grid.index_of(*point).and_then(|i| dem.cells[i]) {
                        values.push(v);
                    }
                }
                values.sort_unstable_by(|a, b| a.total_cmp(b));
                percentiles
                    .iter()
                    .map(|p| percentile(&values, *p))
                    .collect()
            })
            .collect())
    }

    fn export_raster(
        &self,
        name: &str,
        grid: &GridSpec,
        bands: &[(&str, &Raster)],
    ) -> Result<String, QueryError> {
        let seq = self.export_seq.fetch_add(1, Ordering::Relaxed);
        let url = format!("gridstore://exports/{seq}/{name}.tiff");
        let exported = ExportedRaster {
            name: name.to_string(),
            grid: *grid,
            bands: bands
                .iter()
                .map(|(band, raster)| ((*band).to_string(), raster.cells().to_vec()))
                .collect(),
        };
        self.exports.insert(url.clone(), exported);
        Ok(url)
    }

    fn nearest_valid(
        &self,
        dataset: Dataset,
        coord: Coord<C>,
        max_distance_m: C,
    ) -> Result<Option<(Coord<C>, C)>, QueryError> {
        let stores = self.stores(dataset)?;
        let point = Point::from(coord);
        let mut best: Option<(Coord<C>, C)> = None;
        for store in stores {
            let Some(first) = store.snapshots.first() else {
                continue;
            };
            let Some(cells) = first.bands.get(crate::SURFACE_PRESSURE) else {
                continue;
            };
            if let Some(Some(_)) = store.grid.index_of(coord).map(|i| cells[i]) {
                return Ok(Some((coord, 0.0)));
            }
            for (center, cell) in store.grid.centers().zip(cells) {
                if cell.is_none() {
                    continue;
                }
                let distance = point.haversine_distance(&Point::from(center));
                if distance <= max_distance_m
                    && best.map_or(true, |(_, bd)| distance < bd)
                {
                    best = Some((center, distance));
                }
            }
        }
        Ok(best)
    }
}

/// Linear-interpolated percentile of ascending `values`.
pub fn percentile<T>(values: &[T], p: f64) -> Option<T>
where
    T: Float + FromPrimitive,
{
    if values.is_empty() {
        return None;
    }
    let rank = T::from_f64(p / 100.0)? * T::from_usize(values.len() - 1)?;
    let lo = rank.floor().to_usize()?;
    let hi = (lo + 1).min(values.len() - 1);
    let frac = rank - rank.floor();
    Some(values[lo] + frac * (values[hi] - values[lo]))
}

#[cfg(test)]
mod tests {
    use super::{percentile, DatasetStore, GridStore};
    use crate::{BBox, Dataset, GridSpec, QueryEngine, Snapshot, SURFACE_PRESSURE};
    use approx::assert_relative_eq;
    use geo::geometry::Coord;
    use std::collections::BTreeMap;

    fn grid() -> GridSpec {
        GridSpec::from_scale(
            BBox {
                w: 0.0,
                s: 0.0,
                e: 2.0,
                n: 2.0,
            },
            1.0,
        )
        .unwrap()
    }

    fn band(values: [Option<f64>; 4]) -> BTreeMap<String, Vec<Option<f64>>> {
        let mut bands = BTreeMap::new();
        bands.insert(SURFACE_PRESSURE.to_string(), values.to_vec());
        bands
    }

    fn store() -> GridStore {
        let mut land = DatasetStore::new(grid());
        land.push_snapshot(3600, band([Some(101_300.0), None, None, None]));
        land.push_snapshot(7200, band([Some(101_400.0), None, None, None]));
        let mut single = DatasetStore::new(grid());
        single.push_snapshot(
            3600,
            band([Some(99_000.0), Some(99_100.0), Some(99_200.0), Some(99_300.0)]),
        );
        GridStore {
            land: Some(land),
            single_levels: Some(single),
            ..GridStore::default()
        }
    }

    #[test]
    fn nearest_snapshot_within_tolerance() {
        let store = store();
        let snap = store
            .match_nearest(Dataset::Land, 5000, 3600)
            .unwrap()
            .unwrap();
        assert_eq!(snap.time, 3600);
        assert!(store
            .match_nearest(Dataset::Land, 20_000, 3600)
            .unwrap()
            .is_none());
    }

    #[test]
    fn snapshots_ordered_regardless_of_insertion() {
        let mut ds = DatasetStore::new(grid());
        ds.push_snapshot(7200, band([None, None, None, None]));
        ds.push_snapshot(3600, band([None, None, None, None]));
        let times: Vec<i64> = ds.snapshots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![3600, 7200]);
    }

    #[test]
    fn both_prefers_land_and_falls_back() {
        let store = store();
        let snap = Snapshot {
            dataset: Dataset::Both,
            time: 3600,
        };
        let raster = store
            .reduce_region(&snap, SURFACE_PRESSURE, &grid())
            .unwrap();
        // Cell 0 has land data, the rest falls back to single-levels.
        assert_eq!(
            raster.cells(),
            &[
                Some(101_300.0),
                Some(99_100.0),
                Some(99_200.0),
                Some(99_300.0)
            ]
        );
    }

    #[test]
    fn nearest_valid_moves_off_missing_cells() {
        let store = GridStore {
            land: store().land,
            ..GridStore::default()
        };
        // NE cell (row 0, col 1) has no data; NW cell does.
        let (moved, distance) = store
            .nearest_valid(
                Dataset::Land,
                Coord { x: 1.5, y: 1.5 },
                1_000_000.0,
            )
            .unwrap()
            .unwrap();
        assert_eq!(moved, Coord { x: 0.5, y: 1.5 });
        // One degree of longitude near the equator.
        assert_relative_eq!(distance, 111_000.0, max_relative = 0.01);

        let (same, distance) = store
            .nearest_valid(
                Dataset::Land,
                Coord { x: 0.5, y: 1.5 },
                1_000_000.0,
            )
            .unwrap()
            .unwrap();
        assert_eq!(same, Coord { x: 0.5, y: 1.5 });
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 50.0), Some(2.5));
        assert_eq!(percentile(&values, 100.0), Some(4.0));
        assert_eq!(percentile::<f64>(&[], 50.0), None);
    }
}
