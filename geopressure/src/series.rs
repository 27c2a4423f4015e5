//! Pressure/altitude time series at a single point.

use crate::{altitude, chunk::ColumnSet, EngineError, Observation, TemporalMatcher};
use log::debug;
use geo::geometry::Coord;
use reanalysis::{
    CoverageCache, Dataset, GridSpec, QueryEngine, Snapshot, StaticField, C, SURFACE_PRESSURE,
    TEMPERATURE_2M,
};

/// Search radius when moving a point onto valid reanalysis data,
/// meters.
pub const NEAREST_VALID_RADIUS_M: C = 1_000_000.0;

/// Extracted series plus the (possibly adjusted) evaluation point.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub columns: ColumnSet,

    /// Point the series was evaluated at.
    pub coord: Coord<C>,

    /// Distance the requested point was moved to reach valid data,
    /// meters. Zero when it was already valid.
    pub dist_inter: C,
}

pub struct TimeSeriesExtractor<'a, Q: QueryEngine + ?Sized> {
    query: &'a Q,
    dataset: Dataset,
}

impl<'a, Q: QueryEngine + ?Sized> TimeSeriesExtractor<'a, Q> {
    pub fn new(query: &'a Q, dataset: Dataset) -> Self {
        Self { query, dataset }
    }

    /// Surface-pressure series for every snapshot in
    /// `[start, end + 1h]`, sampled at `coord`.
    pub fn window(
        &self,
        coord: Coord<C>,
        start: i64,
        end: i64,
        cache: Option<&CoverageCache>,
    ) -> Result<TimeSeries, EngineError> {
        let matcher = TemporalMatcher::new(self.query, self.dataset);
        matcher.check_coverage(end, cache)?;
        let (coord, dist_inter) = self.adjust_position(coord)?;

        let times = self.query.snapshot_times(self.dataset, start, end + 3600)?;
        let bands = [SURFACE_PRESSURE.to_string()];
        let mut time_column = Vec::with_capacity(times.len());
        let mut pressure_column = Vec::with_capacity(times.len());
        for time in times {
            let snapshot = Snapshot {
                dataset: self.dataset,
                time,
            };
            let values = self.query.sample_point(&snapshot, &bands, coord)?;
            time_column.push(Some(time as f64));
            pressure_column.push(values[0]);
        }

        let mut columns = ColumnSet::new();
        columns.insert("time".to_string(), time_column);
        columns.insert("pressure".to_string(), pressure_column);
        Ok(TimeSeries {
            columns,
            coord,
            dist_inter,
        })
    }

    /// Altitude series for an explicit device pressure series. Every
    /// observation must find a snapshot within tolerance.
    pub fn series(
        &self,
        coord: Coord<C>,
        times: &[i64],
        pressures: &[f64],
        cache: Option<&CoverageCache>,
    ) -> Result<TimeSeries, EngineError> {
        let observations = Observation::at_point(coord, times, pressures)?;
        let matcher = TemporalMatcher::new(self.query, self.dataset);
        let end = times.iter().copied().max().unwrap_or(0);
        matcher.check_coverage(end, cache)?;
        let (coord, dist_inter) = self.adjust_position(coord)?;

        let pairs = matcher.match_all_strict(&observations)?;
        let reference = self.geopotential_at(coord)?;
        let bands = [SURFACE_PRESSURE.to_string(), TEMPERATURE_2M.to_string()];
        let mut time_column = Vec::with_capacity(pairs.len());
        let mut pressure_column = Vec::with_capacity(pairs.len());
        let mut altitude_column = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            let values = self.query.sample_point(&pair.snapshot, &bands, coord)?;
            let estimate = match (pair.obs.pressure, values[0], values[1], reference) {
                (Some(p), Some(p0), Some(t), Some(h0)) => {
                    Some(altitude::barometric_altitude(p, p0, t, h0))
                }
                _ => None,
            };
            time_column.push(Some(pair.obs.time as f64));
            pressure_column.push(pair.obs.pressure);
            altitude_column.push(estimate);
        }

        let mut columns = ColumnSet::new();
        columns.insert("time".to_string(), time_column);
        columns.insert("pressure".to_string(), pressure_column);
        columns.insert("altitude".to_string(), altitude_column);
        Ok(TimeSeries {
            columns,
            coord,
            dist_inter,
        })
    }

    /// Moves the point onto the nearest cell with valid data when it
    /// falls outside the dataset's coverage (over sea, typically).
    fn adjust_position(&self, coord: Coord<C>) -> Result<(Coord<C>, C), EngineError> {
        let moved = self
            .query
            .nearest_valid(self.dataset, coord, NEAREST_VALID_RADIUS_M)?
            .ok_or(EngineError::NoNearbyData(NEAREST_VALID_RADIUS_M))?;
        if moved.1 > 0.0 {
            debug!(
                "moved ({}, {}) to ({}, {}), {:.0} m away",
                coord.x, coord.y, moved.0.x, moved.0.y, moved.1
            );
        }
        Ok(moved)
    }

    fn geopotential_at(&self, coord: Coord<C>) -> Result<Option<f64>, EngineError> {
        let grid = GridSpec::single(coord, 0.01);
        let raster = self.query.static_field(StaticField::Geopotential, &grid)?;
        Ok(raster.cells()[0])
    }
}
