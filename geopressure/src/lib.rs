//! Barometric geolocation inference engine.
//!
//! Matches pressure-logger observations against gridded atmospheric
//! reanalysis snapshots and a DEM to derive pressure series, altitude
//! estimates, elevation profiles and per-label probability-of-location
//! rasters. All data access goes through [`reanalysis::QueryEngine`];
//! this crate owns only the matching, sampling and aggregation logic.

mod altitude;
mod chunk;
mod elevation;
mod error;
mod matcher;
mod path;
mod pressure_path;
mod probability;
mod series;

pub use crate::{
    altitude::{altitude_raster, barometric_altitude, G0, LB, M, R},
    chunk::{ChunkedExecutor, Column, ColumnSet, MAX_WORKERS},
    elevation::{ladder_resolution, ElevationProfile, ElevationProfileExtractor,
        RESOLUTION_LADDER_M},
    error::EngineError,
    matcher::{MatchedPair, TemporalMatcher, MATCH_TOLERANCE_S},
    path::{PathSampler, SamplePoint},
    pressure_path::{PressurePathExtractor, PressurePathOptions},
    probability::{MapOptions, ProbabilityMap, ProbabilityMapBuilder, MASKED_ALTITUDE,
        MASKED_NO_DATA},
    series::{TimeSeries, TimeSeriesExtractor, NEAREST_VALID_RADIUS_M},
};
pub use reanalysis::{self, geo, Dataset, DEGREES_PER_METER};
use geo::geometry::Coord;
use reanalysis::C;

/// One reading from a tracking device.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Measurement timestamp, unix seconds.
    pub time: i64,

    /// Barometric pressure [Pa], when the device reports one.
    pub pressure: Option<f64>,

    /// Location the reading is evaluated at.
    pub coord: Coord<C>,

    /// Grouping key for probability maps.
    pub label: Option<String>,
}

impl Observation {
    /// Builds observations at a fixed point from parallel arrays.
    pub fn at_point(
        coord: Coord<C>,
        times: &[i64],
        pressures: &[f64],
    ) -> Result<Vec<Self>, EngineError> {
        if times.len() != pressures.len() {
            return Err(EngineError::LengthMismatch("time", "pressure"));
        }
        Ok(times
            .iter()
            .zip(pressures)
            .map(|(&time, &pressure)| Self {
                time,
                pressure: Some(pressure),
                coord,
                label: None,
            })
            .collect())
    }

    /// Builds observations along a path from parallel arrays, with
    /// optional pressures.
    pub fn along_path(
        coords: &[Coord<C>],
        times: &[i64],
        pressures: Option<&[f64]>,
    ) -> Result<Vec<Self>, EngineError> {
        if coords.len() != times.len() {
            return Err(EngineError::LengthMismatch("path", "time"));
        }
        if pressures.is_some_and(|p| p.len() != coords.len()) {
            return Err(EngineError::LengthMismatch("path", "pressure"));
        }
        Ok(coords
            .iter()
            .zip(times)
            .enumerate()
            .map(|(i, (&coord, &time))| Self {
                time,
                pressure: pressures.map(|p| p[i]),
                coord,
                label: None,
            })
            .collect())
    }

    /// Builds labeled observations at unknown locations (probability
    /// map input) from parallel arrays.
    pub fn labeled(
        times: &[i64],
        pressures: &[f64],
        labels: &[String],
    ) -> Result<Vec<Self>, EngineError> {
        if times.len() != pressures.len() || times.len() != labels.len() {
            return Err(EngineError::LengthMismatch("time", "pressure/label"));
        }
        Ok(times
            .iter()
            .zip(pressures)
            .zip(labels)
            .map(|((&time, &pressure), label)| Self {
                time,
                pressure: Some(pressure),
                coord: Coord { x: 0.0, y: 0.0 },
                label: Some(label.clone()),
            })
            .collect())
    }
}
