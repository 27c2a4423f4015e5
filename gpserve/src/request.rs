//! Typed request bodies, one variant per capability.
//!
//! Raw JSON is parsed and validated here; the engine never sees an
//! untyped map.

use crate::ApiError;
use geo::geometry::Coord;
use reanalysis::Dataset;
use serde::Deserialize;

/// A path given either as `path: [[lon, lat], …]` or as parallel
/// `lon`/`lat` arrays. Both modes resolve to the same vertex list.
#[derive(Debug, Default, Deserialize)]
pub struct PathInput {
    #[serde(default)]
    pub path: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    pub lon: Option<Vec<f64>>,
    #[serde(default)]
    pub lat: Option<Vec<f64>>,
}

impl PathInput {
    pub fn resolve(&self) -> Result<Vec<Coord<f64>>, ApiError> {
        if let Some(path) = &self.path {
            return Ok(path.iter().map(|&(x, y)| Coord { x, y }).collect());
        }
        match (&self.lon, &self.lat) {
            (Some(lon), Some(lat)) if lon.len() == lat.len() => Ok(lon
                .iter()
                .zip(lat)
                .map(|(&x, &y)| Coord { x, y })
                .collect()),
            (Some(_), Some(_)) => Err(ApiError::Validation(
                "lon and lat should have the same length".to_string(),
            )),
            _ => Err(ApiError::Validation(
                "path or lat + lon is missing; expected an array of [lon, lat] pairs \
                 or parallel lon/lat arrays"
                    .to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TimeseriesRequest {
    pub lon: f64,
    pub lat: f64,
    #[serde(default, rename = "startTime")]
    pub start_time: Option<i64>,
    #[serde(default, rename = "endTime")]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub time: Option<Vec<i64>>,
    #[serde(default)]
    pub pressure: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct ElevationPathRequest {
    #[serde(flatten)]
    pub path: PathInput,

    /// DEM reduction scale, meters.
    pub scale: f64,

    /// Distance between samples, meters. Defaults to `scale`.
    #[serde(default, rename = "samplingScale")]
    pub sampling_scale: Option<f64>,

    #[serde(default)]
    pub percentile: Option<Vec<f64>>,
}

impl ElevationPathRequest {
    pub const DEFAULT_PERCENTILES: [f64; 3] = [10.0, 50.0, 90.0];
}

#[derive(Debug, Deserialize)]
pub struct MapRequest {
    #[serde(rename = "W")]
    pub w: f64,
    #[serde(rename = "S")]
    pub s: f64,
    #[serde(rename = "E")]
    pub e: f64,
    #[serde(rename = "N")]
    pub n: f64,
    pub time: Vec<i64>,
    pub pressure: Vec<f64>,
    pub label: Vec<String>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default, rename = "maxSample")]
    pub max_sample: Option<usize>,
    #[serde(default)]
    pub margin: Option<f64>,
    #[serde(default, rename = "includeMask")]
    pub include_mask: Option<bool>,
    #[serde(default, rename = "maskThreshold")]
    pub mask_threshold: Option<f64>,
    #[serde(default)]
    pub dataset: Option<Dataset>,
}

#[derive(Debug, Deserialize)]
pub struct PressurePathRequest {
    #[serde(flatten)]
    pub path: PathInput,
    pub time: Vec<i64>,
    #[serde(default)]
    pub pressure: Option<Vec<f64>>,

    /// Reanalysis band names to extract.
    pub variable: Vec<String>,

    #[serde(default)]
    pub dataset: Option<Dataset>,
    #[serde(default)]
    pub workers: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::{PathInput, TimeseriesRequest};

    #[test]
    fn path_modes_resolve_identically() {
        let explicit: PathInput =
            serde_json::from_str(r#"{"path": [[0.0, 1.0], [2.0, 3.0]]}"#).unwrap();
        let parallel: PathInput =
            serde_json::from_str(r#"{"lon": [0.0, 2.0], "lat": [1.0, 3.0]}"#).unwrap();
        assert_eq!(explicit.resolve().unwrap(), parallel.resolve().unwrap());
    }

    #[test]
    fn mismatched_lon_lat_is_rejected() {
        let input: PathInput = serde_json::from_str(r#"{"lon": [0.0], "lat": []}"#).unwrap();
        assert!(input.resolve().is_err());
        assert!(PathInput::default().resolve().is_err());
    }

    #[test]
    fn timeseries_accepts_either_mode() {
        let windowed: TimeseriesRequest = serde_json::from_str(
            r#"{"lon": 6.5, "lat": 46.5, "startTime": 0, "endTime": 3600}"#,
        )
        .unwrap();
        assert_eq!(windowed.start_time, Some(0));
        let explicit: TimeseriesRequest = serde_json::from_str(
            r#"{"lon": 6.5, "lat": 46.5, "time": [0], "pressure": [101325.0]}"#,
        )
        .unwrap();
        assert_eq!(explicit.time.as_deref(), Some(&[0][..]));
    }
}
