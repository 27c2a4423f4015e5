//! Request layer for the barometric geolocation engine.
//!
//! Parses JSON request bodies, drives the [`geopressure`] extractors,
//! and shapes results into the service's response envelope. Transport
//! is left to the caller: every handler takes a body string and
//! returns a status/headers/body triple.

pub mod envelope;
pub mod request;

use crate::{
    envelope::{Reply, VALIDATION_ADVICE},
    request::{
        ElevationPathRequest, MapRequest, PressurePathRequest, TimeseriesRequest,
    },
};
use geo::geometry::Coord;
use geopressure::{
    ElevationProfileExtractor, EngineError, MapOptions, Observation, PathSampler,
    PressurePathExtractor, PressurePathOptions, ProbabilityMapBuilder, TimeSeriesExtractor,
};
use log::{info, warn};
use reanalysis::{BBox, CoverageCache, Dataset, GridSpec, QueryEngine};
use serde_json::{json, Map, Value};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

pub const COVERAGE_ADVICE: &str =
    "Request a time window the dataset already covers, or retry once new data is published.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Engine(#[from] EngineError),
}

impl ApiError {
    /// Maps the error taxonomy onto the envelope: bad input is 400
    /// with a validation hint, reaching past the dataset's coverage is
    /// 416, everything else is a crash pointing at the issue tracker.
    fn reply(&self, task_id: i64) -> Reply {
        match self {
            Self::Parse(_) | Self::Validation(_) => {
                envelope::error(400, task_id, &self.to_string(), VALIDATION_ADVICE)
            }
            Self::Engine(e @ EngineError::Coverage { .. }) => {
                envelope::error(416, task_id, &e.to_string(), COVERAGE_ADVICE)
            }
            Self::Engine(e) if e.is_validation() => {
                envelope::error(400, task_id, &e.to_string(), VALIDATION_ADVICE)
            }
            Self::Engine(e) => {
                envelope::error(400, task_id, &e.to_string(), &envelope::crash_advice(task_id))
            }
        }
    }
}

/// One handler per capability, sharing a backend and per-dataset
/// coverage caches.
pub struct Service {
    query: Arc<dyn QueryEngine>,
    coverage: [Arc<CoverageCache>; 3],
}

impl Service {
    pub fn new(query: Arc<dyn QueryEngine>) -> Self {
        Self {
            coverage: [Dataset::Land, Dataset::SingleLevels, Dataset::Both]
                .map(|dataset| Arc::new(CoverageCache::new(dataset))),
            query,
        }
    }

    /// Starts the periodic coverage refresh, one thread per dataset.
    pub fn spawn_refresh(&self, period: Duration) {
        for cache in &self.coverage {
            cache.spawn_refresh(Arc::clone(&self.query), period);
        }
    }

    fn cache(&self, dataset: Dataset) -> &CoverageCache {
        let at = match dataset {
            Dataset::Land => 0,
            Dataset::SingleLevels => 1,
            Dataset::Both => 2,
        };
        &self.coverage[at]
    }

    pub fn timeseries(&self, body: &str) -> Reply {
        self.dispatch("timeseries", || self.handle_timeseries(body))
    }

    pub fn elevation_path(&self, body: &str) -> Reply {
        self.dispatch("elevation-path", || self.handle_elevation_path(body))
    }

    pub fn map(&self, body: &str) -> Reply {
        self.dispatch("map", || self.handle_map(body))
    }

    pub fn pressure_path(&self, body: &str) -> Reply {
        self.dispatch("pressure-path", || self.handle_pressure_path(body))
    }

    fn dispatch<F>(&self, capability: &str, run: F) -> Reply
    where
        F: FnOnce() -> Result<Value, ApiError>,
    {
        let task_id = envelope::task_id();
        info!("task {task_id}: {capability}");
        match run() {
            Ok(data) => envelope::success(task_id, data),
            Err(e) => {
                warn!("task {task_id}: {capability} failed: {e}");
                e.reply(task_id)
            }
        }
    }

    fn handle_timeseries(&self, body: &str) -> Result<Value, ApiError> {
        let req: TimeseriesRequest = serde_json::from_str(body)?;
        let coord = Coord {
            x: req.lon,
            y: req.lat,
        };
        let extractor = TimeSeriesExtractor::new(self.query.as_ref(), Dataset::Both);
        let cache = Some(self.cache(Dataset::Both));
        let series = match (&req.time, &req.pressure, req.start_time, req.end_time) {
            (Some(time), Some(pressure), _, _) => {
                extractor.series(coord, time, pressure, cache)?
            }
            (None, None, Some(start), Some(end)) => extractor.window(coord, start, end, cache)?,
            _ => {
                return Err(ApiError::Validation(
                    "provide either startTime + endTime or time + pressure".to_string(),
                ))
            }
        };

        let mut data = Map::new();
        data.insert("lon".to_string(), json!(series.coord.x));
        data.insert("lat".to_string(), json!(series.coord.y));
        data.insert("distInter".to_string(), json!(series.dist_inter));
        for (name, column) in &series.columns {
            data.insert(name.clone(), json!(column));
        }
        Ok(Value::Object(data))
    }

    fn handle_elevation_path(&self, body: &str) -> Result<Value, ApiError> {
        let req: ElevationPathRequest = serde_json::from_str(body)?;
        let sampler = PathSampler::new(req.path.resolve()?)?;
        let sampling = req.sampling_scale.unwrap_or(req.scale);
        let percentiles = req
            .percentile
            .clone()
            .unwrap_or_else(|| ElevationPathRequest::DEFAULT_PERCENTILES.to_vec());

        let profile = ElevationProfileExtractor::new(self.query.as_ref()).extract(
            &sampler,
            req.scale,
            sampling,
            &percentiles,
        )?;

        let mut data = Map::new();
        data.insert("resolution".to_string(), json!(profile.resolution));
        data.insert("samplingScale".to_string(), json!(sampling));
        // Path segments are numbered from 1 in responses.
        let stap: Vec<usize> = profile.stap.iter().map(|s| s + 1).collect();
        data.insert("stap".to_string(), json!(stap));
        data.insert("lon".to_string(), json!(profile.lon));
        data.insert("lat".to_string(), json!(profile.lat));
        data.insert("distance".to_string(), json!(profile.distance));
        for (percentile, column) in profile.percentiles.iter().zip(&profile.elevations) {
            data.insert(percentile_label(*percentile), json!(column));
        }
        Ok(Value::Object(data))
    }

    fn handle_map(&self, body: &str) -> Result<Value, ApiError> {
        let req: MapRequest = serde_json::from_str(body)?;
        let bbox = BBox {
            w: req.w,
            s: req.s,
            e: req.e,
            n: req.n,
        };
        let defaults = MapOptions::default();
        let opts = MapOptions {
            scale: req.scale.unwrap_or(defaults.scale),
            max_sample: req.max_sample.unwrap_or(defaults.max_sample),
            margin: req.margin.unwrap_or(defaults.margin),
            include_mask: req.include_mask.unwrap_or(defaults.include_mask),
            mask_threshold: req.mask_threshold.or(defaults.mask_threshold),
            dataset: req.dataset.unwrap_or(defaults.dataset),
            ..defaults
        };
        // Reject a bad bounding box before any matching work starts.
        GridSpec::from_scale(bbox, opts.scale).map_err(EngineError::from)?;

        let observations = Observation::labeled(&req.time, &req.pressure, &req.label)?;
        let dataset = opts.dataset;
        let map = ProbabilityMapBuilder::new(self.query.as_ref(), opts).build(
            &observations,
            bbox,
            Some(self.cache(dataset)),
        )?;

        Ok(json!({
            "format": "GEOTIFF",
            "labels": map.labels,
            "urls": map.urls,
            "resolution": map.resolution,
            "bbox": { "W": map.bbox.w, "S": map.bbox.s, "E": map.bbox.e, "N": map.bbox.n },
            "size": [map.size.0, map.size.1],
        }))
    }

    fn handle_pressure_path(&self, body: &str) -> Result<Value, ApiError> {
        let req: PressurePathRequest = serde_json::from_str(body)?;
        let vertices = req.path.resolve()?;
        let observations = Observation::along_path(&vertices, &req.time, req.pressure.as_deref())?;

        let defaults = PressurePathOptions::default();
        let opts = PressurePathOptions {
            variables: req.variable.clone(),
            dataset: req.dataset.unwrap_or(defaults.dataset),
            workers: req.workers.unwrap_or(defaults.workers),
        };
        let dataset = opts.dataset;
        let columns = PressurePathExtractor::new(self.query.as_ref(), opts)
            .extract(&observations, Some(self.cache(dataset)))?;

        let mut data = Map::new();
        for (name, column) in &columns {
            data.insert(name.clone(), json!(column));
        }
        Ok(Value::Object(data))
    }
}

/// `DEM_p10`, `DEM_p50`, ... with the decimal point kept only for
/// fractional percentiles.
fn percentile_label(percentile: f64) -> String {
    if percentile.fract() == 0.0 {
        #[allow(clippy::cast_possible_truncation)]
        let whole = percentile as i64;
        format!("DEM_p{whole}")
    } else {
        format!("DEM_p{percentile}")
    }
}
