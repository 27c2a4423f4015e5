//! Per-label probability-of-location rasters.
//!
//! For each label, the mean squared error between the label's pressure
//! series and the reanalysis pressure field gives a spatial likelihood
//! signal; pixels whose implied altitude is outside the DEM bounds are
//! masked as infeasible.

use crate::{altitude, EngineError, Observation, TemporalMatcher};
use log::debug;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use reanalysis::{
    BBox, CoverageCache, Dataset, GridSpec, QueryEngine, Raster, Snapshot, StaticField,
    SURFACE_PRESSURE, TEMPERATURE_2M,
};

/// Sentinel for pixels excluded by the altitude-feasibility mask.
pub const MASKED_ALTITUDE: f64 = -1.0;

/// Sentinel for pixels with no usable data (outside the reanalysis'
/// own valid region, or missing DEM/geopotential reference).
pub const MASKED_NO_DATA: f64 = -2.0;

#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Pixels per degree.
    pub scale: f64,

    /// Random down-sample bound per label.
    pub max_sample: usize,

    /// Slack added to the DEM bounds, meters.
    pub margin: f64,

    /// Export the aggregated feasibility band next to the MSE band.
    pub include_mask: bool,

    /// Mask MSE pixels whose feasibility falls below this. `None`
    /// disables altitude masking.
    pub mask_threshold: Option<f64>,

    pub dataset: Dataset,

    /// Concurrent label computations. Kept serial by default to
    /// respect the data source's rate limits.
    pub label_workers: usize,

    /// Concurrent raster exports. Exports are cheap on the service
    /// side, so this can be wide.
    pub export_workers: usize,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            scale: 10.0,
            max_sample: 250,
            margin: 30.0,
            include_mask: true,
            mask_threshold: Some(0.9),
            dataset: Dataset::Both,
            label_workers: 1,
            export_workers: 32,
        }
    }
}

/// One exported raster URL per label, in first-appearance order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap {
    pub labels: Vec<String>,
    pub urls: Vec<Option<String>>,

    /// Degrees per pixel.
    pub resolution: f64,

    pub bbox: BBox,
    pub size: (usize, usize),
}

struct LabelRaster {
    mse: Raster,
    feasibility: Raster,
}

pub struct ProbabilityMapBuilder<'a, Q: QueryEngine + ?Sized> {
    query: &'a Q,
    opts: MapOptions,
}

impl<'a, Q: QueryEngine + ?Sized> ProbabilityMapBuilder<'a, Q> {
    pub fn new(query: &'a Q, opts: MapOptions) -> Self {
        Self { query, opts }
    }

    pub fn build(
        &self,
        observations: &[Observation],
        bbox: BBox,
        cache: Option<&CoverageCache>,
    ) -> Result<ProbabilityMap, EngineError> {
        let grid = GridSpec::from_scale(bbox, self.opts.scale)?;
        let (labels, groups) = group_by_label(observations);

        let compute_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.label_workers.max(1))
            .build()?;
        let rasters: Vec<Option<LabelRaster>> = compute_pool.install(|| {
            groups
                .par_iter()
                .map(|group| self.label_raster(group, &grid, cache))
                .collect::<Result<_, EngineError>>()
        })?;

        let export_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.export_workers.max(1))
            .build()?;
        let urls: Vec<Option<String>> = export_pool.install(|| {
            rasters
                .par_iter()
                .zip(labels.par_iter())
                .map(|(raster, label)| match raster {
                    None => Ok(None),
                    Some(raster) => {
                        let mut bands = vec![("mse", &raster.mse)];
                        if self.opts.include_mask {
                            bands.push(("mask", &raster.feasibility));
                        }
                        self.query
                            .export_raster(label, &grid, &bands)
                            .map(Some)
                            .map_err(EngineError::from)
                    }
                })
                .collect::<Result<_, EngineError>>()
        })?;

        Ok(ProbabilityMap {
            labels,
            urls,
            resolution: 1.0 / self.opts.scale,
            bbox,
            size: (grid.width, grid.height),
        })
    }

    /// Aggregated MSE/feasibility raster for one label group, or
    /// `None` when the group reaches past the dataset's coverage or
    /// nothing in it matches.
    fn label_raster(
        &self,
        group: &[&Observation],
        grid: &GridSpec,
        cache: Option<&CoverageCache>,
    ) -> Result<Option<LabelRaster>, EngineError> {
        let matcher = TemporalMatcher::new(self.query, self.opts.dataset);
        let end = group.iter().map(|obs| obs.time).max().unwrap_or(0);
        match matcher.check_coverage(end, cache) {
            Err(EngineError::Coverage { latest }) => {
                debug!("label group ends at {end}, coverage at {latest}; skipping");
                return Ok(None);
            }
            other => other?,
        }

        let group = down_sample(group, self.opts.max_sample);
        let mut matched: Vec<(f64, Snapshot)> = Vec::with_capacity(group.len());
        for obs in &group {
            let pressure = obs.pressure.ok_or(EngineError::MissingPressure)?;
            if let Some(pair) = matcher.match_one(obs)? {
                matched.push((pressure, pair.snapshot));
            }
        }
        if matched.is_empty() {
            return Ok(None);
        }
        let mean_observed =
            matched.iter().map(|(p, _)| p).sum::<f64>() / matched.len() as f64;

        let pressure_rasters: Vec<Raster> = matched
            .iter()
            .map(|(_, snapshot)| self.query.reduce_region(snapshot, SURFACE_PRESSURE, grid))
            .collect::<Result<_, _>>()?;
        let Some(mean_map) = Raster::mean(&pressure_rasters) else {
            return Ok(None);
        };

        let dem_min = self.query.static_field(StaticField::DemMin, grid)?;
        let dem_max = self.query.static_field(StaticField::DemMax, grid)?;
        let geopotential = self.query.static_field(StaticField::Geopotential, grid)?;
        let margin = self.opts.margin;

        let mut sq_errors = Vec::with_capacity(matched.len());
        let mut feasibilities = Vec::with_capacity(matched.len());
        for ((pressure, snapshot), p0) in matched.iter().zip(&pressure_rasters) {
            let temperature = self.query.reduce_region(snapshot, TEMPERATURE_2M, grid)?;
            // Removing both means cancels the systematic bias between
            // the barometer and the reanalysis reference.
            let bias = pressure - mean_observed;
            let error = p0.zip_with(&mean_map, |p, m| p - m).map(|v| v - bias);
            sq_errors.push(error.map(|v| v * v));

            let alt = altitude::altitude_raster(*pressure, p0, &temperature, &geopotential);
            feasibilities.push(alt.zip3_with(&dem_min, &dem_max, |h, lo, hi| {
                f64::from(h >= lo - margin && h <= hi + margin)
            }));
        }

        let (Some(mse), Some(feasibility)) =
            (Raster::mean(&sq_errors), Raster::mean(&feasibilities))
        else {
            return Ok(None);
        };
        let mse = self.apply_sentinels(&mse, &feasibility, &mean_map, grid);
        Ok(Some(LabelRaster { mse, feasibility }))
    }

    /// Replaces excluded pixels with sentinels. No-data (−2) is
    /// applied first from the reanalysis' own valid region, then the
    /// feasibility threshold marks altitude-excluded pixels (−1), so
    /// the two stay distinguishable.
    fn apply_sentinels(
        &self,
        mse: &Raster,
        feasibility: &Raster,
        valid: &Raster,
        grid: &GridSpec,
    ) -> Raster {
        let cells = mse
            .cells()
            .iter()
            .zip(feasibility.cells())
            .zip(valid.cells())
            .map(|((mse, feasible), valid)| {
                if valid.is_none() {
                    return Some(MASKED_NO_DATA);
                }
                match (mse, self.opts.mask_threshold) {
                    (None, _) => Some(MASKED_NO_DATA),
                    (Some(_), Some(threshold))
                        if feasible.map_or(true, |f| f < threshold) =>
                    {
                        Some(MASKED_ALTITUDE)
                    }
                    (Some(v), _) => Some(*v),
                }
            })
            .collect();
        Raster::new(*grid, cells)
    }
}

/// Groups observations by label, keeping first-appearance order.
fn group_by_label(observations: &[Observation]) -> (Vec<String>, Vec<Vec<&Observation>>) {
    let mut labels: Vec<String> = Vec::new();
    let mut groups: Vec<Vec<&Observation>> = Vec::new();
    for obs in observations {
        let label = obs.label.clone().unwrap_or_default();
        match labels.iter().position(|l| *l == label) {
            Some(i) => groups[i].push(obs),
            None => {
                labels.push(label);
                groups.push(vec![obs]);
            }
        }
    }
    (labels, groups)
}

/// Caps a label group at `max` randomly chosen observations.
fn down_sample<'o>(group: &[&'o Observation], max: usize) -> Vec<&'o Observation> {
    if group.len() <= max {
        group.to_vec()
    } else {
        group
            .choose_multiple(&mut rand::thread_rng(), max)
            .copied()
            .collect()
    }
}
