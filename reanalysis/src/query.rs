use crate::{Dataset, GridSpec, QueryError, Raster, Snapshot, C};
use geo::geometry::Coord;

/// Time-invariant fields derived from terrain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticField {
    /// Lowest ground elevation within a reanalysis cell [m].
    DemMin,

    /// Highest ground elevation within a reanalysis cell [m].
    DemMax,

    /// Reanalysis-native reference height [m].
    Geopotential,
}

/// Interface between the inference engine and a concrete geospatial
/// backend.
///
/// Every method is a synchronous request/response. Implementations
/// must be shareable across worker threads.
pub trait QueryEngine: Send + Sync {
    /// Most recent timestamp covered by `dataset`, unix seconds.
    fn latest_timestamp(&self, dataset: Dataset) -> Result<i64, QueryError>;

    /// Snapshot timestamps in `[start, end]`, ascending, unix seconds.
    fn snapshot_times(&self, dataset: Dataset, start: i64, end: i64)
        -> Result<Vec<i64>, QueryError>;

    /// The snapshot minimizing `|Δt|` to `time`, or `None` when
    /// nothing lies within `tolerance_s` seconds.
    fn match_nearest(
        &self,
        dataset: Dataset,
        time: i64,
        tolerance_s: i64,
    ) -> Result<Option<Snapshot>, QueryError>;

    /// One band of `snapshot` resampled onto `grid`. Cells outside the
    /// dataset's valid-data region come back as no-data.
    fn reduce_region(
        &self,
        snapshot: &Snapshot,
        band: &str,
        grid: &GridSpec,
    ) -> Result<Raster, QueryError>;

    /// Values of `bands` at a single point of `snapshot`, in band
    /// order. Missing data is `None`, never a substitute value.
    fn sample_point(
        &self,
        snapshot: &Snapshot,
        bands: &[String],
        coord: Coord<C>,
    ) -> Result<Vec<Option<f64>>, QueryError>;

    /// A time-invariant field resampled onto `grid`.
    fn static_field(&self, field: StaticField, grid: &GridSpec) -> Result<Raster, QueryError>;

    /// Ground-elevation percentiles around each point, reduced at
    /// `scale_m` meters. Result is one vector per point, one value per
    /// requested percentile.
    fn sample_elevation(
        &self,
        points: &[Coord<C>],
        scale_m: C,
        percentiles: &[f64],
    ) -> Result<Vec<Vec<Option<f64>>>, QueryError>;

    /// Publishes a multi-band raster as a downloadable artifact and
    /// returns its URL.
    fn export_raster(
        &self,
        name: &str,
        grid: &GridSpec,
        bands: &[(&str, &Raster)],
    ) -> Result<String, QueryError>;

    /// Nearest cell with valid data, searched within `max_distance_m`
    /// meters of `coord`. Returns the cell center and the distance
    /// moved; a coord already on valid data comes back unchanged with
    /// distance zero.
    fn nearest_valid(
        &self,
        dataset: Dataset,
        coord: Coord<C>,
        max_distance_m: C,
    ) -> Result<Option<(Coord<C>, C)>, QueryError>;
}
