//! Typed access to gridded atmospheric reanalysis and terrain data.
//!
//! Callers never talk to a concrete data source directly. Everything
//! goes through the [`QueryEngine`] trait, which any backend (the
//! in-memory [`GridStore`], a remote geospatial service) implements.

mod coverage;
mod error;
mod query;
mod store;

pub use crate::{
    coverage::CoverageCache,
    error::QueryError,
    query::{QueryEngine, StaticField},
    store::{DatasetStore, DemStore, ExportedRaster, GridStore, SnapshotGrids, TerrainStore},
};
pub use geo;
use geo::geometry::Coord;
use serde::{Deserialize, Serialize};

/// Base floating point type used for all coordinates and calculations.
pub type C = f64;

/// Conversion between the service's angular unit and meters.
pub const DEGREES_PER_METER: C = 1.0 / 111_139.0;

/// Reanalysis surface pressure band name [Pa].
pub const SURFACE_PRESSURE: &str = "surface_pressure";

/// Reanalysis 2-meter air temperature band name [K].
pub const TEMPERATURE_2M: &str = "temperature_2m";

/// Tolerance when checking that a bounding box resolves to whole
/// pixels.
pub const PIXEL_COUNT_TOLERANCE: C = 1e-3;

/// Which reanalysis collection to read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dataset {
    /// Land-surface collection. Higher resolution, land cells only.
    Land,

    /// Atmospheric single-levels collection. Global coverage.
    SingleLevels,

    /// Band-level merge of both, preferring land-surface values and
    /// falling back to single-levels where land has no data.
    #[default]
    Both,
}

/// Handle to one reanalysis grid snapshot.
///
/// Snapshots are resolved lazily: holding one is free, reading its
/// bands goes back through the [`QueryEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Snapshot {
    pub dataset: Dataset,

    /// Snapshot timestamp, unix seconds.
    pub time: i64,
}

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub w: C,
    pub s: C,
    pub e: C,
    pub n: C,
}

impl BBox {
    pub fn width(&self) -> C {
        self.e - self.w
    }

    pub fn height(&self) -> C {
        self.n - self.s
    }

    pub fn contains(&self, coord: Coord<C>) -> bool {
        coord.x >= self.w && coord.x <= self.e && coord.y >= self.s && coord.y <= self.n
    }
}

/// A bounding box cut into a fixed number of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub bbox: BBox,
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    /// Builds a grid from a bounding box and a scale in pixels per
    /// degree.
    ///
    /// `(e - w) * scale` and `(n - s) * scale` must both round to
    /// positive integers within [`PIXEL_COUNT_TOLERANCE`].
    pub fn from_scale(bbox: BBox, scale: C) -> Result<Self, QueryError> {
        let width = Self::axis_pixels(bbox.width(), scale, "E-W")?;
        let height = Self::axis_pixels(bbox.height(), scale, "N-S")?;
        Ok(Self {
            bbox,
            width,
            height,
        })
    }

    fn axis_pixels(extent: C, scale: C, axis: &'static str) -> Result<usize, QueryError> {
        let pixels = extent * scale;
        if (pixels - pixels.round()).abs() > PIXEL_COUNT_TOLERANCE {
            return Err(QueryError::FractionalPixels(axis, pixels));
        }
        let pixels = pixels.round();
        if pixels < 1.0 {
            return Err(QueryError::FractionalPixels(axis, pixels));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(pixels as usize)
    }

    /// A 1x1 grid of `size_deg` degrees centered on `coord`. Used for
    /// single-point reads of static fields.
    pub fn single(coord: Coord<C>, size_deg: C) -> Self {
        let half = size_deg / 2.0;
        Self {
            bbox: BBox {
                w: coord.x - half,
                s: coord.y - half,
                e: coord.x + half,
                n: coord.y + half,
            },
            width: 1,
            height: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Center of the cell at `(row, col)`. Row 0 is the northmost row.
    pub fn cell_center(&self, row: usize, col: usize) -> Coord<C> {
        let dx = self.bbox.width() / self.width as C;
        let dy = self.bbox.height() / self.height as C;
        Coord {
            x: self.bbox.w + (col as C + 0.5) * dx,
            y: self.bbox.n - (row as C + 0.5) * dy,
        }
    }

    /// Row-major index of the cell containing `coord`, if any.
    pub fn index_of(&self, coord: Coord<C>) -> Option<usize> {
        if !self.bbox.contains(coord) {
            return None;
        }
        let dx = self.bbox.width() / self.width as C;
        let dy = self.bbox.height() / self.height as C;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let col = (((coord.x - self.bbox.w) / dx) as usize).min(self.width - 1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let row = (((self.bbox.n - coord.y) / dy) as usize).min(self.height - 1);
        Some(row * self.width + col)
    }

    /// Cell centers in row-major order, north row first.
    pub fn centers(&self) -> impl Iterator<Item = Coord<C>> + '_ {
        (0..self.height)
            .flat_map(move |row| (0..self.width).map(move |col| self.cell_center(row, col)))
    }
}

/// A single band of values on a [`GridSpec`], row-major, north row
/// first. `None` marks cells with no data.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    grid: GridSpec,
    cells: Vec<Option<f64>>,
}

impl Raster {
    pub fn new(grid: GridSpec, cells: Vec<Option<f64>>) -> Self {
        assert_eq!(grid.len(), cells.len());
        Self { grid, cells }
    }

    pub fn filled(grid: GridSpec, value: Option<f64>) -> Self {
        let cells = vec![value; grid.len()];
        Self { grid, cells }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn cells(&self) -> &[Option<f64>] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Option<f64>> {
        self.cells
    }

    /// Applies `f` to every data cell. No-data cells stay no-data.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        let cells = self.cells.iter().map(|c| c.map(&f)).collect();
        Self {
            grid: self.grid,
            cells,
        }
    }

    /// Combines two rasters cell by cell. A cell is no-data in the
    /// output if it is no-data in either input.
    pub fn zip_with<F>(&self, other: &Self, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64,
    {
        assert_eq!(self.grid, other.grid);
        let cells = self
            .cells
            .iter()
            .zip(&other.cells)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => Some(f(*a, *b)),
                _ => None,
            })
            .collect();
        Self {
            grid: self.grid,
            cells,
        }
    }

    /// Three-raster variant of [`Raster::zip_with`].
    pub fn zip3_with<F>(&self, b: &Self, c: &Self, f: F) -> Self
    where
        F: Fn(f64, f64, f64) -> f64,
    {
        assert_eq!(self.grid, b.grid);
        assert_eq!(self.grid, c.grid);
        let cells = self
            .cells
            .iter()
            .zip(&b.cells)
            .zip(&c.cells)
            .map(|((a, b), c)| match (a, b, c) {
                (Some(a), Some(b), Some(c)) => Some(f(*a, *b, *c)),
                _ => None,
            })
            .collect();
        Self {
            grid: self.grid,
            cells,
        }
    }

    /// Per-cell mean over `rasters`, averaging whatever data is
    /// present at each cell. Returns `None` for an empty slice.
    pub fn mean(rasters: &[Self]) -> Option<Self> {
        let first = rasters.first()?;
        let mut sums = vec![0.0f64; first.grid.len()];
        let mut counts = vec![0u32; first.grid.len()];
        for raster in rasters {
            assert_eq!(first.grid, raster.grid);
            for (i, cell) in raster.cells.iter().enumerate() {
                if let Some(v) = cell {
                    sums[i] += v;
                    counts[i] += 1;
                }
            }
        }
        let cells = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, n)| (n > 0).then(|| sum / f64::from(n)))
            .collect();
        Some(Self {
            grid: first.grid,
            cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{BBox, Coord, GridSpec, Raster};

    fn bbox() -> BBox {
        BBox {
            w: -10.0,
            s: 40.0,
            e: -5.0,
            n: 45.0,
        }
    }

    #[test]
    fn grid_from_scale() {
        let grid = GridSpec::from_scale(bbox(), 10.0).unwrap();
        assert_eq!((grid.width, grid.height), (50, 50));
    }

    #[test]
    fn grid_rejects_fractional_pixels() {
        // 5 degrees at 7.3 px/deg is 36.5 pixels.
        assert!(GridSpec::from_scale(bbox(), 7.3).is_err());
    }

    #[test]
    fn grid_indexing_roundtrip() {
        let grid = GridSpec::from_scale(bbox(), 10.0).unwrap();
        for (i, center) in grid.centers().enumerate() {
            assert_eq!(grid.index_of(center), Some(i));
        }
    }

    #[test]
    fn raster_mean_skips_missing() {
        let grid = GridSpec::single(Coord { x: 0.0, y: 0.0 }, 1.0);
        let a = Raster::new(grid, vec![Some(2.0)]);
        let b = Raster::new(grid, vec![None]);
        let c = Raster::new(grid, vec![Some(4.0)]);
        let mean = Raster::mean(&[a, b, c]).unwrap();
        assert_eq!(mean.cells(), &[Some(3.0)]);
    }

    #[test]
    fn zip_with_propagates_no_data() {
        let grid = GridSpec::single(Coord { x: 0.0, y: 0.0 }, 1.0);
        let a = Raster::new(grid, vec![Some(2.0)]);
        let b = Raster::new(grid, vec![None]);
        assert_eq!(a.zip_with(&b, |x, y| x + y).cells(), &[None]);
    }
}
