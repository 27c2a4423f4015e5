use reanalysis::QueryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("dataset not available beyond {latest}")]
    Coverage { latest: i64 },

    #[error("no reanalysis snapshot within {tolerance}s of {time}")]
    NoMatch { time: i64, tolerance: i64 },

    #[error("{0} and {1} should have the same length")]
    LengthMismatch(&'static str, &'static str),

    #[error("a path needs at least 2 points")]
    ShortPath,

    #[error("sampling distance should be a positive number")]
    InvalidSpacing,

    #[error("pressure is mandatory for this observation set")]
    MissingPressure,

    #[error("no valid reanalysis cell within {0} m")]
    NoNearbyData(f64),

    #[error("{0}")]
    Query(#[from] QueryError),

    #[error("{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl EngineError {
    /// True for errors caused by bad caller input rather than by the
    /// data source or the computation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::LengthMismatch(..)
                | Self::ShortPath
                | Self::InvalidSpacing
                | Self::MissingPressure
                | Self::Query(QueryError::FractionalPixels(..))
                | Self::Query(QueryError::UnknownBand(..))
        )
    }
}
