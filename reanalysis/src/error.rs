use crate::Dataset;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("({0})*scale = {1} should be an integer")]
    FractionalPixels(&'static str, f64),

    #[error("no {0:?} collection available")]
    EmptyDataset(Dataset),

    #[error("unknown band {0}")]
    UnknownBand(String),

    #[error("no snapshot at timestamp {0}")]
    MissingSnapshot(i64),

    #[error("no terrain data available")]
    NoTerrain,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}
