use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Answer barometric geolocation queries against a local grid store.
#[derive(Parser, Debug, Clone)]
pub struct Cli {
    /// Grid-store JSON file with reanalysis snapshots and terrain.
    #[arg(short, long)]
    pub store: PathBuf,

    /// Request body JSON file, or '-' for stdin.
    #[arg(short, long, default_value = "-")]
    pub request: PathBuf,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Pressure or altitude series at a point.
    Timeseries,

    /// Elevation percentiles along a path.
    ElevationPath,

    /// Per-label probability-of-location rasters.
    Map,

    /// Reanalysis variables along a timed path.
    PressurePath,
}
