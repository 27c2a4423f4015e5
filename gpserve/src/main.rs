mod options;

use anyhow::{anyhow, Error as AnyError};
use clap::Parser;
use gpserve::Service;
use options::{Cli, Command};
use reanalysis::GridStore;
use std::{io::Read, sync::Arc};

fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();
    env_logger::init();

    let store = GridStore::from_json_file(&cli.store)?;
    let service = Service::new(Arc::new(store));

    let body = if cli.request.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        body
    } else {
        std::fs::read_to_string(&cli.request)?
    };

    let (status, _headers, reply) = match cli.cmd {
        Command::Timeseries => service.timeseries(&body),
        Command::ElevationPath => service.elevation_path(&body),
        Command::Map => service.map(&body),
        Command::PressurePath => service.pressure_path(&body),
    };
    println!("{reply}");
    if status != 200 {
        return Err(anyhow!("request failed with status {status}"));
    }
    Ok(())
}
