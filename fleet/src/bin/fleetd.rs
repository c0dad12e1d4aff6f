// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run fleetd, the central controller

use camino::Utf8PathBuf;
use clap::Parser;
use emporos_fleet::{run_server, Config};

#[derive(Debug, Parser)]
#[command(name = "fleetd", about = "Emporos central controller")]
struct Args {
    /// path to the TOML configuration file
    #[arg(value_name = "CONFIG_FILE_PATH")]
    config_file_path: Utf8PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match Config::from_file(&args.config_file_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("fleetd: {:#}", anyhow::Error::new(error));
            std::process::exit(2);
        }
    };
    if let Err(error) = run_server(&config).await {
        eprintln!("fleetd: {}", error);
        std::process::exit(1);
    }
}
