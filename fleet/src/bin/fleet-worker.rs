// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run a per-host pipeline worker

use camino::Utf8PathBuf;
use clap::Parser;
use emporos_fleet::{run_worker, Config};

#[derive(Debug, Parser)]
#[command(name = "fleet-worker", about = "Emporos per-host pipeline worker")]
struct Args {
    /// path to the TOML configuration file (must contain a [worker] section)
    #[arg(value_name = "CONFIG_FILE_PATH")]
    config_file_path: Utf8PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match Config::from_file(&args.config_file_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("fleet-worker: {:#}", anyhow::Error::new(error));
            std::process::exit(2);
        }
    };
    if let Err(error) = run_worker(&config).await {
        eprintln!("fleet-worker: {}", error);
        std::process::exit(1);
    }
}
