// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use tracing::error;

use gatewayd::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    if let Err(e) = gatewayd::run::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
