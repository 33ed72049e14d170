#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use missive::{Missive, config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config::find_config_file()?;
    let missive: Missive = config::read_ron(&config_path)?;

    missive.run().await
}
