//! Processor handler - wires `run` argument matches to the pass loop.

use anyhow::Result;
use clap::ArgMatches;

use crate::commands::load_config;
use crate::commands::run::{self, RunOptions};

pub async fn handle(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let options = RunOptions {
        once: matches.get_flag("once"),
        interval: matches.get_one::<u64>("interval").copied(),
    };
    run::run(&config, &options).await
}
