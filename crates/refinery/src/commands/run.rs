//! Processor command: one pass with a summary, or the long-running loop.

use std::time::Duration;

use anyhow::Result;
use refinery_core::RigConfig;

use crate::commands::Services;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run a single pass and exit instead of looping.
    pub once: bool,
    /// Seconds between passes; falls back to the configured interval.
    pub interval: Option<u64>,
}

pub async fn run(config: &RigConfig, options: &RunOptions) -> Result<()> {
    let services = Services::connect(config).await?;
    let processor = services.processor();

    if options.once {
        let summary = processor.run_pass().await?;
        println!(
            "Pass complete: {} merged, {} failed, {} skipped across {} targets",
            summary.merged, summary.failed, summary.skipped, summary.targets
        );
        return Ok(());
    }

    let interval = options
        .interval
        .map_or_else(|| config.pass_interval(), Duration::from_secs);
    processor.run(interval).await?;
    Ok(())
}
