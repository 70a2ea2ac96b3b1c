//! Merge queue handler - turns `mq` argument matches into command options.

use anyhow::Result;
use clap::ArgMatches;
use refinery_core::MergeStatus;

use crate::commands::load_config;
use crate::commands::mq::{
    self, ListOptions, RejectOptions, RetryOptions, ShowOptions, SubmitOptions,
};

pub async fn handle(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("list", sub_m)) => {
            let config = load_config(sub_m)?;
            let options = ListOptions {
                ready: sub_m.get_flag("ready"),
                status: parse_status(sub_m.get_one::<String>("status"))?,
                worker: sub_m.get_one::<String>("worker").cloned(),
                target: sub_m.get_one::<String>("target").cloned(),
                epic: sub_m.get_one::<String>("epic").cloned(),
                json: sub_m.get_flag("json"),
            };
            mq::list(&config, &options).await
        }
        Some(("show", sub_m)) => {
            let config = load_config(sub_m)?;
            let options = ShowOptions {
                id: required(sub_m, "id")?,
                json: sub_m.get_flag("json"),
            };
            mq::show(&config, &options).await
        }
        Some(("retry", sub_m)) => {
            let config = load_config(sub_m)?;
            let options = RetryOptions {
                id: required(sub_m, "id")?,
                now: sub_m.get_flag("now"),
            };
            mq::retry(&config, &options).await
        }
        Some(("reject", sub_m)) => {
            let config = load_config(sub_m)?;
            let options = RejectOptions {
                selector: required(sub_m, "selector")?,
                reason: required(sub_m, "reason")?,
                notify: sub_m.get_flag("notify"),
            };
            mq::reject(&config, &options).await
        }
        Some(("submit", sub_m)) => {
            let config = load_config(sub_m)?;
            let options = SubmitOptions {
                branch: required(sub_m, "branch")?,
                target: required(sub_m, "target")?,
                worker: required(sub_m, "worker")?,
                title: sub_m.get_one::<String>("title").cloned(),
                issue: sub_m.get_one::<String>("issue").cloned(),
                priority: sub_m.get_one::<i64>("priority").copied(),
                blocked_by: sub_m
                    .get_many::<String>("blocked-by")
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default(),
            };
            mq::submit(&config, &options).await
        }
        _ => anyhow::bail!("Unknown mq subcommand. Run 'refinery mq --help' for usage."),
    }
}

fn required(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{name} is required"))
}

fn parse_status(raw: Option<&String>) -> Result<Option<MergeStatus>> {
    raw.map(|status| {
        status.parse::<MergeStatus>().map_err(|_| {
            anyhow::anyhow!(
                "unknown status '{status}' (expected ready, blocked, failed, in_progress or closed)"
            )
        })
    })
    .transpose()
}
