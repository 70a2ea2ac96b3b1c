use anyhow::Result;
use clap::ArgMatches;

mod mq;
mod run;

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("mq", sub_m)) => mq::handle(sub_m).await,
        Some(("run", sub_m)) => run::handle(sub_m).await,
        _ => anyhow::bail!("Unknown command. Run 'refinery --help' for usage."),
    }
}
