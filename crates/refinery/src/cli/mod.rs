//! CLI command definitions using `clap`.

pub mod handlers;

use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("refinery")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Merge queue coordination for worker rigs")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Rig config file (default .refinery/config.toml)"),
        )
        .subcommand(cmd_mq())
        .subcommand(cmd_run())
}

fn cmd_mq() -> Command {
    Command::new("mq")
        .about("Inspect and steer the merge queue")
        .subcommand_required(true)
        .subcommand(
            Command::new("list")
                .about("List merge requests with their derived status")
                .arg(
                    Arg::new("ready")
                        .long("ready")
                        .action(ArgAction::SetTrue)
                        .help("Show only ready-to-merge entries"),
                )
                .arg(
                    Arg::new("status")
                        .long("status")
                        .value_name("STATUS")
                        .help("Filter by status (ready, blocked, failed, in_progress, closed)"),
                )
                .arg(
                    Arg::new("worker")
                        .long("worker")
                        .value_name("NAME")
                        .help("Filter by worker"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .value_name("BRANCH")
                        .help("Filter by integration target"),
                )
                .arg(
                    Arg::new("epic")
                        .long("epic")
                        .value_name("EPIC")
                        .help("Show entries targeting integration/<epic>"),
                )
                .arg(arg_json()),
        )
        .subcommand(
            Command::new("show")
                .about("Show one merge request in full")
                .arg(Arg::new("id").required(true).help("Merge request id"))
                .arg(arg_json()),
        )
        .subcommand(
            Command::new("retry")
                .about("Clear a failed merge request so the queue picks it up again")
                .arg(Arg::new("id").required(true).help("Merge request id"))
                .arg(
                    Arg::new("now")
                        .long("now")
                        .action(ArgAction::SetTrue)
                        .help("Run one merge attempt immediately"),
                ),
        )
        .subcommand(
            Command::new("reject")
                .about("Close a merge request as rejected, leaving its issue open")
                .arg(
                    Arg::new("selector")
                        .required(true)
                        .value_name("ID_OR_BRANCH")
                        .help("Merge request id or exact branch name"),
                )
                .arg(
                    Arg::new("reason")
                        .long("reason")
                        .short('r')
                        .required(true)
                        .value_name("TEXT")
                        .help("Reason for rejection"),
                )
                .arg(
                    Arg::new("notify")
                        .long("notify")
                        .action(ArgAction::SetTrue)
                        .help("Send the worker a mail notification"),
                ),
        )
        .subcommand(
            Command::new("submit")
                .about("Enqueue a merge request for a finished branch")
                .arg(
                    Arg::new("branch")
                        .long("branch")
                        .required(true)
                        .value_name("BRANCH")
                        .help("Branch to merge"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .required(true)
                        .value_name("BRANCH")
                        .help("Integration target branch"),
                )
                .arg(
                    Arg::new("worker")
                        .long("worker")
                        .required(true)
                        .value_name("NAME")
                        .help("Worker who owns the branch"),
                )
                .arg(
                    Arg::new("title")
                        .long("title")
                        .value_name("TEXT")
                        .help("Title (defaults to the branch name)"),
                )
                .arg(
                    Arg::new("issue")
                        .long("issue")
                        .value_name("ID")
                        .help("Issue this merge request completes"),
                )
                .arg(
                    Arg::new("priority")
                        .long("priority")
                        .value_name("N")
                        .value_parser(clap::value_parser!(i64))
                        .help("Priority, lower merges sooner (default 2)"),
                )
                .arg(
                    Arg::new("blocked-by")
                        .long("blocked-by")
                        .value_name("ID")
                        .action(ArgAction::Append)
                        .help("Ticket that must close first (repeatable)"),
                ),
        )
}

fn cmd_run() -> Command {
    Command::new("run")
        .about("Run the merge queue processor")
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Run a single pass and exit"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .help("Seconds between passes (overrides config)"),
        )
}

fn arg_json() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}
