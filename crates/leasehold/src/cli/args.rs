//! CLI argument definitions and command builders
//!
//! Each function returns a configured `clap::Command` for a subcommand.

use clap::{value_parser, Arg, ArgAction, Command};

fn job_id_arg() -> Arg {
    Arg::new("job_id")
        .required(true)
        .value_parser(value_parser!(i64))
        .help("Job id")
}

fn profile_id_arg() -> Arg {
    Arg::new("profile_id")
        .required(true)
        .value_parser(value_parser!(i64))
        .help("Browser profile id")
}

pub fn cmd_init() -> Command {
    Command::new("init")
        .about("Create the database and its tables")
        .long_about(
            "Create the Database\n\
             \n\
             Opens the configured SQLite database, creating the file and its\n\
             parent directory when missing, then creates every table and index.\n\
             Safe to re-run.",
        )
}

pub fn cmd_job() -> Command {
    Command::new("job")
        .about("Create, inspect and cancel jobs")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("add")
                .about("Queue a new job")
                .arg(
                    Arg::new("profile")
                        .long("profile")
                        .short('p')
                        .required(true)
                        .value_parser(value_parser!(i64))
                        .help("Browser profile that must run the job"),
                )
                .arg(
                    Arg::new("prompt")
                        .long("prompt")
                        .required(true)
                        .help("Generation prompt"),
                )
                .arg(Arg::new("image_url").long("image-url").help("Reference image URL"))
                .arg(
                    Arg::new("duration")
                        .long("duration")
                        .default_value("10s")
                        .value_parser(["10s", "15s", "25s"])
                        .help("Clip duration"),
                )
                .arg(
                    Arg::new("aspect_ratio")
                        .long("aspect-ratio")
                        .default_value("landscape")
                        .value_parser(["landscape", "portrait"])
                        .help("Output orientation"),
                )
                .arg(Arg::new("group").long("group").short('g').help("Group title"))
                .arg(
                    Arg::new("priority")
                        .long("priority")
                        .value_parser(value_parser!(i64))
                        .help("Lower runs first (default 100)"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Show a job and its runs")
                .arg(job_id_arg()),
        )
        .subcommand(
            Command::new("list")
                .about("List jobs, newest first")
                .arg(
                    Arg::new("status")
                        .long("status")
                        .short('s')
                        .value_parser(["queued", "running", "completed", "failed", "canceled"])
                        .help("Only jobs with this status"),
                )
                .arg(
                    Arg::new("profile")
                        .long("profile")
                        .short('p')
                        .value_parser(value_parser!(i64))
                        .help("Only jobs for this profile"),
                )
                .arg(Arg::new("group").long("group").short('g').help("Only jobs in this group"))
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .short('n')
                        .default_value("50")
                        .value_parser(value_parser!(i64))
                        .help("Maximum rows"),
                ),
        )
        .subcommand(
            Command::new("cancel")
                .about("Cancel a queued or running job")
                .arg(job_id_arg()),
        )
        .subcommand(
            Command::new("timeline")
                .about("Print the job's timeline events in order")
                .arg(job_id_arg()),
        )
        .subcommand(
            Command::new("attempts")
                .about("Print phase attempts of a run (default: the latest run)")
                .arg(job_id_arg())
                .arg(
                    Arg::new("run")
                        .long("run")
                        .short('r')
                        .value_parser(value_parser!(i64))
                        .help("Run id"),
                ),
        )
}

pub fn cmd_lease() -> Command {
    Command::new("lease")
        .about("Inspect and manage profile leases")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("list").about("List live leases"))
        .subcommand(
            Command::new("show")
                .about("Show one profile's lease row")
                .arg(profile_id_arg()),
        )
        .subcommand(
            Command::new("release")
                .about("Force-release a profile's lease regardless of owner")
                .arg(profile_id_arg()),
        )
        .subcommand(Command::new("sweep").about("Delete expired lease rows"))
}

pub fn cmd_recover() -> Command {
    Command::new("recover")
        .about("Fail every job and run still marked running after a crash")
        .arg(
            Arg::new("reason")
                .long("reason")
                .default_value("engine restarted")
                .help("Error text written to recovered jobs"),
        )
}

pub fn build_cli() -> Command {
    Command::new("leasehold")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Operator tooling for the profile-leased job engine")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .help("Path to a TOML config file"),
        )
        .arg(
            Arg::new("database")
                .long("database")
                .global(true)
                .help("Database URL (overrides config)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output as JSON for machine parsing"),
        )
        .subcommand(cmd_init())
        .subcommand(cmd_job())
        .subcommand(cmd_lease())
        .subcommand(cmd_recover())
}
