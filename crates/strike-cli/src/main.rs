//! Administrative tool for the strike ledger

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use strike_core::MemberId;
use tracing_subscriber::EnvFilter;

mod commands;

fn cli() -> Command {
    Command::new("strike-cli")
        .version(strike_core::VERSION)
        .about("Inspect strike records and validate strike configuration")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("show")
                .about("Show a member's strike record")
                .arg(member_arg())
                .arg(
                    Arg::new("database")
                        .long("database")
                        .value_parser(value_parser!(PathBuf))
                        .help("Ledger file; overrides the configured database_path"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("hash")
                .about("Print the pseudonymous hash the ledger stores for a member")
                .arg(member_arg()),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a configuration file and print the effective settings")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file"),
                )
                .arg(json_arg()),
        )
}

fn member_arg() -> Arg {
    Arg::new("member")
        .long("member")
        .required(true)
        .value_parser(value_parser!(u64))
        .help("Platform id of the member")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn member(args: &ArgMatches) -> MemberId {
    MemberId(args.get_one::<u64>("member").copied().unwrap_or_default())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    let output = match matches.subcommand() {
        Some(("show", args)) => {
            commands::show(
                member(args),
                args.get_one::<PathBuf>("database").map(PathBuf::as_path),
                args.get_one::<PathBuf>("config").map(PathBuf::as_path),
                args.get_flag("json"),
            )
            .await?
        }
        Some(("hash", args)) => commands::hash(member(args)),
        Some(("check-config", args)) => {
            let path = args
                .get_one::<PathBuf>("path")
                .ok_or_else(|| anyhow::anyhow!("--path is required"))?;
            commands::check_config(path, args.get_flag("json"))?
        }
        _ => unreachable!("clap requires a subcommand"),
    };

    println!("{output}");
    Ok(())
}
