use std::ffi::OsString;
use std::process::ExitCode;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::commands;
use crate::context::CliSession;
use crate::error::{CliError, ExitStatus};
use crate::formatter::{OutputFormat, emit_result};
use crate::util::Verbosity;

const NAME: &str = "ldpkit";

pub fn run() -> ExitCode {
    init_tracing();
    match run_cli(std::env::args()) {
        Ok(code) => code,
        Err(err) => {
            err.print();
            err.exit_code()
        }
    }
}

/// Parses CLI arguments, loads the configuration when the command needs it,
/// and dispatches. Returns a `sysexits`-compatible `ExitCode`.
pub fn run_cli<I, S>(args: I) -> Result<ExitCode, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
{
    let command = build_cli();
    let matches = command.try_get_matches_from(args)?;

    let verbosity = Verbosity {
        json: matches.get_flag("json"),
        verbose: matches.get_flag("verbose"),
    };
    let output = if verbosity.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    if let Some(("schema", _)) = matches.subcommand() {
        return emit_result(commands::schema::run()?, output);
    }

    let config = matches.get_one::<String>("config").cloned();
    let session = CliSession::bootstrap(config, verbosity)?;
    if session.verbosity.verbose {
        tracing::info!(
            config = %session.config_path.display(),
            handlers = session.config.handlers.len(),
            "loaded configuration"
        );
    }

    let result = dispatch(&session, &matches)?;
    emit_result(result, output)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    Command::new(NAME)
        .about("Inspect ldpkit handler configurations and template libraries")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Handler configuration file (YAML, or JSON with a .json extension)."),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit JSON instead of human-readable text."),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit additional logging about the loaded configuration."),
        )
        .subcommand_required(true)
        .subcommand(commands::validate::command())
        .subcommand(commands::templates::command())
        .subcommand(commands::template::command())
        .subcommand(commands::schema::command())
}

fn dispatch(
    session: &CliSession,
    matches: &ArgMatches,
) -> Result<commands::CommandResult, CliError> {
    match matches.subcommand() {
        Some(("validate", sub)) => commands::validate::run(session, sub),
        Some(("templates", sub)) => commands::templates::run(session, sub),
        Some(("template", sub)) => commands::template::run(session, sub),
        _ => Err(CliError::new("missing command", ExitStatus::Usage)),
    }
}
