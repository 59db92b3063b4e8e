use clap::{ArgMatches, Command};

use crate::commands::CommandResult;
use crate::context::CliSession;
use crate::error::CliError;

pub fn command() -> Command {
    Command::new("validate").about("Load the configuration and build every template it declares")
}

pub fn run(session: &CliSession, _matches: &ArgMatches) -> Result<CommandResult, CliError> {
    let library = session.service.library()?;
    let handlers = session.service.handlers()?;
    if session.verbosity.verbose {
        tracing::info!(
            config = %session.config_path.display(),
            roots = session.config.roots().len(),
            declared = session.config.handlers.len(),
            "configuration validated"
        );
    }
    Ok(CommandResult::Validated {
        config: session.config_path.display().to_string(),
        templates: library.len(),
        handlers: handlers.len(),
    })
}
