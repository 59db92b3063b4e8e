use clap::Command;
use ldpkit::KernelConfig;

use crate::commands::CommandResult;
use crate::error::CliError;

pub fn command() -> Command {
    Command::new("schema").about("Print the JSON schema of the configuration document")
}

pub fn run() -> Result<CommandResult, CliError> {
    Ok(CommandResult::Schema {
        schema: KernelConfig::json_schema()?,
    })
}
