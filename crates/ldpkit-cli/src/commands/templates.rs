use clap::{ArgMatches, Command};
use serde::Serialize;

use crate::commands::CommandResult;
use crate::context::CliSession;
use crate::error::CliError;

#[derive(Clone, Debug, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub kind: String,
    pub handler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_template: Option<String>,
}

pub fn command() -> Command {
    Command::new("templates").about("List every template in the configured library")
}

pub fn run(session: &CliSession, _matches: &ArgMatches) -> Result<CommandResult, CliError> {
    let library = session.service.library()?;
    let templates = library
        .templates()
        .map(|template| TemplateSummary {
            id: template.id().to_string(),
            kind: template.kind().to_string(),
            handler: template.handler().to_string(),
            member_template: template.member_template().map(|member| member.id().to_string()),
        })
        .collect();
    Ok(CommandResult::TemplateList { templates })
}
