use clap::{Arg, ArgMatches, Command};
use ldpkit::{Template, TemplateId};
use serde::Serialize;

use crate::commands::CommandResult;
use crate::context::CliSession;
use crate::error::{CliError, ExitStatus};
use crate::util;

#[derive(Clone, Debug, Serialize)]
pub struct AttachmentDetail {
    pub id: String,
    pub path: String,
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TemplateDetail {
    pub id: String,
    pub kind: String,
    pub handler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attachments: Vec<AttachmentDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_predicate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_content_relation: Option<String>,
}

impl From<&Template> for TemplateDetail {
    fn from(template: &Template) -> Self {
        let membership = template.membership();
        Self {
            id: template.id().to_string(),
            kind: template.kind().to_string(),
            handler: template.handler().to_string(),
            name: template.name().map(str::to_string),
            description: template.description().map(str::to_string),
            attachments: template
                .attachments()
                .iter()
                .map(|attached| AttachmentDetail {
                    id: attached.id().to_string(),
                    path: attached.path().to_string(),
                    template: attached.template().to_string(),
                    predicate: attached.predicate().map(|uri| uri.to_string()),
                })
                .collect(),
            member_template: template.member_template().map(|id| id.to_string()),
            member_path: template.member_path().map(str::to_string),
            membership_predicate: membership.map(|m| m.predicate().to_string()),
            membership_relation: membership.map(|m| m.relation().to_string()),
            inserted_content_relation: template
                .inserted_content_relation()
                .map(|uri| uri.to_string()),
        }
    }
}

pub fn command() -> Command {
    Command::new("template")
        .about("Show one template with its attachments and membership")
        .arg(
            Arg::new("id")
                .value_name("ID")
                .required(true)
                .help("Template id to show"),
        )
}

pub fn run(session: &CliSession, matches: &ArgMatches) -> Result<CommandResult, CliError> {
    let raw = matches
        .get_one::<String>("id")
        .ok_or_else(|| CliError::new("missing template id", ExitStatus::Usage))?;
    let id = TemplateId::new(util::validate_template_id(raw)?);
    let found = session.service.template_of_id(&id)?.ok_or_else(|| {
        CliError::new(format!("template '{id}' is not defined"), ExitStatus::Data)
    })?;
    Ok(CommandResult::TemplateDetail {
        template: TemplateDetail::from(found.template()),
    })
}
