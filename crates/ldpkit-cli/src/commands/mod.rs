use serde::Serialize;
use serde_json::Value;

use crate::error::ExitStatus;

pub mod schema;
pub mod template;
pub mod templates;
pub mod validate;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandResult {
    Validated {
        config: String,
        templates: usize,
        handlers: usize,
    },
    TemplateList {
        templates: Vec<templates::TemplateSummary>,
    },
    TemplateDetail {
        template: template::TemplateDetail,
    },
    Schema {
        schema: Value,
    },
}

impl CommandResult {
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::Ok
    }
}
