use std::process::ExitCode;

use serde_json::json;

use crate::commands::CommandResult;
use crate::commands::template::TemplateDetail;
use crate::error::CliError;

pub enum OutputFormat {
    Text,
    Json,
}

/// Renders a `CommandResult` as human-readable text or a single JSON document
/// and turns it into an exit code.
pub fn emit_result(result: CommandResult, format: OutputFormat) -> Result<ExitCode, CliError> {
    match format {
        OutputFormat::Text => print_text(&result)?,
        OutputFormat::Json => print_json(&result),
    };
    Ok(ExitCode::from(result.exit_status().code()))
}

fn print_text(result: &CommandResult) -> Result<(), CliError> {
    match result {
        CommandResult::Validated {
            config,
            templates,
            handlers,
        } => {
            println!("Configuration OK: {config} ({templates} templates, {handlers} handlers)");
        }
        CommandResult::TemplateList { templates } => {
            println!("Templates ({}):", templates.len());
            for template in templates {
                match &template.member_template {
                    Some(member) => println!(
                        "  - {} [{}] handler {} (members: {member})",
                        template.id, template.kind, template.handler
                    ),
                    None => println!(
                        "  - {} [{}] handler {}",
                        template.id, template.kind, template.handler
                    ),
                }
            }
        }
        CommandResult::TemplateDetail { template } => print_template(template),
        CommandResult::Schema { schema } => {
            println!("{}", serde_json::to_string_pretty(schema)?);
        }
    }
    Ok(())
}

fn print_template(template: &TemplateDetail) {
    println!("Template {} ({})", template.id, template.kind);
    println!("  handler: {}", template.handler);
    if let Some(name) = &template.name {
        println!("  name: {name}");
    }
    if let Some(description) = &template.description {
        println!("  description: {description}");
    }
    if let Some(member) = &template.member_template {
        let path = template.member_path.as_deref().unwrap_or("-");
        println!("  members: {member} (path: {path})");
    }
    if let (Some(predicate), Some(relation)) =
        (&template.membership_predicate, &template.membership_relation)
    {
        println!("  membership: {relation} {predicate}");
    }
    if let Some(relation) = &template.inserted_content_relation {
        println!("  inserted content relation: {relation}");
    }
    if template.attachments.is_empty() {
        return;
    }
    println!("  attachments:");
    for attachment in &template.attachments {
        let predicate = attachment
            .predicate
            .as_deref()
            .map(|p| format!(" via {p}"))
            .unwrap_or_default();
        println!(
            "    - {} at {} -> {}{predicate}",
            attachment.id, attachment.path, attachment.template
        );
    }
}

fn print_json(result: &CommandResult) {
    let payload = json!(result);
    println!("{payload}");
}
