use crate::error::{CliError, ExitStatus};

#[derive(Clone, Copy, Debug, Default)]
pub struct Verbosity {
    pub json: bool,
    pub verbose: bool,
}

pub fn validate_template_id(id: &str) -> Result<&str, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::new(
            "template id must not be empty",
            ExitStatus::Usage,
        ));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(CliError::new(
            format!("template id '{trimmed}' must not contain whitespace"),
            ExitStatus::Usage,
        ));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_ids_are_trimmed_and_checked() {
        assert_eq!(validate_template_id("  books ").unwrap(), "books");
        assert!(validate_template_id("   ").is_err());
        assert!(validate_template_id("two words").is_err());
    }
}
