use std::path::PathBuf;

use ldpkit::{KernelConfig, TemplateManagementService};

use crate::error::{CliError, ExitStatus};
use crate::util::Verbosity;

/// Configuration loaded from `--config` and the service configured from it.
pub struct CliSession {
    pub config_path: PathBuf,
    pub config: KernelConfig,
    pub service: TemplateManagementService,
    pub verbosity: Verbosity,
}

impl CliSession {
    pub fn bootstrap(config_path: Option<String>, verbosity: Verbosity) -> Result<Self, CliError> {
        let config_path = config_path.map(PathBuf::from).ok_or_else(|| {
            CliError::new("--config <PATH> is required for this command", ExitStatus::Usage)
        })?;
        let config = KernelConfig::from_path(&config_path)?;
        let service = config.configure_service()?;

        Ok(Self {
            config_path,
            config,
            service,
            verbosity,
        })
    }
}
