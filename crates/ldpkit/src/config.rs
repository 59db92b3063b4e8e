use std::fs;
use std::path::Path;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::handler::{
    Capabilities, Capability, HandlerCatalog, HandlerClass, HandlerId, ResourceHandler,
    TemplateOptions,
};
use crate::service::TemplateManagementService;
use crate::template::TemplateKind;

pub const CONFIG_VERSION: u32 = 1;

/// Declarative description of the handler types of an application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KernelConfig {
    pub version: u32,
    /// Handlers the library is built from. Defaults to every declared handler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roots: Vec<String>,
    #[serde(default)]
    pub handlers: Vec<HandlerEntry>,
}

/// One handler type and its template options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HandlerEntry {
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TemplateKind>,
    /// Alternative to `kind`; exactly one marker must be given overall.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<TemplateKind>,
    /// Overrides the capabilities implied by the template kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
    #[serde(flatten)]
    pub template: TemplateOptions,
}

impl HandlerEntry {
    pub fn markers(&self) -> Vec<TemplateKind> {
        self.kind.iter().chain(&self.markers).copied().collect()
    }

    fn to_class(&self) -> HandlerClass {
        let markers = self.markers();
        let primary = markers.first().copied().unwrap_or(TemplateKind::Resource);
        let mut class = HandlerClass::new(self.handler.as_str(), primary, self.template.clone())
            .with_markers(markers);
        if !self.capabilities.is_empty() {
            class = class.with_capabilities(Capabilities::new(self.capabilities.iter().copied()));
        }
        let id = class.id.clone();
        let capabilities = class.capabilities.clone();
        class.with_factory(move || {
            Ok(Arc::new(ConfiguredHandler {
                id: id.clone(),
                capabilities: capabilities.clone(),
            }) as Arc<dyn ResourceHandler>)
        })
    }
}

/// Handler instance built from configuration alone.
#[derive(Clone, Debug)]
pub struct ConfiguredHandler {
    id: HandlerId,
    capabilities: Capabilities,
}

impl ResourceHandler for ConfiguredHandler {
    fn handler_id(&self) -> &HandlerId {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }
}

impl KernelConfig {
    /// Reads a configuration file; `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let parsed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_yaml_str(&raw),
        };
        parsed.map_err(|err| err.context(path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, KernelError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, KernelError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), KernelError> {
        if self.version != CONFIG_VERSION {
            return Err(KernelError::Configuration(format!(
                "unsupported configuration version {} (expected {CONFIG_VERSION})",
                self.version
            )));
        }
        if let Some(entry) = self.handlers.iter().find(|entry| entry.handler.trim().is_empty()) {
            return Err(KernelError::Configuration(format!(
                "handler entry for template '{}' has no handler name",
                entry.template.id
            )));
        }
        Ok(())
    }

    pub fn into_catalog(&self) -> Result<HandlerCatalog, KernelError> {
        let mut catalog = HandlerCatalog::new();
        for entry in &self.handlers {
            catalog.register(entry.to_class())?;
        }
        Ok(catalog)
    }

    /// Handlers to build the library from.
    pub fn roots(&self) -> Vec<HandlerId> {
        if self.roots.is_empty() {
            self.handlers
                .iter()
                .map(|entry| HandlerId::new(entry.handler.as_str()))
                .collect()
        } else {
            self.roots.iter().map(|root| HandlerId::new(root.as_str())).collect()
        }
    }

    /// Builds and configures a service whose handlers are all
    /// [`ConfiguredHandler`]s.
    pub fn configure_service(&self) -> Result<TemplateManagementService, KernelError> {
        let service = TemplateManagementService::new(self.into_catalog()?);
        service.configure(&self.roots(), Vec::new())?;
        Ok(service)
    }

    /// JSON schema of the configuration document.
    pub fn json_schema() -> Result<serde_json::Value, KernelError> {
        Ok(serde_json::to_value(schemars::schema_for!(KernelConfig))?)
    }
}
