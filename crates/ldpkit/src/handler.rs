use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::template::{MembershipRelation, TemplateKind};

/// Identity of a handler type. One template is registered per handler type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(String);

impl HandlerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HandlerId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Capability markers an application handler may carry.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Resource,
    Container,
    Deletable,
    Modifiable,
    Queryable,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self(capabilities.into_iter().collect())
    }

    /// Plain resource handler.
    pub fn resource() -> Self {
        Self::new([Capability::Resource])
    }

    /// Container handler; every container is also a resource handler.
    pub fn container() -> Self {
        Self::new([Capability::Resource, Capability::Container])
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

/// Application object serving the resources of one template.
///
/// The kernel never calls into handlers beyond asking who they are; request
/// callbacks belong to the application layer.
pub trait ResourceHandler: Send + Sync {
    fn handler_id(&self) -> &HandlerId;
    fn capabilities(&self) -> Capabilities;
}

/// Default constructor for a handler type.
pub type HandlerFactory =
    Arc<dyn Fn() -> Result<Arc<dyn ResourceHandler>, String> + Send + Sync>;

/// Attachment declaration as read from configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AttachmentOption {
    pub id: String,
    pub path: String,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

/// Recognized template options of a handler type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateOptions {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_predicate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_relation: Option<MembershipRelation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted_content_relation: Option<String>,
}

/// Static description of a handler type: its capabilities, the template
/// markers it carries, its template options and how to construct it.
#[derive(Clone)]
pub struct HandlerClass {
    pub id: HandlerId,
    pub capabilities: Capabilities,
    pub markers: Vec<TemplateKind>,
    pub options: TemplateOptions,
    pub factory: Option<HandlerFactory>,
}

impl HandlerClass {
    pub fn new(id: impl Into<HandlerId>, marker: TemplateKind, options: TemplateOptions) -> Self {
        let capabilities = if marker.is_container() {
            Capabilities::container()
        } else {
            Capabilities::resource()
        };
        Self {
            id: id.into(),
            capabilities,
            markers: vec![marker],
            options,
            factory: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_markers(mut self, markers: Vec<TemplateKind>) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ResourceHandler>, String> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Runs the default constructor of this handler type.
    pub fn instantiate(&self) -> Result<Arc<dyn ResourceHandler>, KernelError> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| KernelError::HandlerInstantiation {
                handler: self.id.clone(),
                message: "handler type has no default constructor".into(),
            })?;
        let handler = factory().map_err(|message| KernelError::HandlerInstantiation {
            handler: self.id.clone(),
            message,
        })?;
        if handler.handler_id() != &self.id {
            return Err(KernelError::HandlerInstantiation {
                handler: self.id.clone(),
                message: format!("constructor produced a {} handler", handler.handler_id()),
            });
        }
        Ok(handler)
    }
}

impl fmt::Debug for HandlerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerClass")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("markers", &self.markers)
            .field("options", &self.options)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

/// Every handler type the application knows about, keyed by identity.
///
/// The library loader pulls referenced handler types from here on demand.
#[derive(Clone, Debug, Default)]
pub struct HandlerCatalog {
    classes: BTreeMap<HandlerId, HandlerClass>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: HandlerClass) -> Result<(), KernelError> {
        if self.classes.contains_key(&class.id) {
            return Err(KernelError::TemplateCreation(format!(
                "handler {} is declared more than once",
                class.id
            )));
        }
        self.classes.insert(class.id.clone(), class);
        Ok(())
    }

    pub fn with(mut self, class: HandlerClass) -> Result<Self, KernelError> {
        self.register(class)?;
        Ok(self)
    }

    pub fn get(&self, id: &HandlerId) -> Option<&HandlerClass> {
        self.classes.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &HandlerId> {
        self.classes.keys()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(HandlerId);

    impl ResourceHandler for Fixed {
        fn handler_id(&self) -> &HandlerId {
            &self.0
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::resource()
        }
    }

    fn options(id: &str) -> TemplateOptions {
        TemplateOptions {
            id: id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn container_marker_implies_container_capability() {
        let class = HandlerClass::new("Books", TemplateKind::BasicContainer, options("books"));
        assert!(class.capabilities.contains(Capability::Container));
        assert!(class.capabilities.contains(Capability::Resource));
    }

    #[test]
    fn instantiate_without_factory_fails() {
        let class = HandlerClass::new("Book", TemplateKind::Resource, options("book"));
        let err = class.instantiate().err().unwrap();
        assert!(matches!(err, KernelError::HandlerInstantiation { .. }));
    }

    #[test]
    fn instantiate_checks_the_produced_identity() {
        let class = HandlerClass::new("Book", TemplateKind::Resource, options("book"))
            .with_factory(|| Ok(Arc::new(Fixed(HandlerId::new("Other"))) as Arc<dyn ResourceHandler>));
        assert!(class.instantiate().is_err());

        let class = HandlerClass::new("Book", TemplateKind::Resource, options("book"))
            .with_factory(|| Ok(Arc::new(Fixed(HandlerId::new("Book"))) as Arc<dyn ResourceHandler>));
        assert_eq!(class.instantiate().unwrap().handler_id().as_str(), "Book");
    }

    #[test]
    fn catalog_rejects_duplicate_handlers() {
        let mut catalog = HandlerCatalog::new();
        catalog
            .register(HandlerClass::new("Book", TemplateKind::Resource, options("book")))
            .unwrap();
        let err = catalog
            .register(HandlerClass::new("Book", TemplateKind::Resource, options("other")))
            .unwrap_err();
        assert!(matches!(err, KernelError::TemplateCreation(_)));
        assert_eq!(catalog.len(), 1);
    }
}
