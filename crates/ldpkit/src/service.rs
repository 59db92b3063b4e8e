use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::KernelError;
use crate::graph::ResourceGraph;
use crate::handler::{HandlerCatalog, HandlerId, ResourceHandler};
use crate::library::{TemplateLibrary, TemplateRef};
use crate::template::{TemplateId, TemplateKind};

struct Configuration {
    library: Arc<TemplateLibrary>,
    handlers: BTreeMap<HandlerId, Arc<dyn ResourceHandler>>,
}

/// One-shot configuration orchestrator for templates and handlers.
///
/// The service starts unconfigured. [`configure`](Self::configure) builds the
/// template library and one handler instance per handler type exactly once;
/// every lookup before that, and any second configuration, is an illegal state.
pub struct TemplateManagementService {
    catalog: HandlerCatalog,
    configuring: Mutex<()>,
    configuration: OnceLock<Configuration>,
}

impl TemplateManagementService {
    pub fn new(catalog: HandlerCatalog) -> Self {
        Self {
            catalog,
            configuring: Mutex::new(()),
            configuration: OnceLock::new(),
        }
    }

    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }

    pub fn is_configured(&self) -> bool {
        self.configuration.get().is_some()
    }

    /// Builds the library reachable from `roots` and the handlers supplied in
    /// `instances`, then default-constructs a handler for every other handler
    /// type in the library.
    ///
    /// Nothing is published unless every step succeeds.
    pub fn configure(
        &self,
        roots: &[HandlerId],
        instances: Vec<Arc<dyn ResourceHandler>>,
    ) -> Result<(), KernelError> {
        let _guard = self.configuring.lock();
        if self.is_configured() {
            return Err(KernelError::IllegalState(
                "template management service is already configured".into(),
            ));
        }

        let mut handlers = BTreeMap::new();
        for instance in instances {
            let id = instance.handler_id().clone();
            self.check_instance(instance.as_ref())?;
            if handlers.insert(id.clone(), instance).is_some() {
                return Err(KernelError::Configuration(format!(
                    "handler {id} is supplied more than once"
                )));
            }
        }

        let library = TemplateLibrary::load(&self.catalog, roots.iter().chain(handlers.keys()))?;
        for handler in library.handlers() {
            if handlers.contains_key(handler) {
                continue;
            }
            let class = self.catalog.get(handler).ok_or_else(|| {
                KernelError::IllegalState(format!("handler {handler} vanished from the catalog"))
            })?;
            handlers.insert(handler.clone(), class.instantiate()?);
        }

        tracing::info!(
            templates = library.len(),
            handlers = handlers.len(),
            "template management service configured"
        );
        let configuration = Configuration {
            library: Arc::new(library),
            handlers,
        };
        if self.configuration.set(configuration).is_err() {
            return Err(KernelError::IllegalState(
                "template management service is already configured".into(),
            ));
        }
        Ok(())
    }

    fn check_instance(&self, instance: &dyn ResourceHandler) -> Result<(), KernelError> {
        let id = instance.handler_id();
        let class = self.catalog.get(id).ok_or_else(|| {
            KernelError::Configuration(format!("handler {id} has no registered handler type"))
        })?;
        let supplied = instance.capabilities();
        if let Some(missing) = class
            .capabilities
            .iter()
            .find(|capability| !supplied.contains(*capability))
        {
            return Err(KernelError::TemplateCreation(format!(
                "handler {id} does not provide the {missing:?} capability of its type"
            )));
        }
        Ok(())
    }

    fn configured(&self) -> Result<&Configuration, KernelError> {
        self.configuration.get().ok_or_else(|| {
            KernelError::IllegalState("template management service is not configured".into())
        })
    }

    pub fn library(&self) -> Result<Arc<TemplateLibrary>, KernelError> {
        Ok(Arc::clone(&self.configured()?.library))
    }

    pub fn template_of_handler(
        &self,
        handler: &HandlerId,
    ) -> Result<Option<TemplateRef<'_>>, KernelError> {
        Ok(self.configured()?.library.find_by_handler(handler))
    }

    pub fn template_of_id(&self, id: &TemplateId) -> Result<Option<TemplateRef<'_>>, KernelError> {
        Ok(self.configured()?.library.find_by_id(id))
    }

    /// Looks a template up and checks that it can serve as `expected`.
    pub fn template_of_id_as(
        &self,
        id: &TemplateId,
        expected: TemplateKind,
    ) -> Result<TemplateRef<'_>, KernelError> {
        Ok(self.configured()?.library.find_as(id, expected)?)
    }

    pub fn handler(
        &self,
        handler: &HandlerId,
    ) -> Result<Option<Arc<dyn ResourceHandler>>, KernelError> {
        Ok(self.configured()?.handlers.get(handler).cloned())
    }

    pub fn handlers(&self) -> Result<Vec<Arc<dyn ResourceHandler>>, KernelError> {
        Ok(self.configured()?.handlers.values().cloned().collect())
    }

    /// Resource graph over the configured library.
    pub fn resource_graph(&self) -> Result<ResourceGraph, KernelError> {
        Ok(ResourceGraph::new(self.library()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::handler::{Capabilities, HandlerClass, TemplateOptions};

    struct Stub {
        id: HandlerId,
        capabilities: Capabilities,
    }

    impl ResourceHandler for Stub {
        fn handler_id(&self) -> &HandlerId {
            &self.id
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities.clone()
        }
    }

    fn stub(id: &str, capabilities: Capabilities) -> Arc<dyn ResourceHandler> {
        Arc::new(Stub {
            id: HandlerId::new(id),
            capabilities,
        })
    }

    fn class(id: &'static str, marker: TemplateKind, options: TemplateOptions) -> HandlerClass {
        let capabilities = HandlerClass::new(id, marker, TemplateOptions::default()).capabilities;
        HandlerClass::new(id, marker, options)
            .with_factory(move || Ok(stub(id, capabilities.clone())))
    }

    fn catalog() -> HandlerCatalog {
        let mut catalog = HandlerCatalog::new();
        catalog
            .register(class(
                "Book",
                TemplateKind::Resource,
                TemplateOptions {
                    id: "book".into(),
                    ..Default::default()
                },
            ))
            .unwrap();
        catalog
            .register(class(
                "Books",
                TemplateKind::BasicContainer,
                TemplateOptions {
                    id: "books".into(),
                    member_handler: Some("Book".into()),
                    ..Default::default()
                },
            ))
            .unwrap();
        catalog
    }

    #[test]
    fn lookups_before_configuration_are_illegal() {
        let service = TemplateManagementService::new(catalog());
        assert!(!service.is_configured());
        assert!(matches!(
            service.template_of_id(&TemplateId::new("book")),
            Err(KernelError::IllegalState(_))
        ));
        assert!(matches!(
            service.handler(&HandlerId::new("Book")),
            Err(KernelError::IllegalState(_))
        ));
    }

    #[test]
    fn configure_builds_library_and_default_handlers() {
        let service = TemplateManagementService::new(catalog());
        service.configure(&[HandlerId::new("Books")], Vec::new()).unwrap();

        let books = service.template_of_id(&TemplateId::new("books")).unwrap().unwrap();
        assert_eq!(books.kind(), TemplateKind::BasicContainer);
        assert_eq!(books.member_template().unwrap().id().as_str(), "book");
        assert!(service.handler(&HandlerId::new("Book")).unwrap().is_some());
        assert_eq!(service.handlers().unwrap().len(), 2);
    }

    #[test]
    fn second_configuration_fails_and_keeps_the_first() {
        let service = TemplateManagementService::new(catalog());
        service.configure(&[HandlerId::new("Book")], Vec::new()).unwrap();
        let err = service
            .configure(&[HandlerId::new("Books")], Vec::new())
            .unwrap_err();
        assert!(matches!(err, KernelError::IllegalState(_)));
        assert!(service.template_of_id(&TemplateId::new("books")).unwrap().is_none());
        assert_eq!(service.library().unwrap().len(), 1);
    }

    #[test]
    fn supplied_instances_are_kept_and_checked() {
        let service = TemplateManagementService::new(catalog());
        let err = service
            .configure(&[], vec![stub("Books", Capabilities::resource())])
            .unwrap_err();
        assert!(matches!(err, KernelError::TemplateCreation(_)));
        assert!(!service.is_configured());

        let supplied = stub("Books", Capabilities::container());
        service.configure(&[], vec![Arc::clone(&supplied)]).unwrap();
        let configured = service.handler(&HandlerId::new("Books")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&configured, &supplied));
    }

    #[test]
    fn failing_default_constructor_aborts_configuration() {
        let mut catalog = HandlerCatalog::new();
        catalog
            .register(
                HandlerClass::new(
                    "Broken",
                    TemplateKind::Resource,
                    TemplateOptions {
                        id: "broken".into(),
                        ..Default::default()
                    },
                )
                .with_factory(|| Err("no database".into())),
            )
            .unwrap();
        let service = TemplateManagementService::new(catalog);
        let err = service
            .configure(&[HandlerId::new("Broken")], Vec::new())
            .unwrap_err();
        assert!(matches!(err, KernelError::HandlerInstantiation { .. }));
        assert!(!service.is_configured());
    }

    #[test]
    fn template_of_id_as_checks_the_kind() {
        let service = TemplateManagementService::new(catalog());
        service.configure(&[HandlerId::new("Books")], Vec::new()).unwrap();
        assert!(service
            .template_of_id_as(&TemplateId::new("books"), TemplateKind::Container)
            .is_ok());
        let err = service
            .template_of_id_as(&TemplateId::new("book"), TemplateKind::Container)
            .unwrap_err();
        assert!(matches!(
            err.as_graph(),
            Some(GraphError::TemplateMismatch { .. })
        ));
    }
}
