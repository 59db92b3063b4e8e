pub mod config;
pub mod constraint;
pub mod container;
pub mod endpoint;
pub mod error;
pub mod graph;
pub mod handler;
pub mod key;
pub mod library;
pub mod resource;
pub mod service;
pub mod store;
pub mod template;
pub mod transaction;

pub use config::{CONFIG_VERSION, ConfiguredHandler, HandlerEntry, KernelConfig};
pub use constraint::{ConstraintReport, ConstraintReportId, OriginatingRequest};
pub use container::{Container, Member, Slug};
pub use endpoint::{Endpoint, EndpointDirectory, EndpointTable, EntityTag};
pub use error::{EndpointError, GraphError, KernelError, TransactionError};
pub use graph::{Entity, ResourceGraph};
pub use handler::{
    AttachmentOption, Capabilities, Capability, HandlerCatalog, HandlerClass, HandlerFactory,
    HandlerId, ResourceHandler, TemplateOptions,
};
pub use key::{MAX_NAME_DEPTH, Name, NameKind, ResourceId, ResourceKey};
pub use library::{TemplateLibrary, TemplateLibraryLoader, TemplateRef};
pub use resource::{Attachment, FailureId, Resource};
pub use service::TemplateManagementService;
pub use store::{InMemoryStore, Store, StoreSession, StoreState};
pub use template::{
    AttachedTemplate, Membership, MembershipRelation, Template, TemplateId, TemplateKind,
};
pub use transaction::{Transaction, TransactionManager, TransactionState};
