use std::fmt;

use thiserror::Error;

use crate::handler::HandlerId;
use crate::key::ResourceId;
use crate::template::{TemplateId, TemplateKind};

/// Recoverable failures raised while mutating the resource graph.
///
/// A failed operation never leaves a partial mutation behind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("resource {0} does not exist")]
    UnknownResource(ResourceId),
    #[error("resource {0} already exists")]
    ResourceExists(ResourceId),
    #[error("resource {resource} is already a child of {parent}")]
    ForeignParent {
        resource: ResourceId,
        parent: ResourceId,
    },
    #[error("template {0} is not part of the active library")]
    UnknownTemplate(TemplateId),
    #[error("template {template} is a {found} template, expected {expected}")]
    TemplateMismatch {
        template: TemplateId,
        expected: TemplateKind,
        found: TemplateKind,
    },
    #[error("resource {0} is not a container")]
    NotAContainer(ResourceId),
    #[error("resource {resource} has no attachment slot {slot}")]
    UnknownAttachment { resource: ResourceId, slot: String },
    #[error("attachment {slot} of {resource} is already bound to {bound}")]
    AttachmentOccupied {
        resource: ResourceId,
        slot: String,
        bound: ResourceId,
    },
    #[error("resource {child} is already attached to {resource} through {slot}")]
    AlreadyAttached {
        resource: ResourceId,
        child: ResourceId,
        slot: String,
    },
    #[error("resource {child} cannot be attached through {slot}: {reason}")]
    IncompatibleAttachment {
        child: ResourceId,
        slot: String,
        reason: String,
    },
    #[error("resource {member} is already a member of {container}")]
    AlreadyMember {
        container: ResourceId,
        member: ResourceId,
    },
    #[error("invalid preferred path '{0}'")]
    InvalidPath(String),
}

/// Failures raised by the endpoint directory.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid endpoint path '{0}'")]
    InvalidPath(String),
    #[error("an endpoint already exists at {0}")]
    DuplicatePath(String),
    #[error("resource {resource} is already published at {path}")]
    AlreadyPublished { resource: ResourceId, path: String },
    #[error("endpoint {0} has been deleted")]
    Deleted(String),
    #[error("no endpoint exists at {0}")]
    UnknownEndpoint(String),
}

/// Transaction state-machine and commit failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction is {0}, expected active")]
    NotActive(&'static str),
    #[error("transaction cannot begin while {0}")]
    CannotBegin(&'static str),
    #[error("another transaction is already active in this execution context")]
    AlreadyActive,
    #[error("commit conflict: session started at revision {started}, store is at {current}")]
    Conflict { started: u64, current: u64 },
}

/// High-level error type shared across kernel components.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("template creation failed: {0}")]
    TemplateCreation(String),
    #[error("could not instantiate handler {handler}: {message}")]
    HandlerInstantiation { handler: HandlerId, message: String },
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("key error: {0}")]
    Key(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for KernelError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl KernelError {
    pub fn context<T: fmt::Display>(self, ctx: T) -> Self {
        match self {
            KernelError::TemplateCreation(msg) => {
                KernelError::TemplateCreation(format!("{ctx}: {msg}"))
            }
            KernelError::HandlerInstantiation { handler, message } => {
                KernelError::HandlerInstantiation {
                    handler,
                    message: format!("{ctx}: {message}"),
                }
            }
            KernelError::IllegalState(msg) => KernelError::IllegalState(format!("{ctx}: {msg}")),
            KernelError::Key(msg) => KernelError::Key(format!("{ctx}: {msg}")),
            KernelError::Configuration(msg) => {
                KernelError::Configuration(format!("{ctx}: {msg}"))
            }
            KernelError::Serialization(msg) => {
                KernelError::Serialization(format!("{ctx}: {msg}"))
            }
            other @ (KernelError::Graph(_)
            | KernelError::Endpoint(_)
            | KernelError::Transaction(_)
            | KernelError::Io(_)) => other,
        }
    }

    /// Returns the graph failure carried by this error, if any.
    pub fn as_graph(&self) -> Option<&GraphError> {
        match self {
            KernelError::Graph(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefixes_message_variants() {
        let err = KernelError::TemplateCreation("bad uri".into()).context("handler Book");
        assert_eq!(
            err.to_string(),
            "template creation failed: handler Book: bad uri"
        );
    }

    #[test]
    fn context_leaves_structured_variants_untouched() {
        let err = KernelError::from(TransactionError::AlreadyActive).context("begin");
        assert!(matches!(
            err,
            KernelError::Transaction(TransactionError::AlreadyActive)
        ));
    }
}
