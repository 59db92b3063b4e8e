use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::key::ResourceId;
use crate::resource::FailureId;

/// Snapshot of the request whose payload violated a constraint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginatingRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl OriginatingRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintReportId {
    resource: ResourceId,
    failure: FailureId,
}

impl ConstraintReportId {
    pub fn new(resource: ResourceId, failure: FailureId) -> Self {
        Self { resource, failure }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn failure(&self) -> FailureId {
        self.failure
    }
}

impl fmt::Display for ConstraintReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.failure)
    }
}

/// Record of a validation failure. Only a [`crate::resource::Resource`] can
/// create one, and it never changes afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstraintReport {
    id: ConstraintReportId,
    date: OffsetDateTime,
    request: OriginatingRequest,
    constraints: Vec<String>,
}

impl ConstraintReport {
    pub(crate) fn new(
        resource: ResourceId,
        failure: FailureId,
        date: OffsetDateTime,
        request: OriginatingRequest,
        constraints: Vec<String>,
    ) -> Self {
        Self {
            id: ConstraintReportId::new(resource, failure),
            date,
            request,
            constraints,
        }
    }

    pub fn id(&self) -> &ConstraintReportId {
        &self.id
    }

    pub fn date(&self) -> OffsetDateTime {
        self.date
    }

    pub fn request(&self) -> &OriginatingRequest {
        &self.request
    }

    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }
}
