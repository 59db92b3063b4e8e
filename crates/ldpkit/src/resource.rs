use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::constraint::{ConstraintReport, OriginatingRequest};
use crate::error::{GraphError, KernelError};
use crate::key::ResourceId;
use crate::template::Template;

/// Identifier correlating a resource with one outstanding constraint report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureId(u32);

impl FailureId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FailureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Binding slot of a resource, one per attachment declared by its template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    slot: String,
    resource: Option<ResourceId>,
}

impl Attachment {
    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn resource(&self) -> Option<&ResourceId> {
        self.resource.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.resource.is_some()
    }
}

/// A node of the resource graph.
pub struct Resource {
    id: ResourceId,
    parent: Option<ResourceId>,
    indirect_id: Option<Url>,
    attachments: BTreeMap<String, Attachment>,
    failures: Mutex<BTreeSet<FailureId>>,
}

impl Resource {
    pub(crate) fn new(id: ResourceId, parent: Option<ResourceId>, template: &Template) -> Self {
        let attachments = template
            .attachments()
            .iter()
            .map(|attached| {
                (
                    attached.id().to_string(),
                    Attachment {
                        slot: attached.id().to_string(),
                        resource: None,
                    },
                )
            })
            .collect();
        Self {
            id,
            parent,
            indirect_id: None,
            attachments,
            failures: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn parent(&self) -> Option<&ResourceId> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn indirect_id(&self) -> Option<&Url> {
        self.indirect_id.as_ref()
    }

    pub fn set_indirect_id(&mut self, indirect_id: Option<Url>) {
        self.indirect_id = indirect_id;
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.values()
    }

    pub fn attachment(&self, slot: &str) -> Option<&Attachment> {
        self.attachments.get(slot)
    }

    /// Slot currently bound to `child`, if any.
    pub fn attachment_of(&self, child: &ResourceId) -> Option<&Attachment> {
        self.attachments
            .values()
            .find(|attachment| attachment.resource.as_ref() == Some(child))
    }

    /// Checks that `child` may be bound to `slot` without changing anything.
    ///
    /// Returns `false` when the slot already holds exactly this child.
    pub(crate) fn check_bind(&self, slot: &str, child: &ResourceId) -> Result<bool, GraphError> {
        let attachment = self
            .attachments
            .get(slot)
            .ok_or_else(|| GraphError::UnknownAttachment {
                resource: self.id.clone(),
                slot: slot.to_string(),
            })?;
        match &attachment.resource {
            Some(bound) if bound == child => return Ok(false),
            Some(bound) => {
                return Err(GraphError::AttachmentOccupied {
                    resource: self.id.clone(),
                    slot: slot.to_string(),
                    bound: bound.clone(),
                });
            }
            None => {}
        }
        if let Some(other) = self.attachment_of(child) {
            return Err(GraphError::AlreadyAttached {
                resource: self.id.clone(),
                child: child.clone(),
                slot: other.slot.clone(),
            });
        }
        Ok(true)
    }

    pub(crate) fn bind(&mut self, slot: &str, child: ResourceId) -> Result<bool, GraphError> {
        if !self.check_bind(slot, &child)? {
            return Ok(false);
        }
        if let Some(attachment) = self.attachments.get_mut(slot) {
            attachment.resource = Some(child);
        }
        Ok(true)
    }

    /// Clears a slot, returning the resource that was bound to it.
    pub(crate) fn unbind(&mut self, slot: &str) -> Result<Option<ResourceId>, GraphError> {
        let attachment = self
            .attachments
            .get_mut(slot)
            .ok_or_else(|| GraphError::UnknownAttachment {
                resource: self.id.clone(),
                slot: slot.to_string(),
            })?;
        Ok(attachment.resource.take())
    }

    pub fn failures(&self) -> Vec<FailureId> {
        self.failures.lock().iter().copied().collect()
    }

    pub fn has_failure(&self, failure: FailureId) -> bool {
        self.failures.lock().contains(&failure)
    }

    /// Records a constraint failure against this resource.
    ///
    /// The failure id is drawn at random and retried until it does not clash
    /// with an outstanding failure of this resource; generation and
    /// registration happen under one lock.
    pub fn add_constraint_report(
        &self,
        constraints: Vec<String>,
        date: OffsetDateTime,
        request: OriginatingRequest,
    ) -> Result<ConstraintReport, KernelError> {
        let failure = {
            let mut failures = self.failures.lock();
            loop {
                let candidate = FailureId(random_u32()?);
                if failures.insert(candidate) {
                    break candidate;
                }
                tracing::debug!(resource = %self.id, failure = %candidate, "failure id clash, retrying");
            }
        };
        Ok(ConstraintReport::new(
            self.id.clone(),
            failure,
            date,
            request,
            constraints,
        ))
    }

    /// Clears an outstanding failure. Returns whether it was outstanding.
    pub fn remove_failure(&self, failure: FailureId) -> bool {
        self.failures.lock().remove(&failure)
    }
}

fn random_u32() -> Result<u32, KernelError> {
    let mut buf = [0_u8; 4];
    getrandom::getrandom(&mut buf)
        .map_err(|err| KernelError::IllegalState(format!("entropy source unavailable: {err}")))?;
    Ok(u32::from_be_bytes(buf))
}

impl Clone for Resource {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            parent: self.parent.clone(),
            indirect_id: self.indirect_id.clone(),
            attachments: self.attachments.clone(),
            failures: Mutex::new(self.failures.lock().clone()),
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("indirect_id", &self.indirect_id)
            .field("attachments", &self.attachments)
            .field("failures", &*self.failures.lock())
            .finish()
    }
}
