use std::sync::Arc;

use time::OffsetDateTime;
use url::Url;

use crate::constraint::{ConstraintReport, ConstraintReportId, OriginatingRequest};
use crate::container::{Container, Member, Slug};
use crate::error::{GraphError, KernelError};
use crate::key::{Name, ResourceId, ResourceKey};
use crate::library::{TemplateLibrary, TemplateRef};
use crate::resource::Resource;
use crate::store::StoreState;
use crate::template::{Template, TemplateId, TemplateKind};
use crate::transaction::Transaction;

/// A stored graph node: either a plain resource or a container.
#[derive(Clone, Debug)]
pub enum Entity {
    Resource(Resource),
    Container(Container),
}

impl Entity {
    fn instantiate(template: &Template, id: ResourceId, parent: Option<ResourceId>) -> Self {
        match template {
            Template::Resource(_) => Entity::Resource(Resource::new(id, parent, template)),
            Template::Container(_)
            | Template::BasicContainer(_)
            | Template::DirectContainer(_)
            | Template::IndirectContainer(_) => {
                Entity::Container(Container::new(id, parent, template))
            }
        }
    }

    pub fn id(&self) -> &ResourceId {
        self.resource().id()
    }

    pub fn resource(&self) -> &Resource {
        match self {
            Entity::Resource(resource) => resource,
            Entity::Container(container) => container.resource(),
        }
    }

    pub fn resource_mut(&mut self) -> &mut Resource {
        match self {
            Entity::Resource(resource) => resource,
            Entity::Container(container) => container.resource_mut(),
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Entity::Container(container) => Some(container),
            Entity::Resource(_) => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut Container> {
        match self {
            Entity::Container(container) => Some(container),
            Entity::Resource(_) => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Entity::Container(_))
    }
}

/// Operations on the persistent resource graph.
///
/// Every operation runs against an active [`Transaction`]. Operations check
/// everything they need before changing anything, so a failed call leaves the
/// transaction's view of the graph untouched.
#[derive(Clone, Debug)]
pub struct ResourceGraph {
    library: Arc<TemplateLibrary>,
}

impl ResourceGraph {
    pub fn new(library: Arc<TemplateLibrary>) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    /// Creates a root resource of `template` named `name`.
    pub fn create_resource<'t>(
        &self,
        tx: &'t mut Transaction,
        template: &TemplateId,
        name: impl Into<Name>,
    ) -> Result<&'t Entity, KernelError> {
        let template = self
            .library
            .find_by_id(template)
            .ok_or_else(|| GraphError::UnknownTemplate(template.clone()))?;
        let id = ResourceId::new(name, template.id().clone());
        let key = ResourceKey::encode(&id)?;
        let state = tx.store_state_mut()?;
        if state.resources.contains_key(&key) {
            return Err(GraphError::ResourceExists(id).into());
        }
        tracing::debug!(resource = %id, kind = %template.kind(), "resource created");
        let entity = Entity::instantiate(template.template(), id, None);
        Ok(state.resources.entry(key).or_insert(entity))
    }

    pub fn find<'t>(
        &self,
        tx: &'t Transaction,
        id: &ResourceId,
    ) -> Result<Option<&'t Entity>, KernelError> {
        let key = ResourceKey::encode(id)?;
        Ok(tx.store_state()?.resources.get(&key))
    }

    pub fn find_container<'t>(
        &self,
        tx: &'t Transaction,
        id: &ResourceId,
    ) -> Result<Option<&'t Container>, KernelError> {
        Ok(self.find(tx, id)?.and_then(Entity::as_container))
    }

    /// Binds `child` to `slot` of `resource`, materializing the child under
    /// the resource if it does not exist yet.
    ///
    /// The child must use the template the slot declares, and that template
    /// must be usable as `expected`. Returns `false` if the slot already held
    /// exactly this child.
    pub fn attach(
        &self,
        tx: &mut Transaction,
        resource: &ResourceId,
        slot: &str,
        child: &ResourceId,
        expected: TemplateKind,
    ) -> Result<bool, KernelError> {
        let parent_key = ResourceKey::encode(resource)?;
        let child_key = ResourceKey::encode(child)?;
        let state = tx.store_state_mut()?;

        let parent = state
            .resources
            .get(&parent_key)
            .ok_or_else(|| GraphError::UnknownResource(resource.clone()))?;
        let template = self.template_of(resource)?;
        let attached = template
            .attachment(slot)
            .ok_or_else(|| GraphError::UnknownAttachment {
                resource: resource.clone(),
                slot: slot.to_string(),
            })?;
        if attached.template() != &child.template_id {
            return Err(GraphError::IncompatibleAttachment {
                child: child.clone(),
                slot: slot.to_string(),
                reason: format!("slot expects template {}", attached.template()),
            }
            .into());
        }
        let child_template = self.library.find_as(&child.template_id, expected)?;
        if !parent.resource().check_bind(slot, child)? {
            return Ok(false);
        }
        let existing = Self::check_child(state, &child_key, child, resource)?;

        if !existing {
            let entity = Entity::instantiate(
                child_template.template(),
                child.clone(),
                Some(resource.clone()),
            );
            state.resources.insert(child_key, entity);
        }
        if let Some(parent) = state.resources.get_mut(&parent_key) {
            parent.resource_mut().bind(slot, child.clone())?;
        }
        tracing::debug!(resource = %resource, slot, child = %child, "attached");
        Ok(true)
    }

    /// Clears `slot` of `resource`. Returns whether a binding was removed.
    pub fn detach(
        &self,
        tx: &mut Transaction,
        resource: &ResourceId,
        slot: &str,
    ) -> Result<bool, KernelError> {
        let key = ResourceKey::encode(resource)?;
        let entity = tx
            .store_state_mut()?
            .resources
            .get_mut(&key)
            .ok_or_else(|| GraphError::UnknownResource(resource.clone()))?;
        let removed = entity.resource_mut().unbind(slot)?;
        if let Some(child) = &removed {
            tracing::debug!(resource = %resource, slot, child = %child, "detached");
        }
        Ok(removed.is_some())
    }

    /// Adds a member named `name` to `container`, creating it with the
    /// container's member template.
    pub fn add_member(
        &self,
        tx: &mut Transaction,
        container: &ResourceId,
        name: impl Into<Name>,
    ) -> Result<Member, KernelError> {
        let container_key = ResourceKey::encode(container)?;
        let template = self.template_of(container)?;
        let member_template = template
            .member_template()
            .ok_or_else(|| GraphError::NotAContainer(container.clone()))?;
        let member = ResourceId::new(name, member_template.id().clone());
        let member_key = ResourceKey::encode(&member)?;
        let state = tx.store_state_mut()?;

        let entity = state
            .resources
            .get(&container_key)
            .ok_or_else(|| GraphError::UnknownResource(container.clone()))?;
        entity
            .as_container()
            .ok_or_else(|| GraphError::NotAContainer(container.clone()))?
            .check_add_member(&member)?;
        let existing = Self::check_child(state, &member_key, &member, container)?;

        if !existing {
            let entity = Entity::instantiate(
                member_template.template(),
                member.clone(),
                Some(container.clone()),
            );
            state.resources.insert(member_key, entity);
        }
        let record = state
            .resources
            .get_mut(&container_key)
            .and_then(Entity::as_container_mut)
            .ok_or_else(|| GraphError::NotAContainer(container.clone()))?
            .add_member(member)?;
        Ok(record)
    }

    /// Drops the membership of `member`. The member resource itself stays in
    /// the graph until it is removed.
    pub fn remove_member(
        &self,
        tx: &mut Transaction,
        container: &ResourceId,
        member: &ResourceId,
    ) -> Result<bool, KernelError> {
        let key = ResourceKey::encode(container)?;
        let container_entity = tx
            .store_state_mut()?
            .resources
            .get_mut(&key)
            .ok_or_else(|| GraphError::UnknownResource(container.clone()))?
            .as_container_mut()
            .ok_or_else(|| GraphError::NotAContainer(container.clone()))?;
        let removed = container_entity.remove_member(member);
        if let Some(record) = &removed {
            tracing::debug!(container = %container, member = %member, number = record.number(), "member removed");
        }
        Ok(removed.is_some())
    }

    pub fn add_slug(
        &self,
        tx: &Transaction,
        container: &ResourceId,
        preferred_path: &str,
    ) -> Result<Arc<Slug>, KernelError> {
        let found = self
            .find(tx, container)?
            .ok_or_else(|| GraphError::UnknownResource(container.clone()))?
            .as_container()
            .ok_or_else(|| GraphError::NotAContainer(container.clone()))?;
        Ok(found.add_slug(preferred_path)?)
    }

    pub fn set_indirect_id(
        &self,
        tx: &mut Transaction,
        resource: &ResourceId,
        indirect_id: Option<Url>,
    ) -> Result<(), KernelError> {
        let key = ResourceKey::encode(resource)?;
        tx.store_state_mut()?
            .resources
            .get_mut(&key)
            .ok_or_else(|| GraphError::UnknownResource(resource.clone()))?
            .resource_mut()
            .set_indirect_id(indirect_id);
        Ok(())
    }

    /// Records a constraint failure against `resource` and stores its report.
    pub fn add_constraint_report(
        &self,
        tx: &mut Transaction,
        resource: &ResourceId,
        constraints: Vec<String>,
        date: OffsetDateTime,
        request: OriginatingRequest,
    ) -> Result<ConstraintReport, KernelError> {
        let key = ResourceKey::encode(resource)?;
        let state = tx.store_state_mut()?;
        let entity = state
            .resources
            .get(&key)
            .ok_or_else(|| GraphError::UnknownResource(resource.clone()))?;
        let report = entity
            .resource()
            .add_constraint_report(constraints, date, request)?;
        state.reports.insert(report.id().clone(), report.clone());
        tracing::debug!(report = %report.id(), "constraint report recorded");
        Ok(report)
    }

    pub fn find_constraint_report<'t>(
        &self,
        tx: &'t Transaction,
        id: &ConstraintReportId,
    ) -> Result<Option<&'t ConstraintReport>, KernelError> {
        Ok(tx.store_state()?.reports.get(id))
    }

    /// Clears the failure behind `id` and drops its report. Returns whether
    /// the failure was outstanding.
    pub fn remove_failure(
        &self,
        tx: &mut Transaction,
        id: &ConstraintReportId,
    ) -> Result<bool, KernelError> {
        let key = ResourceKey::encode(id.resource())?;
        let state = tx.store_state_mut()?;
        let entity = state
            .resources
            .get(&key)
            .ok_or_else(|| GraphError::UnknownResource(id.resource().clone()))?;
        let removed = entity.resource().remove_failure(id.failure());
        state.reports.remove(id);
        Ok(removed)
    }

    /// Deletes `id` and its outstanding constraint reports.
    ///
    /// Parents keep any attachment or membership pointing at the removed
    /// resource until it is detached explicitly.
    pub fn remove(&self, tx: &mut Transaction, id: &ResourceId) -> Result<bool, KernelError> {
        let key = ResourceKey::encode(id)?;
        let state = tx.store_state_mut()?;
        if state.resources.remove(&key).is_none() {
            return Ok(false);
        }
        state.reports.retain(|report, _| report.resource() != id);
        tracing::debug!(resource = %id, "resource removed");
        Ok(true)
    }

    fn template_of(&self, id: &ResourceId) -> Result<TemplateRef<'_>, GraphError> {
        self.library
            .find_by_id(&id.template_id)
            .ok_or_else(|| GraphError::UnknownTemplate(id.template_id.clone()))
    }

    /// Checks that `child` is either absent or already a child of `parent`.
    /// Returns whether the child entity exists.
    fn check_child(
        state: &StoreState,
        key: &ResourceKey,
        child: &ResourceId,
        parent: &ResourceId,
    ) -> Result<bool, GraphError> {
        match state.resources.get(key) {
            None => Ok(false),
            Some(entity) => match entity.resource().parent() {
                Some(current) if current == parent => Ok(true),
                Some(current) => Err(GraphError::ForeignParent {
                    resource: child.clone(),
                    parent: current.clone(),
                }),
                None => Err(GraphError::ResourceExists(child.clone())),
            },
        }
    }
}
