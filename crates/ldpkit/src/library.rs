use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use url::Url;

use crate::error::{GraphError, KernelError};
use crate::handler::{Capability, HandlerCatalog, HandlerClass, HandlerId};
use crate::template::{
    AttachedTemplate, ContainerTemplate, DirectContainerTemplate, IndirectContainerTemplate,
    MemberSettings, Membership, ResourceTemplate, Template, TemplateCore, TemplateId, TemplateKind,
};

/// Read-only registry of resolved templates.
///
/// Every template reachable from the library has its member and attachment
/// references resolved to templates of the same library.
#[derive(Clone, Debug, Default)]
pub struct TemplateLibrary {
    by_id: BTreeMap<TemplateId, Template>,
    by_handler: BTreeMap<HandlerId, TemplateId>,
}

impl TemplateLibrary {
    /// Builds a library from the catalog, starting from `roots` and pulling in
    /// every handler type they reference.
    pub fn load<'a>(
        catalog: &HandlerCatalog,
        roots: impl IntoIterator<Item = &'a HandlerId>,
    ) -> Result<Self, KernelError> {
        TemplateLibraryLoader::new(catalog).load(roots)
    }

    pub fn find_by_handler(&self, handler: &HandlerId) -> Option<TemplateRef<'_>> {
        self.by_handler
            .get(handler)
            .and_then(|id| self.find_by_id(id))
    }

    pub fn find_by_id(&self, id: &TemplateId) -> Option<TemplateRef<'_>> {
        self.by_id.get(id).map(|template| TemplateRef {
            template,
            library: self,
        })
    }

    /// Looks a template up and checks it can serve as `expected`.
    pub fn find_as(
        &self,
        id: &TemplateId,
        expected: TemplateKind,
    ) -> Result<TemplateRef<'_>, GraphError> {
        let found = self
            .find_by_id(id)
            .ok_or_else(|| GraphError::UnknownTemplate(id.clone()))?;
        if !expected.accepts(found.kind()) {
            return Err(GraphError::TemplateMismatch {
                template: id.clone(),
                expected,
                found: found.kind(),
            });
        }
        Ok(found)
    }

    pub fn contains(&self, id: &TemplateId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn contains_handler(&self, handler: &HandlerId) -> bool {
        self.by_handler.contains_key(handler)
    }

    pub fn handlers(&self) -> impl Iterator<Item = &HandlerId> {
        self.by_handler.keys()
    }

    pub fn templates(&self) -> impl Iterator<Item = TemplateRef<'_>> {
        self.by_id.values().map(|template| TemplateRef {
            template,
            library: self,
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Borrowed view of a template that can follow references inside its library.
#[derive(Clone, Copy, Debug)]
pub struct TemplateRef<'a> {
    template: &'a Template,
    library: &'a TemplateLibrary,
}

impl<'a> TemplateRef<'a> {
    pub fn template(&self) -> &'a Template {
        self.template
    }

    /// Resolved member template of a container template.
    pub fn member_template(&self) -> Option<TemplateRef<'a>> {
        self.template
            .member_template()
            .and_then(|id| self.library.find_by_id(id))
    }

    /// Resolved template bound to attachment slot `id`.
    pub fn attached_template(&self, id: &str) -> Option<TemplateRef<'a>> {
        self.template
            .attachment(id)
            .and_then(|attached| self.library.find_by_id(&attached.template))
    }
}

impl Deref for TemplateRef<'_> {
    type Target = Template;

    fn deref(&self) -> &Template {
        self.template
    }
}

/// Template under construction, before handler references are resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
struct TemplateDraft {
    kind: TemplateKind,
    id: TemplateId,
    handler: HandlerId,
    name: Option<String>,
    description: Option<String>,
    attachments: Vec<DraftAttachment>,
    member_handler: Option<HandlerId>,
    member_path: Option<String>,
    membership: Option<Membership>,
    inserted_content_relation: Option<Url>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct DraftAttachment {
    id: String,
    path: String,
    handler: HandlerId,
    predicate: Option<Url>,
}

/// Two-pass builder for [`TemplateLibrary`].
///
/// Pass one turns handler types into drafts and registers them by handler and
/// template id. Pass two resolves handler references to templates, pulling in
/// referenced handler types from the catalog as they are discovered.
pub struct TemplateLibraryLoader<'c> {
    catalog: &'c HandlerCatalog,
    drafts: BTreeMap<HandlerId, TemplateDraft>,
    ids: BTreeMap<TemplateId, HandlerId>,
    resolved: BTreeMap<HandlerId, Template>,
}

impl<'c> TemplateLibraryLoader<'c> {
    pub fn new(catalog: &'c HandlerCatalog) -> Self {
        Self {
            catalog,
            drafts: BTreeMap::new(),
            ids: BTreeMap::new(),
            resolved: BTreeMap::new(),
        }
    }

    pub fn load<'a>(
        mut self,
        roots: impl IntoIterator<Item = &'a HandlerId>,
    ) -> Result<TemplateLibrary, KernelError> {
        for handler in roots {
            self.ensure_registered(handler)?;
        }

        let mut pending: Vec<HandlerId> = self.drafts.keys().cloned().collect();
        while let Some(handler) = pending.pop() {
            if self.resolved.contains_key(&handler) {
                continue;
            }
            let template = self.post_process(&handler, &mut pending)?;
            self.resolved.insert(handler, template);
        }

        let mut library = TemplateLibrary::default();
        for (handler, template) in self.resolved {
            library
                .by_handler
                .insert(handler, template.id().clone());
            library.by_id.insert(template.id().clone(), template);
        }
        tracing::debug!(templates = library.len(), "template library loaded");
        Ok(library)
    }

    /// Registers the handler type if it has not been seen yet.
    fn ensure_registered(&mut self, handler: &HandlerId) -> Result<(), KernelError> {
        if self.drafts.contains_key(handler) {
            return Ok(());
        }
        let class = self.catalog.get(handler).ok_or_else(|| {
            KernelError::TemplateCreation(format!("unknown handler type {handler}"))
        })?;
        let draft = pre_process(class)?;
        self.register(draft)
    }

    fn register(&mut self, draft: TemplateDraft) -> Result<(), KernelError> {
        if let Some(owner) = self.ids.get(&draft.id) {
            return Err(KernelError::TemplateCreation(format!(
                "template id {} is used by both {} and {}",
                draft.id, owner, draft.handler
            )));
        }
        tracing::debug!(handler = %draft.handler, template = %draft.id, kind = %draft.kind, "registered template");
        self.ids.insert(draft.id.clone(), draft.handler.clone());
        self.drafts.insert(draft.handler.clone(), draft);
        Ok(())
    }

    fn post_process(
        &mut self,
        handler: &HandlerId,
        pending: &mut Vec<HandlerId>,
    ) -> Result<Template, KernelError> {
        let draft = self
            .drafts
            .get(handler)
            .cloned()
            .ok_or_else(|| KernelError::TemplateCreation(format!("unknown handler type {handler}")))?;

        let mut attachments = Vec::with_capacity(draft.attachments.len());
        for attachment in &draft.attachments {
            let template = self.resolve_reference(&attachment.handler, pending).map_err(|err| {
                err.context(format!(
                    "attachment {} of template {}",
                    attachment.id, draft.id
                ))
            })?;
            attachments.push(AttachedTemplate {
                id: attachment.id.clone(),
                path: attachment.path.clone(),
                template,
                predicate: attachment.predicate.clone(),
            });
        }

        let core = TemplateCore {
            id: draft.id.clone(),
            handler: draft.handler.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            attachments,
        };

        if draft.kind == TemplateKind::Resource {
            return Ok(Template::Resource(ResourceTemplate { core }));
        }

        let member_handler = draft.member_handler.as_ref().ok_or_else(|| {
            KernelError::TemplateCreation(format!(
                "container template {} does not declare a member handler",
                draft.id
            ))
        })?;
        let member_template = self
            .resolve_reference(member_handler, pending)
            .map_err(|err| err.context(format!("member handler of template {}", draft.id)))?;
        let members = MemberSettings {
            template: member_template,
            path: draft.member_path.clone(),
        };

        let template = match draft.kind {
            TemplateKind::Resource => Template::Resource(ResourceTemplate { core }),
            TemplateKind::Container => Template::Container(ContainerTemplate { core, members }),
            TemplateKind::BasicContainer => {
                Template::BasicContainer(ContainerTemplate { core, members })
            }
            TemplateKind::DirectContainer => Template::DirectContainer(DirectContainerTemplate {
                core,
                members,
                membership: required(draft.membership, &draft.id, "membership predicate")?,
            }),
            TemplateKind::IndirectContainer => {
                Template::IndirectContainer(IndirectContainerTemplate {
                    core,
                    members,
                    membership: required(draft.membership, &draft.id, "membership predicate")?,
                    inserted_content_relation: required(
                        draft.inserted_content_relation,
                        &draft.id,
                        "inserted content relation",
                    )?,
                })
            }
        };
        Ok(template)
    }

    /// Maps a referenced handler type to its template id, registering the
    /// handler type on first sight and queueing it for resolution.
    fn resolve_reference(
        &mut self,
        handler: &HandlerId,
        pending: &mut Vec<HandlerId>,
    ) -> Result<TemplateId, KernelError> {
        if !self.drafts.contains_key(handler) {
            self.ensure_registered(handler)?;
            pending.push(handler.clone());
        }
        self.drafts
            .get(handler)
            .map(|draft| draft.id.clone())
            .ok_or_else(|| KernelError::TemplateCreation(format!("unresolved handler {handler}")))
    }
}

fn required<T>(value: Option<T>, template: &TemplateId, what: &str) -> Result<T, KernelError> {
    value.ok_or_else(|| {
        KernelError::TemplateCreation(format!("template {template} has no {what}"))
    })
}

/// Validates marker cardinality and option values of a handler type.
fn pre_process(class: &HandlerClass) -> Result<TemplateDraft, KernelError> {
    let kind = match class.markers.as_slice() {
        [kind] => *kind,
        [] => {
            return Err(KernelError::TemplateCreation(format!(
                "handler {} carries no template marker",
                class.id
            )));
        }
        many => {
            let names: Vec<_> = many.iter().map(|kind| kind.as_str()).collect();
            return Err(KernelError::TemplateCreation(format!(
                "handler {} carries several template markers: {}",
                class.id,
                names.join(", ")
            )));
        }
    };
    if kind.is_container() && !class.capabilities.contains(Capability::Container) {
        return Err(KernelError::TemplateCreation(format!(
            "handler {} is marked {} but is not a container handler",
            class.id, kind
        )));
    }

    let options = &class.options;
    let id = options.id.trim();
    if id.is_empty() {
        return Err(KernelError::TemplateCreation(format!(
            "handler {} declares an empty template id",
            class.id
        )));
    }

    let mut seen_ids = BTreeSet::new();
    let mut seen_paths = BTreeSet::new();
    let mut attachments = Vec::with_capacity(options.attachments.len());
    for attachment in &options.attachments {
        if attachment.id.trim().is_empty() || attachment.path.trim().is_empty() {
            return Err(KernelError::TemplateCreation(format!(
                "template {id} declares an attachment with an empty id or path"
            )));
        }
        if !seen_ids.insert(attachment.id.as_str()) {
            return Err(KernelError::TemplateCreation(format!(
                "template {id} declares attachment id {} twice",
                attachment.id
            )));
        }
        if !seen_paths.insert(attachment.path.as_str()) {
            return Err(KernelError::TemplateCreation(format!(
                "template {id} declares attachment path {} twice",
                attachment.path
            )));
        }
        let predicate = attachment
            .predicate
            .as_deref()
            .map(|raw| parse_uri(raw, "attachment predicate", id))
            .transpose()?;
        attachments.push(DraftAttachment {
            id: attachment.id.clone(),
            path: attachment.path.clone(),
            handler: HandlerId::new(attachment.handler.clone()),
            predicate,
        });
    }

    let mut draft = TemplateDraft {
        kind,
        id: TemplateId::new(id),
        handler: class.id.clone(),
        name: options.name.clone(),
        description: options.description.clone(),
        attachments,
        member_handler: None,
        member_path: None,
        membership: None,
        inserted_content_relation: None,
    };

    if kind.is_container() {
        draft.member_handler = options.member_handler.clone().map(HandlerId::new);
        draft.member_path = options.member_path.clone();
    }
    if kind.is_membership_aware() {
        let raw = options.membership_predicate.as_deref().unwrap_or_default();
        draft.membership = Some(Membership {
            predicate: parse_uri(raw, "membership predicate", id)?,
            relation: options.membership_relation.unwrap_or_default(),
        });
    }
    if kind == TemplateKind::IndirectContainer {
        let raw = options
            .inserted_content_relation
            .as_deref()
            .unwrap_or_default();
        draft.inserted_content_relation =
            Some(parse_uri(raw, "inserted content relation", id)?);
    }
    Ok(draft)
}

/// Accepts only absolute, hierarchical URIs.
fn parse_uri(raw: &str, field: &str, template: &str) -> Result<Url, KernelError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(KernelError::TemplateCreation(format!(
            "{field} of template {template} must not be empty"
        )));
    }
    let url = Url::parse(trimmed).map_err(|err| {
        KernelError::TemplateCreation(format!(
            "{field} of template {template} is not an absolute URI ({trimmed}): {err}"
        ))
    })?;
    if url.cannot_be_a_base() {
        return Err(KernelError::TemplateCreation(format!(
            "{field} of template {template} is an opaque URI ({trimmed})"
        )));
    }
    Ok(url)
}
