use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::handler::HandlerId;

/// Identifier of a template, unique within a library.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TemplateId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Closed set of template variants.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    Resource,
    Container,
    BasicContainer,
    DirectContainer,
    IndirectContainer,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKind::Resource => "resource",
            TemplateKind::Container => "container",
            TemplateKind::BasicContainer => "basic-container",
            TemplateKind::DirectContainer => "direct-container",
            TemplateKind::IndirectContainer => "indirect-container",
        }
    }

    pub fn is_container(self) -> bool {
        !matches!(self, TemplateKind::Resource)
    }

    pub fn is_membership_aware(self) -> bool {
        matches!(
            self,
            TemplateKind::DirectContainer | TemplateKind::IndirectContainer
        )
    }

    /// Whether a template of kind `found` may be used where `self` is expected.
    ///
    /// `Resource` accepts every template and `Container` every container
    /// template; the concrete container kinds only accept themselves.
    pub fn accepts(self, found: TemplateKind) -> bool {
        match self {
            TemplateKind::Resource => true,
            TemplateKind::Container => found.is_container(),
            TemplateKind::BasicContainer
            | TemplateKind::DirectContainer
            | TemplateKind::IndirectContainer => self == found,
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the membership triples maintained by a container.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipRelation {
    #[default]
    HasMember,
    IsMemberOf,
}

impl fmt::Display for MembershipRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipRelation::HasMember => f.write_str("has-member"),
            MembershipRelation::IsMemberOf => f.write_str("is-member-of"),
        }
    }
}

/// Named binding slot declared by a template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttachedTemplate {
    pub(crate) id: String,
    pub(crate) path: String,
    pub(crate) template: TemplateId,
    pub(crate) predicate: Option<Url>,
}

impl AttachedTemplate {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn template(&self) -> &TemplateId {
        &self.template
    }

    pub fn predicate(&self) -> Option<&Url> {
        self.predicate.as_ref()
    }
}

/// Membership triple configuration of direct and indirect containers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Membership {
    pub(crate) predicate: Url,
    pub(crate) relation: MembershipRelation,
}

impl Membership {
    pub fn predicate(&self) -> &Url {
        &self.predicate
    }

    pub fn relation(&self) -> MembershipRelation {
        self.relation
    }
}

/// Fields shared by every template variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateCore {
    pub(crate) id: TemplateId,
    pub(crate) handler: HandlerId,
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) attachments: Vec<AttachedTemplate>,
}

/// Member configuration shared by every container variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberSettings {
    pub(crate) template: TemplateId,
    pub(crate) path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceTemplate {
    pub(crate) core: TemplateCore,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerTemplate {
    pub(crate) core: TemplateCore,
    pub(crate) members: MemberSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirectContainerTemplate {
    pub(crate) core: TemplateCore,
    pub(crate) members: MemberSettings,
    pub(crate) membership: Membership,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndirectContainerTemplate {
    pub(crate) core: TemplateCore,
    pub(crate) members: MemberSettings,
    pub(crate) membership: Membership,
    pub(crate) inserted_content_relation: Url,
}

/// Immutable schema describing a resource kind.
///
/// Templates are produced by the library loader once every reference has been
/// resolved; there is no way to mutate one afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Template {
    Resource(ResourceTemplate),
    Container(ContainerTemplate),
    BasicContainer(ContainerTemplate),
    DirectContainer(DirectContainerTemplate),
    IndirectContainer(IndirectContainerTemplate),
}

impl Template {
    pub fn kind(&self) -> TemplateKind {
        match self {
            Template::Resource(_) => TemplateKind::Resource,
            Template::Container(_) => TemplateKind::Container,
            Template::BasicContainer(_) => TemplateKind::BasicContainer,
            Template::DirectContainer(_) => TemplateKind::DirectContainer,
            Template::IndirectContainer(_) => TemplateKind::IndirectContainer,
        }
    }

    fn core(&self) -> &TemplateCore {
        match self {
            Template::Resource(t) => &t.core,
            Template::Container(t) | Template::BasicContainer(t) => &t.core,
            Template::DirectContainer(t) => &t.core,
            Template::IndirectContainer(t) => &t.core,
        }
    }

    pub fn id(&self) -> &TemplateId {
        &self.core().id
    }

    pub fn handler(&self) -> &HandlerId {
        &self.core().handler
    }

    pub fn name(&self) -> Option<&str> {
        self.core().name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.core().description.as_deref()
    }

    pub fn attachments(&self) -> &[AttachedTemplate] {
        &self.core().attachments
    }

    pub fn attachment(&self, id: &str) -> Option<&AttachedTemplate> {
        self.attachments().iter().find(|attached| attached.id == id)
    }

    pub fn is_container(&self) -> bool {
        self.kind().is_container()
    }

    fn members(&self) -> Option<&MemberSettings> {
        match self {
            Template::Resource(_) => None,
            Template::Container(t) | Template::BasicContainer(t) => Some(&t.members),
            Template::DirectContainer(t) => Some(&t.members),
            Template::IndirectContainer(t) => Some(&t.members),
        }
    }

    pub fn member_template(&self) -> Option<&TemplateId> {
        self.members().map(|members| &members.template)
    }

    pub fn member_path(&self) -> Option<&str> {
        self.members().and_then(|members| members.path.as_deref())
    }

    /// Membership configuration, present only for membership-aware containers.
    pub fn membership(&self) -> Option<&Membership> {
        match self {
            Template::DirectContainer(t) => Some(&t.membership),
            Template::IndirectContainer(t) => Some(&t.membership),
            Template::Resource(_) | Template::Container(_) | Template::BasicContainer(_) => None,
        }
    }

    pub fn inserted_content_relation(&self) -> Option<&Url> {
        match self {
            Template::IndirectContainer(t) => Some(&t.inserted_content_relation),
            _ => None,
        }
    }
}
