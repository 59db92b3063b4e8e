use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::GraphError;
use crate::key::ResourceId;
use crate::resource::Resource;
use crate::template::Template;

/// A container's reference to one of its member resources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    container: ResourceId,
    member: ResourceId,
    number: u64,
}

impl Member {
    pub fn container(&self) -> &ResourceId {
        &self.container
    }

    pub fn member(&self) -> &ResourceId {
        &self.member
    }

    /// Insertion number, stable for the lifetime of the member.
    pub fn number(&self) -> u64 {
        self.number
    }
}

/// Path allocation helper for the children of a container.
///
/// The version counter is guarded so that concurrent creations with the same
/// preferred path observe a consistent sequence.
pub struct Slug {
    container: ResourceId,
    preferred_path: String,
    version: Mutex<u64>,
}

impl Slug {
    pub fn new(container: ResourceId, preferred_path: impl Into<String>) -> Self {
        Self::with_version(container, preferred_path, 0)
    }

    pub fn with_version(
        container: ResourceId,
        preferred_path: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            container,
            preferred_path: preferred_path.into(),
            version: Mutex::new(version),
        }
    }

    pub fn container(&self) -> &ResourceId {
        &self.container
    }

    pub fn preferred_path(&self) -> &str {
        &self.preferred_path
    }

    pub fn version(&self) -> u64 {
        *self.version.lock()
    }

    /// Hands out the preferred path the first time and
    /// `preferred_path + "_" + version` afterwards, advancing every call.
    pub fn next_path(&self) -> String {
        let mut version = self.version.lock();
        let path = if *version == 0 {
            self.preferred_path.clone()
        } else {
            format!("{}_{}", self.preferred_path, *version)
        };
        *version += 1;
        path
    }
}

impl Clone for Slug {
    fn clone(&self) -> Self {
        Self::with_version(
            self.container.clone(),
            self.preferred_path.clone(),
            self.version(),
        )
    }
}

impl fmt::Debug for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slug")
            .field("container", &self.container)
            .field("preferred_path", &self.preferred_path)
            .field("version", &self.version())
            .finish()
    }
}

/// A resource that owns members and slugs.
pub struct Container {
    resource: Resource,
    members: BTreeMap<u64, Member>,
    index: BTreeMap<ResourceId, u64>,
    member_counter: u64,
    slugs: Mutex<BTreeMap<String, Arc<Slug>>>,
}

impl Container {
    pub(crate) fn new(id: ResourceId, parent: Option<ResourceId>, template: &Template) -> Self {
        Self {
            resource: Resource::new(id, parent, template),
            members: BTreeMap::new(),
            index: BTreeMap::new(),
            member_counter: 0,
            slugs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }

    pub fn id(&self) -> &ResourceId {
        self.resource.id()
    }

    /// Next number to be handed to a member. Never decreases.
    pub fn member_counter(&self) -> u64 {
        self.member_counter
    }

    pub fn has_member(&self, member: &ResourceId) -> bool {
        self.index.contains_key(member)
    }

    pub fn member(&self, member: &ResourceId) -> Option<&Member> {
        self.index
            .get(member)
            .and_then(|number| self.members.get(number))
    }

    pub fn member_by_number(&self, number: u64) -> Option<&Member> {
        self.members.get(&number)
    }

    /// Members in insertion order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn check_add_member(&self, member: &ResourceId) -> Result<(), GraphError> {
        if self.has_member(member) {
            return Err(GraphError::AlreadyMember {
                container: self.id().clone(),
                member: member.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn add_member(&mut self, member: ResourceId) -> Result<Member, GraphError> {
        self.check_add_member(&member)?;
        let number = self.member_counter;
        self.member_counter += 1;
        let record = Member {
            container: self.id().clone(),
            member: member.clone(),
            number,
        };
        self.index.insert(member, number);
        self.members.insert(number, record.clone());
        tracing::debug!(container = %self.id(), member = %record.member, number, "member added");
        Ok(record)
    }

    pub(crate) fn remove_member(&mut self, member: &ResourceId) -> Option<Member> {
        let number = self.index.remove(member)?;
        self.members.remove(&number)
    }

    pub fn find_slug(&self, preferred_path: &str) -> Option<Arc<Slug>> {
        self.slugs.lock().get(preferred_path).cloned()
    }

    pub fn slugs(&self) -> Vec<Arc<Slug>> {
        self.slugs.lock().values().cloned().collect()
    }

    /// Returns the slug for `preferred_path`, creating it at version zero.
    pub fn add_slug(&self, preferred_path: &str) -> Result<Arc<Slug>, GraphError> {
        let path = normalize_path(preferred_path)?;
        Ok(self.merge_slug(Slug::new(self.id().clone(), path)))
    }

    /// Reconciles a candidate slug with the slugs already known.
    ///
    /// An existing slug with a lower version adopts the candidate's version,
    /// one with the same version is reused as is, and one with a higher version
    /// is a collision: the candidate moves on to `path_1`, `path_2`, ... until
    /// a free or reconcilable slot is found.
    pub fn merge_slug(&self, candidate: Slug) -> Arc<Slug> {
        let wanted = candidate.version();
        let base = candidate.preferred_path;
        let mut slugs = self.slugs.lock();
        let mut path = base.clone();
        let mut attempt = 0_u64;
        loop {
            match slugs.get(&path) {
                None => {
                    let slug = Arc::new(Slug::with_version(self.id().clone(), path.clone(), wanted));
                    slugs.insert(path, Arc::clone(&slug));
                    return slug;
                }
                Some(existing) => {
                    let mut version = existing.version.lock();
                    if *version <= wanted {
                        *version = wanted;
                        return Arc::clone(existing);
                    }
                }
            }
            attempt += 1;
            tracing::debug!(container = %self.id(), path = %path, attempt, "slug collision");
            path = format!("{base}_{attempt}");
        }
    }
}

/// NFC-normalizes a preferred path and checks it is a single path segment.
fn normalize_path(raw: &str) -> Result<String, GraphError> {
    static SEGMENT_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = SEGMENT_REGEX.get_or_init(|| Regex::new(r"^[^/?#\s]+$").expect("Invalid regex"));

    let normalized: String = raw.trim().nfc().collect();
    if normalized == "." || normalized == ".." || !re.is_match(&normalized) {
        return Err(GraphError::InvalidPath(raw.to_string()));
    }
    Ok(normalized)
}

impl Clone for Container {
    fn clone(&self) -> Self {
        let slugs = self
            .slugs
            .lock()
            .iter()
            .map(|(path, slug)| (path.clone(), Arc::new(Slug::clone(slug))))
            .collect();
        Self {
            resource: self.resource.clone(),
            members: self.members.clone(),
            index: self.index.clone(),
            member_counter: self.member_counter,
            slugs: Mutex::new(slugs),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("resource", &self.resource)
            .field("members", &self.members)
            .field("member_counter", &self.member_counter)
            .field("slugs", &*self.slugs.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::handler::{HandlerCatalog, HandlerClass, HandlerId, TemplateOptions};
    use crate::library::TemplateLibrary;
    use crate::template::{TemplateId, TemplateKind};

    fn container() -> Container {
        let mut catalog = HandlerCatalog::new();
        catalog
            .register(HandlerClass::new(
                "Reports",
                TemplateKind::BasicContainer,
                TemplateOptions {
                    id: "reports".into(),
                    member_handler: Some("Reports".into()),
                    ..Default::default()
                },
            ))
            .unwrap();
        let library = TemplateLibrary::load(&catalog, [&HandlerId::new("Reports")]).unwrap();
        let template = library.find_by_id(&TemplateId::new("reports")).unwrap();
        Container::new(ResourceId::new("root", "reports"), None, template.template())
    }

    fn member(name: &str) -> ResourceId {
        ResourceId::new(name, "reports")
    }

    #[test]
    fn member_numbers_are_never_reused() {
        let mut container = container();
        assert_eq!(container.add_member(member("m1")).unwrap().number(), 0);
        assert_eq!(container.add_member(member("m2")).unwrap().number(), 1);
        assert!(container.remove_member(&member("m1")).is_some());
        assert_eq!(container.add_member(member("m3")).unwrap().number(), 2);

        let order: Vec<_> = container.members().map(Member::number).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(container.member_counter(), 3);
    }

    #[test]
    fn duplicate_members_are_rejected_without_side_effects() {
        let mut container = container();
        container.add_member(member("m1")).unwrap();
        let err = container.add_member(member("m1")).unwrap_err();
        assert!(matches!(err, GraphError::AlreadyMember { .. }));
        assert_eq!(container.member_counter(), 1);
    }

    #[test]
    fn next_path_progresses() {
        let slug = Slug::new(member("root"), "report");
        let paths: Vec<_> = (0..4).map(|_| slug.next_path()).collect();
        assert_eq!(paths, vec!["report", "report_1", "report_2", "report_3"]);
        assert_eq!(slug.version(), 4);
    }

    #[test]
    fn concurrent_add_slug_yields_one_slug() {
        let container = container();
        let slugs: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| container.add_slug("report").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(Arc::ptr_eq(&slugs[0], &slugs[1]));
        assert_eq!(slugs[0].preferred_path(), "report");
        assert_eq!(container.slugs().len(), 1);
    }

    #[test]
    fn advanced_slug_collides_onto_suffixed_path() {
        let container = container();
        let first = container.add_slug("report").unwrap();
        assert_eq!(first.next_path(), "report");

        let second = container.add_slug("report").unwrap();
        assert_eq!(second.preferred_path(), "report_1");
        assert_eq!(second.version(), 0);
        assert_eq!(container.slugs().len(), 2);
    }

    #[test]
    fn collisions_walk_past_every_advanced_suffix() {
        let container = container();
        container.add_slug("report").unwrap().next_path();
        container.add_slug("report").unwrap().next_path();

        let third = container.add_slug("report").unwrap();
        assert_eq!(third.preferred_path(), "report_2");
        assert_eq!(third.next_path(), "report_2");

        let found = container.find_slug("report_2").unwrap();
        assert!(Arc::ptr_eq(&found, &third));
        assert_eq!(container.find_slug("report_1").unwrap().version(), 1);
        assert!(container.find_slug("report_3").is_none());
        assert_eq!(container.slugs().len(), 3);
    }

    #[test]
    fn merge_adopts_higher_candidate_version() {
        let container = container();
        let existing = container.add_slug("report").unwrap();
        let merged = container.merge_slug(Slug::with_version(member("root"), "report", 3));
        assert!(Arc::ptr_eq(&existing, &merged));
        assert_eq!(existing.version(), 3);
        assert_eq!(existing.next_path(), "report_3");
    }

    #[test]
    fn concurrent_next_path_hands_out_distinct_paths() {
        let slug = Slug::new(member("root"), "doc");
        let mut paths: Vec<String> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| (0..25).map(|_| slug.next_path()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 100);
    }

    #[test]
    fn preferred_paths_are_normalized_and_validated() {
        let container = container();
        let decomposed = "cafe\u{301}";
        let slug = container.add_slug(decomposed).unwrap();
        assert_eq!(slug.preferred_path(), "caf\u{e9}");

        for bad in ["", "a/b", "..", "with space"] {
            assert!(matches!(container.add_slug(bad), Err(GraphError::InvalidPath(_))), "{bad}");
        }
    }
}
