use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::{EndpointError, KernelError};
use crate::key::{ResourceId, ResourceKey};
use crate::transaction::Transaction;

/// HTTP-style entity tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityTag {
    value: String,
    weak: bool,
}

impl EntityTag {
    pub fn strong(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            weak: false,
        }
    }

    pub fn weak(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            weak: true,
        }
    }

    /// Strong tag derived from the bytes of a representation.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self::strong(hex::encode(hasher.finalize()))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.value)
        } else {
            write!(f, "\"{}\"", self.value)
        }
    }
}

/// Stable binding of a path to a resource identity.
///
/// Once deleted, an endpoint is a tombstone: it keeps its path but no longer
/// refers to a resource and can no longer change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    path: String,
    resource: Option<ResourceId>,
    created: OffsetDateTime,
    deleted: Option<OffsetDateTime>,
    entity_tag: EntityTag,
    last_modified: OffsetDateTime,
}

impl Endpoint {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resource(&self) -> Option<&ResourceId> {
        self.resource.as_ref()
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn deleted(&self) -> Option<OffsetDateTime> {
        self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn entity_tag(&self) -> &EntityTag {
        &self.entity_tag
    }

    pub fn last_modified(&self) -> OffsetDateTime {
        self.last_modified
    }

    fn ensure_live(&self) -> Result<(), EndpointError> {
        if self.is_deleted() {
            return Err(EndpointError::Deleted(self.path.clone()));
        }
        Ok(())
    }
}

/// Endpoint rows held by a store, indexed by path and by live resource.
#[derive(Clone, Debug, Default)]
pub struct EndpointTable {
    by_path: BTreeMap<String, Endpoint>,
    live: BTreeMap<ResourceKey, String>,
}

impl EndpointTable {
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.by_path.values()
    }
}

/// Publishes resource identities at paths.
///
/// At most one live endpoint may point at a given resource; publishing a
/// resource twice is rejected rather than left to callers.
#[derive(Clone, Copy, Debug, Default)]
pub struct EndpointDirectory;

impl EndpointDirectory {
    pub fn new() -> Self {
        Self
    }

    pub fn create(
        &self,
        tx: &mut Transaction,
        path: &str,
        resource: &ResourceId,
        created: OffsetDateTime,
        entity_tag: EntityTag,
    ) -> Result<Endpoint, KernelError> {
        if path.trim().is_empty() {
            return Err(EndpointError::InvalidPath(path.to_string()).into());
        }
        let key = ResourceKey::encode(resource)?;
        let table = &mut tx.store_state_mut()?.endpoints;
        if table.by_path.contains_key(path) {
            return Err(EndpointError::DuplicatePath(path.to_string()).into());
        }
        if let Some(existing) = table.live.get(&key) {
            return Err(EndpointError::AlreadyPublished {
                resource: resource.clone(),
                path: existing.clone(),
            }
            .into());
        }
        let endpoint = Endpoint {
            path: path.to_string(),
            resource: Some(resource.clone()),
            created,
            deleted: None,
            entity_tag,
            last_modified: created,
        };
        table.live.insert(key, path.to_string());
        table.by_path.insert(path.to_string(), endpoint.clone());
        tracing::debug!(path, resource = %resource, "endpoint created");
        Ok(endpoint)
    }

    pub fn modify(
        &self,
        tx: &mut Transaction,
        path: &str,
        entity_tag: EntityTag,
        last_modified: OffsetDateTime,
    ) -> Result<Endpoint, KernelError> {
        let endpoint = tx
            .store_state_mut()?
            .endpoints
            .by_path
            .get_mut(path)
            .ok_or_else(|| EndpointError::UnknownEndpoint(path.to_string()))?;
        endpoint.ensure_live()?;
        endpoint.entity_tag = entity_tag;
        endpoint.last_modified = last_modified;
        Ok(endpoint.clone())
    }

    /// Turns the endpoint into a tombstone.
    pub fn delete(
        &self,
        tx: &mut Transaction,
        path: &str,
        when: OffsetDateTime,
    ) -> Result<Endpoint, KernelError> {
        let table = &mut tx.store_state_mut()?.endpoints;
        let endpoint = table
            .by_path
            .get_mut(path)
            .ok_or_else(|| EndpointError::UnknownEndpoint(path.to_string()))?;
        endpoint.ensure_live()?;
        let resource = endpoint.resource.take();
        endpoint.deleted = Some(when);
        endpoint.last_modified = when;
        let tombstone = endpoint.clone();
        if let Some(resource) = resource {
            table.live.remove(&ResourceKey::encode(&resource)?);
        }
        tracing::debug!(path, "endpoint deleted");
        Ok(tombstone)
    }

    pub fn find_by_path<'t>(
        &self,
        tx: &'t Transaction,
        path: &str,
    ) -> Result<Option<&'t Endpoint>, KernelError> {
        Ok(tx.store_state()?.endpoints.by_path.get(path))
    }

    /// Live endpoint publishing `resource`, if any.
    pub fn find_by_resource<'t>(
        &self,
        tx: &'t Transaction,
        resource: &ResourceId,
    ) -> Result<Option<&'t Endpoint>, KernelError> {
        let table = &tx.store_state()?.endpoints;
        let key = ResourceKey::encode(resource)?;
        Ok(table
            .live
            .get(&key)
            .and_then(|path| table.by_path.get(path)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::TransactionError;
    use crate::store::InMemoryStore;
    use crate::transaction::TransactionManager;

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(InMemoryStore::new()))
    }

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(seconds).unwrap()
    }

    #[test]
    fn digest_tags_are_strong_and_stable() {
        let tag = EntityTag::digest(b"hello");
        assert!(!tag.is_weak());
        assert_eq!(tag, EntityTag::digest(b"hello"));
        assert_eq!(tag.value().len(), 64);
        assert_eq!(EntityTag::weak("v1").to_string(), "W/\"v1\"");
    }

    #[test]
    fn deleted_endpoints_are_tombstones() {
        let manager = manager();
        let directory = EndpointDirectory::new();
        let book = ResourceId::new("dune", "book");
        let mut tx = manager.transaction();
        tx.begin().unwrap();

        let created = directory
            .create(&mut tx, "/books/dune", &book, at(10), EntityTag::strong("1"))
            .unwrap();
        assert_eq!(created.last_modified(), at(10));

        let modified = directory
            .modify(&mut tx, "/books/dune", EntityTag::strong("2"), at(20))
            .unwrap();
        assert_eq!(modified.entity_tag().value(), "2");

        let tombstone = directory.delete(&mut tx, "/books/dune", at(30)).unwrap();
        assert!(tombstone.resource().is_none());
        assert_eq!(tombstone.deleted(), Some(at(30)));

        let err = directory
            .modify(&mut tx, "/books/dune", EntityTag::strong("3"), at(40))
            .unwrap_err();
        assert!(matches!(err, KernelError::Endpoint(EndpointError::Deleted(_))));
        assert!(directory.delete(&mut tx, "/books/dune", at(40)).is_err());

        assert!(directory.find_by_resource(&tx, &book).unwrap().is_none());
        let found = directory.find_by_path(&tx, "/books/dune").unwrap().unwrap();
        assert!(found.is_deleted());
        tx.commit().unwrap();
    }

    #[test]
    fn one_live_endpoint_per_resource() {
        let manager = manager();
        let directory = EndpointDirectory::new();
        let book = ResourceId::new("dune", "book");
        let mut tx = manager.transaction();
        tx.begin().unwrap();

        directory
            .create(&mut tx, "/a", &book, at(1), EntityTag::strong("1"))
            .unwrap();
        let err = directory
            .create(&mut tx, "/b", &book, at(2), EntityTag::strong("1"))
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::Endpoint(EndpointError::AlreadyPublished { .. })
        ));

        directory.delete(&mut tx, "/a", at(3)).unwrap();
        directory
            .create(&mut tx, "/b", &book, at(4), EntityTag::strong("1"))
            .unwrap();
        assert_eq!(
            directory.find_by_resource(&tx, &book).unwrap().unwrap().path(),
            "/b"
        );

        let err = directory
            .create(&mut tx, "/a", &book, at(5), EntityTag::strong("1"))
            .unwrap_err();
        assert!(matches!(err, KernelError::Endpoint(EndpointError::DuplicatePath(_))));
        tx.rollback().unwrap();
    }

    #[test]
    fn directory_requires_an_active_transaction() {
        let manager = manager();
        let directory = EndpointDirectory::new();
        let mut tx = manager.transaction();
        let err = directory
            .create(&mut tx, "/x", &ResourceId::new("x", "t"), at(1), EntityTag::strong("1"))
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::Transaction(TransactionError::NotActive(_))
        ));
    }
}
