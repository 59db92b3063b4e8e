use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::constraint::{ConstraintReport, ConstraintReportId};
use crate::endpoint::EndpointTable;
use crate::error::{KernelError, TransactionError};
use crate::graph::Entity;
use crate::key::ResourceKey;

/// Everything a store persists: graph entities keyed by surrogate key,
/// outstanding constraint reports and endpoint rows.
#[derive(Clone, Debug, Default)]
pub struct StoreState {
    pub(crate) resources: BTreeMap<ResourceKey, Entity>,
    pub(crate) reports: BTreeMap<ConstraintReportId, ConstraintReport>,
    pub(crate) endpoints: EndpointTable,
}

impl StoreState {
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    pub fn entity(&self, key: &ResourceKey) -> Option<&Entity> {
        self.resources.get(key)
    }

    pub fn reports(&self) -> impl Iterator<Item = &ConstraintReport> {
        self.reports.values()
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }
}

/// Storage collaborator behind the transaction manager.
pub trait Store: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn StoreSession>, KernelError>;
}

/// Unit of work against a [`Store`].
///
/// A session is consumed by exactly one of `commit` or `rollback`.
pub trait StoreSession: Send {
    fn state(&self) -> &StoreState;
    fn state_mut(&mut self) -> &mut StoreState;
    fn commit(self: Box<Self>) -> Result<(), KernelError>;
    fn rollback(self: Box<Self>);
}

#[derive(Debug, Default)]
struct Committed {
    revision: u64,
    state: StoreState,
}

/// Process-local store with optimistic sessions.
///
/// Sessions work on a private copy of the committed state; a commit is
/// rejected if another session committed after this one was opened.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Committed>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits so far.
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// Copy of the committed state.
    pub fn snapshot(&self) -> StoreState {
        self.inner.lock().state.clone()
    }
}

impl Store for InMemoryStore {
    fn open_session(&self) -> Result<Box<dyn StoreSession>, KernelError> {
        let committed = self.inner.lock();
        Ok(Box::new(InMemorySession {
            inner: Arc::clone(&self.inner),
            started: committed.revision,
            working: committed.state.clone(),
        }))
    }
}

struct InMemorySession {
    inner: Arc<Mutex<Committed>>,
    started: u64,
    working: StoreState,
}

impl StoreSession for InMemorySession {
    fn state(&self) -> &StoreState {
        &self.working
    }

    fn state_mut(&mut self) -> &mut StoreState {
        &mut self.working
    }

    fn commit(self: Box<Self>) -> Result<(), KernelError> {
        let mut committed = self.inner.lock();
        if committed.revision != self.started {
            return Err(TransactionError::Conflict {
                started: self.started,
                current: committed.revision,
            }
            .into());
        }
        committed.state = self.working;
        committed.revision += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_see_only_committed_state() {
        let store = InMemoryStore::new();
        let first = store.open_session().unwrap();
        let second = store.open_session().unwrap();

        first.commit().unwrap();
        assert_eq!(store.revision(), 1);

        let err = second.commit().unwrap_err();
        assert!(matches!(
            err,
            KernelError::Transaction(TransactionError::Conflict {
                started: 0,
                current: 1
            })
        ));
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn rollback_discards_the_working_copy() {
        let store = InMemoryStore::new();
        let session = store.open_session().unwrap();
        session.rollback();
        assert_eq!(store.revision(), 0);
        assert_eq!(store.snapshot().resource_count(), 0);
    }
}
