use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::{KernelError, TransactionError};
use crate::store::{Store, StoreSession, StoreState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Inactive,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionState::Inactive => "inactive",
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ActiveContexts = Arc<Mutex<HashSet<ThreadId>>>;

/// Hands out units of work over a store, allowing at most one active
/// transaction per thread.
#[derive(Clone)]
pub struct TransactionManager {
    store: Arc<dyn Store>,
    active: ActiveContexts,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Creates an inactive transaction.
    pub fn transaction(&self) -> Transaction {
        Transaction {
            store: Arc::clone(&self.store),
            active: Arc::clone(&self.active),
            state: TransactionState::Inactive,
            session: None,
            owner: None,
        }
    }

    /// Whether the calling thread currently owns an active transaction.
    pub fn has_active_transaction(&self) -> bool {
        self.active.lock().contains(&thread::current().id())
    }

    /// Runs `work` inside a fresh transaction, committing on success and
    /// rolling back on failure.
    pub fn run<T, F>(&self, work: F) -> Result<T, KernelError>
    where
        F: FnOnce(&mut Transaction) -> Result<T, KernelError>,
    {
        let mut tx = self.transaction();
        tx.begin()?;
        match work(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback()?;
                Err(err)
            }
        }
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active.lock().len())
            .finish()
    }
}

/// Unit of work: `Inactive -> Active -> Committed | RolledBack`.
///
/// Dropping an active transaction rolls it back.
pub struct Transaction {
    store: Arc<dyn Store>,
    active: ActiveContexts,
    state: TransactionState,
    session: Option<Box<dyn StoreSession>>,
    owner: Option<ThreadId>,
}

impl Transaction {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn begin(&mut self) -> Result<(), KernelError> {
        if self.state != TransactionState::Inactive {
            return Err(TransactionError::CannotBegin(self.state.as_str()).into());
        }
        let owner = thread::current().id();
        if !self.active.lock().insert(owner) {
            return Err(TransactionError::AlreadyActive.into());
        }
        match self.store.open_session() {
            Ok(session) => {
                self.session = Some(session);
                self.owner = Some(owner);
                self.state = TransactionState::Active;
                tracing::debug!("transaction started");
                Ok(())
            }
            Err(err) => {
                self.active.lock().remove(&owner);
                Err(err)
            }
        }
    }

    /// Commits the unit of work. The session is released whether or not the
    /// store accepts the commit; a rejected commit leaves the transaction
    /// rolled back.
    pub fn commit(&mut self) -> Result<(), KernelError> {
        let session = self.take_session()?;
        match session.commit() {
            Ok(()) => {
                self.state = TransactionState::Committed;
                tracing::info!("transaction committed");
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::RolledBack;
                tracing::warn!(error = %err, "commit failed, transaction rolled back");
                Err(err)
            }
        }
    }

    /// Abandons the unit of work. Does nothing unless the transaction is active.
    pub fn rollback(&mut self) -> Result<(), KernelError> {
        if !self.is_active() {
            return Ok(());
        }
        let session = self.take_session()?;
        session.rollback();
        self.state = TransactionState::RolledBack;
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    pub(crate) fn store_state(&self) -> Result<&StoreState, KernelError> {
        match &self.session {
            Some(session) if self.is_active() => Ok(session.state()),
            _ => Err(TransactionError::NotActive(self.state.as_str()).into()),
        }
    }

    pub(crate) fn store_state_mut(&mut self) -> Result<&mut StoreState, KernelError> {
        let state = self.state;
        match &mut self.session {
            Some(session) if state == TransactionState::Active => Ok(session.state_mut()),
            _ => Err(TransactionError::NotActive(state.as_str()).into()),
        }
    }

    fn take_session(&mut self) -> Result<Box<dyn StoreSession>, KernelError> {
        if !self.is_active() {
            return Err(TransactionError::NotActive(self.state.as_str()).into());
        }
        let session = self
            .session
            .take()
            .ok_or_else(|| KernelError::IllegalState("active transaction without a session".into()))?;
        if let Some(owner) = self.owner.take() {
            self.active.lock().remove(&owner);
        }
        Ok(session)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::warn!("active transaction dropped, rolling back");
            let _ = self.rollback();
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn manager() -> (InMemoryStore, TransactionManager) {
        let store = InMemoryStore::new();
        let manager = TransactionManager::new(Arc::new(store.clone()));
        (store, manager)
    }

    #[test]
    fn state_machine_runs_to_commit() {
        let (store, manager) = manager();
        let mut tx = manager.transaction();
        assert_eq!(tx.state(), TransactionState::Inactive);
        assert!(!tx.state().is_terminal());

        tx.begin().unwrap();
        assert!(!tx.state().is_terminal());
        assert!(manager.has_active_transaction());
        assert!(matches!(
            tx.begin(),
            Err(KernelError::Transaction(TransactionError::CannotBegin("active")))
        ));

        tx.commit().unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(tx.state().is_terminal());
        assert!(!manager.has_active_transaction());
        assert_eq!(store.revision(), 1);
        assert!(tx.commit().is_err());
    }

    #[test]
    fn rollback_of_inactive_transaction_is_a_no_op() {
        let (_, manager) = manager();
        let mut tx = manager.transaction();
        tx.rollback().unwrap();
        assert_eq!(tx.state(), TransactionState::Inactive);

        tx.begin().unwrap();
        tx.rollback().unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert!(tx.state().is_terminal());
        tx.rollback().unwrap();
        assert!(tx.store_state().is_err());
    }

    #[test]
    fn one_active_transaction_per_thread() {
        let (_, manager) = manager();
        let mut first = manager.transaction();
        first.begin().unwrap();

        let mut second = manager.transaction();
        assert!(matches!(
            second.begin(),
            Err(KernelError::Transaction(TransactionError::AlreadyActive))
        ));
        assert_eq!(second.state(), TransactionState::Inactive);

        let other = manager.clone();
        std::thread::spawn(move || {
            let mut tx = other.transaction();
            tx.begin().unwrap();
            tx.rollback().unwrap();
        })
        .join()
        .unwrap();

        first.rollback().unwrap();
        second.begin().unwrap();
    }

    #[test]
    fn dropping_an_active_transaction_releases_the_thread() {
        let (store, manager) = manager();
        {
            let mut tx = manager.transaction();
            tx.begin().unwrap();
        }
        assert!(!manager.has_active_transaction());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn failed_commit_releases_the_session() {
        let (_, manager) = manager();
        let mut stale = manager.transaction();
        stale.begin().unwrap();

        let other = manager.clone();
        std::thread::spawn(move || other.run(|_| Ok(())).unwrap())
            .join()
            .unwrap();

        let err = stale.commit().unwrap_err();
        assert!(matches!(
            err,
            KernelError::Transaction(TransactionError::Conflict { .. })
        ));
        assert_eq!(stale.state(), TransactionState::RolledBack);
        assert!(!manager.has_active_transaction());
    }
}
