//! In-memory backend.
//!
//! Reference implementation of the adapter contract: tokenless writes with
//! live snapshot pushes, like the document-DB backend but without a network.
//! Used by the conformance and workflow test suites and selectable as an
//! offline/demo backend via `FREIGHTFILE_BACKEND=memory`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};

use crate::backend::{BackendAdapter, Collection};
use crate::error::StoreError;
use crate::record::{JobFileRecord, UserRecord};

#[derive(Default)]
struct MemoryState {
    active: HashMap<String, JobFileRecord>,
    quarantine: HashMap<String, JobFileRecord>,
    users: BTreeMap<String, UserRecord>,
}

impl MemoryState {
    fn collection(&self, coll: Collection) -> &HashMap<String, JobFileRecord> {
        match coll {
            Collection::Active => &self.active,
            Collection::Quarantine => &self.quarantine,
        }
    }

    fn collection_mut(&mut self, coll: Collection) -> &mut HashMap<String, JobFileRecord> {
        match coll {
            Collection::Active => &mut self.active,
            Collection::Quarantine => &mut self.quarantine,
        }
    }

    fn snapshot(&self, coll: Collection) -> Vec<JobFileRecord> {
        let mut records: Vec<JobFileRecord> = self.collection(coll).values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

pub struct MemoryAdapter {
    state: RwLock<MemoryState>,
    active_tx: watch::Sender<Vec<JobFileRecord>>,
    quarantine_tx: watch::Sender<Vec<JobFileRecord>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        let (active_tx, _) = watch::channel(Vec::new());
        let (quarantine_tx, _) = watch::channel(Vec::new());
        Self {
            state: RwLock::new(MemoryState::default()),
            active_tx,
            quarantine_tx,
        }
    }

    fn notify(&self, coll: Collection, snapshot: Vec<JobFileRecord>) {
        let tx = match coll {
            Collection::Active => &self.active_tx,
            Collection::Quarantine => &self.quarantine_tx,
        };
        // send_replace never fails even with no subscribers.
        tx.send_replace(snapshot);
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports_live_updates(&self) -> bool {
        true
    }

    async fn get(&self, coll: Collection, id: &str) -> Result<JobFileRecord, StoreError> {
        let state = self.state.read().await;
        state
            .collection(coll)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn put(
        &self,
        coll: Collection,
        id: &str,
        record: &JobFileRecord,
        _expected_token: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let snapshot = {
            let mut state = self.state.write().await;
            let mut stored = record.clone();
            stored.revision_token = None;
            state.collection_mut(coll).insert(id.to_string(), stored);
            state.snapshot(coll)
        };
        self.notify(coll, snapshot);
        Ok(None)
    }

    async fn delete(&self, coll: Collection, id: &str) -> Result<(), StoreError> {
        let snapshot = {
            let mut state = self.state.write().await;
            if state.collection_mut(coll).remove(id).is_none() {
                return Err(StoreError::NotFound { id: id.to_string() });
            }
            state.snapshot(coll)
        };
        self.notify(coll, snapshot);
        Ok(())
    }

    async fn list_all(&self, coll: Collection) -> Result<Vec<JobFileRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.snapshot(coll))
    }

    async fn subscribe(
        &self,
        coll: Collection,
    ) -> Result<watch::Receiver<Vec<JobFileRecord>>, StoreError> {
        let rx = match coll {
            Collection::Active => self.active_tx.subscribe(),
            Collection::Quarantine => self.quarantine_tx.subscribe(),
        };
        Ok(rx)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.users.values().cloned().collect())
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.users.insert(user.username.clone(), user.clone());
        Ok(())
    }
}
