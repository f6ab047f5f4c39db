//! # Registry of running processes.
//!
//! [`Registry`] is the lifecycle-scoped table of live [`ProcessHandle`]s, one per
//! running entity. It is owned by a [`Supervisor`](crate::Supervisor) instance
//! (never a global) and shared with that supervisor's reader loops.
//!
//! ## Architecture
//! ```text
//! Supervisor::start ──► insert(id, handle)        (fails if id present)
//! Supervisor::stop  ──► remove_if(id, instance)   (after the process is gone)
//! reader loop exit  ──► remove_if(id, instance)   (no-op if stop got there first,
//!                                                   or a newer instance is registered)
//! transport layer   ──► len() / ids() / snapshot()
//! ```
//!
//! ## Rules
//! - At most one handle per entity id.
//! - Removal is keyed by `(id, instance)`, so a late cleanup never removes a newer handle.
//! - Start/stop/restart/exit cleanup of one entity are serialized by [`EntityLocks`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{OwnedMutexGuard, RwLock};

use super::handle::ProcessHandle;
use crate::entity::EntityId;

/// Point-in-time view of one registered process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningProcess {
    /// Entity id.
    pub id: EntityId,
    /// OS process id.
    pub pid: u32,
    /// When the process was spawned.
    pub started_at: DateTime<Utc>,
}

/// Table of running processes keyed by entity id.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<EntityId, Arc<ProcessHandle>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handle`; returns the already registered one on conflict.
    pub(crate) async fn insert(
        &self,
        id: EntityId,
        handle: Arc<ProcessHandle>,
    ) -> Result<(), Arc<ProcessHandle>> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&id) {
            return Err(Arc::clone(existing));
        }
        entries.insert(id, handle);
        Ok(())
    }

    /// Removes the entry for `id` only if it is still instance `instance`.
    pub(crate) async fn remove_if(&self, id: &EntityId, instance: u64) -> Option<Arc<ProcessHandle>> {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(h) if h.instance() == instance => entries.remove(id),
            _ => None,
        }
    }

    /// Handle of the running process for `id`.
    pub async fn get(&self, id: &EntityId) -> Option<Arc<ProcessHandle>> {
        self.entries.read().await.get(id).cloned()
    }

    /// True if `id` has a registered process.
    pub async fn contains(&self, id: &EntityId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Number of running processes.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is running.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Returns sorted list of running entity ids.
    pub async fn ids(&self) -> Vec<EntityId> {
        let entries = self.entries.read().await;
        let mut ids: Vec<EntityId> = entries.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns a view of every running process, sorted by id.
    pub async fn snapshot(&self) -> Vec<RunningProcess> {
        let entries = self.entries.read().await;
        let mut all: Vec<RunningProcess> = entries
            .iter()
            .map(|(id, h)| RunningProcess {
                id: id.clone(),
                pid: h.pid(),
                started_at: h.started_at(),
            })
            .collect();
        all.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

/// Per-entity async locks serializing lifecycle transitions.
#[derive(Default)]
pub(crate) struct EntityLocks {
    locks: std::sync::Mutex<HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityLocks {
    /// Acquires the lifecycle lock of `id`.
    pub(crate) async fn lock(&self, id: &EntityId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the lock entry of a forgotten entity.
    pub(crate) fn forget(&self, id: &EntityId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}
