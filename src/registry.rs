//! In-memory table of known instances.
//!
//! The runtime stays authoritative for existence and liveness. The table
//! carries what runtime tags cannot express (a difficulty changed by reset,
//! the provisioning status while seeding) and is reconciled against the
//! runtime on every sweep.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::instance::{Difficulty, SandboxInstance, SandboxStatus};

/// What a reconcile pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Ids the runtime listed that the table did not know.
    pub added: Vec<String>,
    /// Ids the table held that the runtime no longer lists.
    pub dropped: Vec<String>,
}

/// Instances keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, SandboxInstance>>,
}

impl Registry {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a runtime read, keeping state only the table knows.
    ///
    /// Returns the merged instance.
    pub fn observe(&self, mut live: SandboxInstance) -> SandboxInstance {
        let mut entries = self.entries.write();
        if let Some(known) = entries.get(&live.id) {
            overlay(known, &mut live);
        }
        entries.insert(live.id.clone(), live.clone());
        live
    }

    /// Replaces an entry outright.
    pub fn upsert(&self, instance: SandboxInstance) {
        self.entries.write().insert(instance.id.clone(), instance);
    }

    /// Entry for `id`, if known.
    pub fn get(&self, id: &str) -> Option<SandboxInstance> {
        self.entries.read().get(id).cloned()
    }

    /// Forgets an entry, returning it.
    pub fn remove(&self, id: &str) -> Option<SandboxInstance> {
        self.entries.write().remove(id)
    }

    /// Sets the status of a known entry.
    pub fn set_status(&self, id: &str, status: SandboxStatus) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.status = status;
        }
    }

    /// Sets the difficulty of a known entry.
    pub fn set_difficulty(&self, id: &str, difficulty: Difficulty) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.difficulty = difficulty;
        }
    }

    /// Entries for an owner, newest first.
    pub fn by_owner(&self, owner_id: &str) -> Vec<SandboxInstance> {
        let mut owned: Vec<_> = self
            .entries
            .read()
            .values()
            .filter(|i| i.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned
    }

    /// Entries whose lifetime has passed at `now`.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<SandboxInstance> {
        self.entries
            .read()
            .values()
            .filter(|i| i.is_expired(now))
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Makes the table match `live`, the full set of runtime-visible
    /// managed instances.
    pub fn reconcile(&self, live: Vec<SandboxInstance>) -> Reconciliation {
        let mut entries = self.entries.write();
        let mut report = Reconciliation::default();

        let mut next = HashMap::with_capacity(live.len());
        for mut instance in live {
            match entries.get(&instance.id) {
                Some(known) => overlay(known, &mut instance),
                None => report.added.push(instance.id.clone()),
            }
            next.insert(instance.id.clone(), instance);
        }
        report.dropped = entries
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        report.added.sort();
        report.dropped.sort();

        *entries = next;
        report
    }
}

/// Carries table-only state onto a fresh runtime read.
fn overlay(known: &SandboxInstance, live: &mut SandboxInstance) {
    live.difficulty = known.difficulty;
    if known.status == SandboxStatus::Provisioning && live.status == SandboxStatus::Ready {
        live.status = SandboxStatus::Provisioning;
    }
}
