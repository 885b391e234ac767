//! Subject registry.
//!
//! The registry is the single owner of the set of tracked subjects:
//! - Structural changes (insert, remove, clear) go through one
//!   registry-wide lock.
//! - Each subject's mutable fields sit behind the subject's own async
//!   mutex, so a slow provider call for one subject never stalls another.
//! - Each subject carries a `CancellationToken` (a child of the worker's
//!   root token) that parents its poll timer and pending jump.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::handle::{JumpHandle, PollHandle};
use crate::domain::{Credential, SubjectState};

/// Mutable per-subject state.
#[derive(Debug, Default)]
pub struct SubjectRecord {
    pub state: SubjectState,
    /// Last item seen playing; `None` while idle.
    pub last_track_id: Option<String>,
    /// Last observed playback offset in milliseconds.
    pub last_progress_ms: i64,
    pub poll: Option<PollHandle>,
    pub pending_jump: Option<JumpHandle>,
    pub credential: Option<Credential>,
    pub contact_email: Option<String>,
}

impl SubjectRecord {
    /// Cancel the pending jump, if any. Returns `true` if one was stopped before firing.
    pub fn cancel_pending_jump(&mut self) -> bool {
        self.pending_jump
            .take()
            .is_some_and(|jump| jump.cancel())
    }

    /// Whether the subject needs a poll timer started.
    pub fn needs_timer(&self) -> bool {
        self.poll.as_ref().is_none_or(|poll| !poll.is_live())
    }
}

/// A registered subject.
#[derive(Debug)]
pub struct SubjectEntry {
    id: String,
    token: CancellationToken,
    record: Mutex<SubjectRecord>,
}

impl SubjectEntry {
    fn new(id: String, token: CancellationToken) -> Self {
        Self {
            id,
            token,
            record: Mutex::new(SubjectRecord::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancellation root for everything this subject has spawned.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the subject has been removed from the registry.
    pub fn is_removed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn lock(&self) -> MutexGuard<'_, SubjectRecord> {
        self.record.lock().await
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, SubjectRecord>> {
        self.record.try_lock().ok()
    }

    /// Point-in-time view of the subject.
    pub async fn status(&self) -> SubjectStatus {
        let record = self.record.lock().await;
        SubjectStatus {
            id: self.id.clone(),
            state: record.state,
            last_track_id: record.last_track_id.clone(),
            last_progress_ms: record.last_progress_ms,
            contact_email: record.contact_email.clone(),
            has_credential: record.credential.is_some(),
            poll_period: record
                .poll
                .as_ref()
                .filter(|p| p.is_live())
                .map(PollHandle::period),
            pending_jump: record
                .pending_jump
                .as_ref()
                .filter(|j| j.is_pending())
                .map(|j| PendingJumpStatus {
                    item_id: j.item_id().to_string(),
                    trigger_ms: j.trigger_ms(),
                }),
        }
    }
}

/// Snapshot returned by status lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectStatus {
    pub id: String,
    pub state: SubjectState,
    pub last_track_id: Option<String>,
    pub last_progress_ms: i64,
    pub contact_email: Option<String>,
    pub has_credential: bool,
    pub poll_period: Option<Duration>,
    pub pending_jump: Option<PendingJumpStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingJumpStatus {
    pub item_id: String,
    pub trigger_ms: i64,
}

/// Structural changes made by [`SubjectRegistry::apply_membership`].
#[derive(Debug, Default)]
pub struct MembershipChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Entries for every wanted id, in input order.
    pub entries: Vec<Arc<SubjectEntry>>,
}

/// Registry of tracked subjects by id.
pub struct SubjectRegistry {
    entries: RwLock<HashMap<String, Arc<SubjectEntry>>>,
    /// Parent of every subject token.
    root: CancellationToken,
}

impl SubjectRegistry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            root,
        }
    }

    /// Get or create the entry for `id`. An existing entry is returned untouched.
    ///
    /// The flag is `true` when a new Idle entry was created.
    pub fn upsert(&self, id: &str) -> (Arc<SubjectEntry>, bool) {
        if let Some(entry) = self.entries.read().get(id) {
            return (Arc::clone(entry), false);
        }

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(id) {
            return (Arc::clone(entry), false);
        }

        let entry = Arc::new(SubjectEntry::new(id.to_string(), self.root.child_token()));
        entries.insert(id.to_string(), Arc::clone(&entry));
        debug!(subject_id = id, "Registered subject");
        (entry, true)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SubjectEntry>> {
        self.entries.read().get(id).cloned()
    }

    /// Remove `id`, canceling its poll timer and pending jump before the entry goes.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get(id) else {
            return false;
        };
        entry.token.cancel();
        entries.remove(id);
        debug!(subject_id = id, "Removed subject");
        true
    }

    /// Make membership equal to `ids` in one step.
    ///
    /// Vanished subjects are canceled and removed, new ones are inserted Idle,
    /// and subjects in both keep their entry. Readers see either the old set
    /// or the new one. No subject lock is taken.
    pub fn apply_membership<'a, I>(&self, ids: I) -> MembershipChange
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut wanted: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            if seen.insert(id) {
                wanted.push(id);
            }
        }

        let mut change = MembershipChange::default();
        let mut entries = self.entries.write();

        entries.retain(|id, entry| {
            if seen.contains(id.as_str()) {
                return true;
            }
            entry.token.cancel();
            change.removed.push(id.clone());
            false
        });

        for id in wanted {
            let entry = entries
                .entry(id.to_string())
                .or_insert_with(|| {
                    change.added.push(id.to_string());
                    Arc::new(SubjectEntry::new(id.to_string(), self.root.child_token()))
                })
                .clone();
            change.entries.push(entry);
        }
        drop(entries);

        if !change.added.is_empty() || !change.removed.is_empty() {
            debug!(
                added = change.added.len(),
                removed = change.removed.len(),
                "Applied membership change"
            );
        }
        change
    }

    /// Remove every subject.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        for entry in entries.values() {
            entry.token.cancel();
        }
        let count = entries.len();
        entries.clear();
        count
    }

    /// Visit every entry of a consistent snapshot. The registry lock is not
    /// held while `f` runs.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<SubjectEntry>),
    {
        for entry in self.entries() {
            f(&entry);
        }
    }

    pub fn entries(&self) -> Vec<Arc<SubjectEntry>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
