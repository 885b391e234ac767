//! In-memory provider and store fakes for scheduler tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, sleep};

use crate::database::repositories::TriggerStore;
use crate::directory::DirectoryProvider;
use crate::domain::{Credential, SubjectSnapshot, Trigger};
use crate::playback::{PlaybackProvider, PlaybackStatus};
use crate::{Error, Result};

#[derive(Default)]
pub struct FakeStore {
    triggers: Mutex<HashMap<(String, String), Vec<Trigger>>>,
    lookup_delay: Mutex<Duration>,
    fail_lists: AtomicBool,
    list_calls: AtomicUsize,
}

impl FakeStore {
    pub fn insert(&self, subject_id: &str, item_id: &str, triggers: &[Trigger]) {
        let mut map = self.triggers.lock();
        let list = map
            .entry((subject_id.to_string(), item_id.to_string()))
            .or_default();
        list.extend_from_slice(triggers);
        list.sort_by_key(|t| t.trigger_ms);
    }

    pub fn clear(&self) {
        self.triggers.lock().clear();
    }

    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock() = delay;
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TriggerStore for FakeStore {
    async fn list_triggers(&self, subject_id: &str, item_id: &str) -> Result<Vec<Trigger>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(Error::Other("store unavailable".into()));
        }
        Ok(self
            .triggers
            .lock()
            .get(&(subject_id.to_string(), item_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup_target(
        &self,
        subject_id: &str,
        item_id: &str,
        trigger_ms: i64,
    ) -> Result<Option<i64>> {
        let delay = *self.lookup_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(self
            .triggers
            .lock()
            .get(&(subject_id.to_string(), item_id.to_string()))
            .and_then(|list| list.iter().find(|t| t.trigger_ms == trigger_ms))
            .map(|t| t.target_ms))
    }
}

#[derive(Debug, Clone)]
pub struct SeekCall {
    pub access_token: String,
    pub target_ms: i64,
    pub at: Instant,
}

/// Playback fake keyed by access token.
///
/// A playing status advances with the (virtual) clock, and a successful
/// seek moves it, so consecutive ticks look like real playback.
#[derive(Default)]
pub struct FakePlayback {
    statuses: Mutex<HashMap<String, (PlaybackStatus, Instant)>>,
    failing: Mutex<HashSet<String>>,
    seeks: Mutex<Vec<SeekCall>>,
    fail_seeks: AtomicBool,
    seek_attempts: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FakePlayback {
    pub fn set_status(&self, access_token: &str, status: PlaybackStatus) {
        self.failing.lock().remove(access_token);
        self.statuses
            .lock()
            .insert(access_token.to_string(), (status, Instant::now()));
    }

    pub fn fail_status(&self, access_token: &str) {
        self.failing.lock().insert(access_token.to_string());
    }

    pub fn fail_seeks(&self, fail: bool) {
        self.fail_seeks.store(fail, Ordering::SeqCst);
    }

    pub fn seeks(&self) -> Vec<SeekCall> {
        self.seeks.lock().clone()
    }

    pub fn seek_attempts(&self) -> usize {
        self.seek_attempts.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackProvider for FakePlayback {
    async fn currently_playing(&self, credential: &Credential) -> Result<PlaybackStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let token = credential.access_token();
        if self.failing.lock().contains(token) {
            return Err(Error::provider("spotify", "status unavailable"));
        }
        let Some((mut status, since)) = self.statuses.lock().get(token).cloned() else {
            return Ok(PlaybackStatus::not_playing());
        };
        if status.is_playing {
            status.progress_ms += since.elapsed().as_millis() as i64;
        }
        Ok(status)
    }

    async fn seek(&self, credential: &Credential, target_ms: i64) -> Result<()> {
        self.seek_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_seeks.load(Ordering::SeqCst) {
            return Err(Error::provider("spotify", "no active device"));
        }
        if let Some((status, since)) = self.statuses.lock().get_mut(credential.access_token()) {
            status.progress_ms = target_ms;
            *since = Instant::now();
        }
        self.seeks.lock().push(SeekCall {
            access_token: credential.access_token().to_string(),
            target_ms,
            at: Instant::now(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    subjects: Mutex<Vec<SubjectSnapshot>>,
    credentials: Mutex<HashMap<String, Credential>>,
    failing_credentials: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    credential_delay: Mutex<Duration>,
    credential_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDirectory {
    pub fn set_subjects(&self, ids: &[&str]) {
        *self.subjects.lock() = ids.iter().map(|id| SubjectSnapshot::new(*id)).collect();
    }

    pub fn set_snapshots(&self, snapshots: Vec<SubjectSnapshot>) {
        *self.subjects.lock() = snapshots;
    }

    pub fn set_credential(&self, subject_id: &str, credential: Credential) {
        self.credentials
            .lock()
            .insert(subject_id.to_string(), credential);
    }

    pub fn fail_credential(&self, subject_id: &str) {
        self.failing_credentials
            .lock()
            .insert(subject_id.to_string());
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_credential_delay(&self, delay: Duration) {
        *self.credential_delay.lock() = delay;
    }

    pub fn credential_calls(&self) -> usize {
        self.credential_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryProvider for FakeDirectory {
    async fn list_subjects(&self) -> Result<Vec<SubjectSnapshot>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::provider("clerk", "directory unavailable"));
        }
        Ok(self.subjects.lock().clone())
    }

    async fn list_credential(
        &self,
        subject_id: &str,
        _provider: &str,
    ) -> Result<Option<Credential>> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.credential_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_credentials.lock().contains(subject_id) {
            return Err(Error::provider("clerk", "token lookup failed"));
        }
        Ok(self.credentials.lock().get(subject_id).cloned())
    }
}
